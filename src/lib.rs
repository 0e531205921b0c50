pub mod api;
pub mod edit;
pub mod pipeline;
pub mod remote;
pub mod settings;
