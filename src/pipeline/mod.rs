pub mod controller;
pub mod error;
pub mod ordering;
pub mod run;
pub mod state;

pub use controller::PipelineController;
pub use error::{PipelineError, PipelineErrorKind, StepFailure};
pub use ordering::CanonicalOrder;
pub use run::PipelineRun;
pub use state::{Progress, RunSnapshot, RunState};
