pub mod health;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::edit::{EditOperation, EditableImage};

pub type StepResult = Result<EditableImage, RemoteEditError>;

/// One image plus one operation in, one image out.
#[async_trait]
pub trait RemoteEditService: Send + Sync + 'static {
    async fn apply(&self, image: &EditableImage, operation: &EditOperation) -> StepResult;
}

pub type SharedRemoteEditService = Arc<dyn RemoteEditService>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteEditError {
    #[error("edit service unreachable: {0}")]
    Transport(String),
    #[error("{message}")]
    Service {
        status: Option<u16>,
        message: String,
    },
}

impl RemoteEditError {
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => None,
            Self::Service { status, .. } => *status,
        }
    }
}

pub(crate) fn join_under_base(base: &url::Url, path: &str) -> Result<url::Url, url::ParseError> {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return url::Url::parse(path);
    }
    url::Url::parse(
        format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
        .as_str(),
    )
}
