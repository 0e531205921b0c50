use thiserror::Error;

use crate::edit::EditableImage;
use crate::remote::RemoteEditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Validation,
    Transport,
    Service,
    Stale,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("nothing selected: pick at least one edit")]
    NothingSelected,
    #[error("no base image: upload an image first")]
    MissingBaseImage,
    #[error("a pipeline run is already in progress")]
    Busy,
    #[error(transparent)]
    Step(Box<StepFailure>),
    #[error("result for superseded run (generation {generation}) discarded")]
    Stale { generation: u64 },
}

#[derive(Debug, Error)]
#[error("{label} failed at step {step}/{total}: {source}")]
pub struct StepFailure {
    pub step: usize,
    pub total: usize,
    pub category: String,
    pub label: String,
    pub last_good: EditableImage,
    pub source: RemoteEditError,
}

impl PipelineError {
    pub fn kind(&self) -> PipelineErrorKind {
        match self {
            Self::NothingSelected | Self::MissingBaseImage | Self::Busy => {
                PipelineErrorKind::Validation
            }
            Self::Step(failure) if failure.source.is_transport() => PipelineErrorKind::Transport,
            Self::Step(_) => PipelineErrorKind::Service,
            Self::Stale { .. } => PipelineErrorKind::Stale,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    /// Human-readable reason, without step bookkeeping.
    pub fn reason(&self) -> String {
        match self {
            Self::Step(failure) => failure.source.to_string(),
            other => other.to_string(),
        }
    }

    pub fn step_failure(&self) -> Option<&StepFailure> {
        match self {
            Self::Step(failure) => Some(failure),
            _ => None,
        }
    }
}
