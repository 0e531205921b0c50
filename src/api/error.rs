use serde::Serialize;

use crate::pipeline::{PipelineError, PipelineErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Infra,
    Conflict,
}

impl ErrorKind {
    pub fn for_pipeline_error(error: &PipelineError) -> Self {
        match error {
            PipelineError::Busy => Self::Conflict,
            other => match other.kind() {
                PipelineErrorKind::Validation => Self::Validation,
                PipelineErrorKind::Transport => Self::Infra,
                PipelineErrorKind::Service => Self::Provider,
                PipelineErrorKind::Stale => Self::Conflict,
            },
        }
    }
}

pub fn pipeline_error_code(error: &PipelineError) -> &'static str {
    match error {
        PipelineError::NothingSelected => "nothing_selected",
        PipelineError::MissingBaseImage => "missing_base_image",
        PipelineError::Busy => "run_in_progress",
        PipelineError::Step(failure) if failure.source.is_transport() => {
            "edit_service_unreachable"
        }
        PipelineError::Step(_) => "edit_service_failed",
        PipelineError::Stale { .. } => "run_superseded",
    }
}
