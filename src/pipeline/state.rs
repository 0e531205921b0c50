use serde::Serialize;
use uuid::Uuid;

use crate::edit::ImageSummary;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running {
        step_index: usize,
        total: usize,
    },
    Completed,
    Failed {
        reason: String,
    },
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (_, Self::Idle) => true,
            (
                Self::Idle | Self::Completed | Self::Failed { .. },
                Self::Running { step_index: 0, .. },
            ) => true,
            (
                Self::Running {
                    step_index: current,
                    total,
                },
                Self::Running {
                    step_index: next,
                    total: next_total,
                },
            ) => *next == current + 1 && next < total && total == next_total,
            (Self::Running { .. }, Self::Completed | Self::Failed { .. }) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RunSnapshot {
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image: Option<ImageSummary>,
}
