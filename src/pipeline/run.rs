use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::edit::{EditOperation, EditableImage};

#[derive(Debug, Clone)]
pub struct PipelineRun {
    id: Uuid,
    generation: u64,
    started_at: DateTime<Utc>,
    operations: Vec<EditOperation>,
    cursor: usize,
    current: EditableImage,
}

impl PipelineRun {
    pub fn new(generation: u64, base: EditableImage, operations: Vec<EditOperation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            started_at: Utc::now(),
            current: base,
            operations,
            cursor: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn operations(&self) -> &[EditOperation] {
        &self.operations
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.operations.len()
    }

    pub fn current(&self) -> &EditableImage {
        &self.current
    }

    pub fn next_operation(&self) -> Option<&EditOperation> {
        self.operations.get(self.cursor)
    }

    /// The step output becomes the next step's input.
    pub fn advance(&mut self, output: EditableImage) {
        self.current = output;
        self.cursor += 1;
    }
}
