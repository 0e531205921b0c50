use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{PipelineError, StepFailure};
use super::ordering::CanonicalOrder;
use super::run::PipelineRun;
use super::state::{Progress, RunSnapshot, RunState};
use crate::edit::catalog::CategoryFamily;
use crate::edit::{EditOperation, EditableImage};
use crate::remote::{RemoteEditError, SharedRemoteEditService};

#[derive(Debug, Default)]
struct ControllerInner {
    generation: u64,
    state: RunState,
    run: Option<PipelineRun>,
    progress: Option<Progress>,
}

impl ControllerInner {
    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            generation: self.generation,
            run_id: self.run.as_ref().map(PipelineRun::id),
            started_at: self.run.as_ref().map(PipelineRun::started_at),
            state: self.state.clone(),
            progress: self.progress.clone(),
            operations: self
                .run
                .as_ref()
                .map(|run| {
                    run.operations()
                        .iter()
                        .map(|op| op.category.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
            current_image: self.run.as_ref().map(|run| run.current().summary()),
        }
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid run transition {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }

    fn active_run(&mut self, generation: u64) -> Result<&mut PipelineRun, PipelineError> {
        if self.generation != generation {
            return Err(PipelineError::Stale { generation });
        }
        self.run
            .as_mut()
            .filter(|run| run.generation() == generation)
            .ok_or(PipelineError::Stale { generation })
    }
}

/// Drives edit operations one at a time against a remote edit service.
///
/// At most one run is active. Starting while a run is in flight is rejected;
/// `reset` abandons the active run and any response it later receives is dropped.
pub struct PipelineController {
    service: SharedRemoteEditService,
    family: CategoryFamily,
    order: CanonicalOrder,
    inner: Mutex<ControllerInner>,
    snapshots: watch::Sender<RunSnapshot>,
}

impl PipelineController {
    pub fn new(service: SharedRemoteEditService, family: CategoryFamily) -> Self {
        let (snapshots, _) = watch::channel(RunSnapshot::default());
        Self {
            service,
            family,
            order: CanonicalOrder::for_family(family),
            inner: Mutex::new(ControllerInner::default()),
            snapshots,
        }
    }

    pub fn family(&self) -> CategoryFamily {
        self.family
    }

    pub fn state(&self) -> RunState {
        self.lock().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().state.is_running()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.subscribe()
    }

    /// Last successfully produced image of the current run, if any.
    pub fn current_image(&self) -> Option<EditableImage> {
        self.lock().run.as_ref().map(|run| run.current().clone())
    }

    pub async fn apply_one(
        &self,
        base: EditableImage,
        operation: EditOperation,
    ) -> Result<EditableImage, PipelineError> {
        self.execute(base, vec![operation]).await
    }

    pub async fn apply_all(
        &self,
        base: EditableImage,
        operations: Vec<EditOperation>,
    ) -> Result<EditableImage, PipelineError> {
        if operations.is_empty() {
            return Err(PipelineError::NothingSelected);
        }
        let ordered = self.order.arrange(operations);
        self.execute(base, ordered).await
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        let abandoned = inner.run.take().map(|run| run.id());
        inner.transition(RunState::Idle);
        inner.progress = None;
        info!(
            generation = inner.generation,
            abandoned_run = ?abandoned,
            "pipeline reset"
        );
        self.publish(&inner);
    }

    async fn execute(
        &self,
        base: EditableImage,
        operations: Vec<EditOperation>,
    ) -> Result<EditableImage, PipelineError> {
        let total = operations.len();
        let (generation, run_id) = self.begin(base, operations.clone())?;

        for (index, operation) in operations.iter().enumerate() {
            let input = self.step_input(generation)?;
            debug!(
                %run_id,
                generation,
                step = index + 1,
                total,
                category = %operation.category,
                input = %input.digest(),
                "applying edit step"
            );
            match self.service.apply(&input, operation).await {
                Ok(output) => self.complete_step(generation, index, operation, output)?,
                Err(error) => return Err(self.fail_step(generation, index, operation, error)),
            }
        }

        self.finish(generation)
    }

    fn begin(
        &self,
        base: EditableImage,
        operations: Vec<EditOperation>,
    ) -> Result<(u64, Uuid), PipelineError> {
        let mut inner = self.lock();
        if inner.state.is_running() {
            warn!(
                generation = inner.generation,
                "rejecting pipeline start while a run is in progress"
            );
            return Err(PipelineError::Busy);
        }
        let total = operations.len();
        let first_label = operations
            .first()
            .map(|op| self.step_label(op))
            .unwrap_or_default();

        inner.generation += 1;
        let run = PipelineRun::new(inner.generation, base, operations);
        let run_id = run.id();
        inner.run = Some(run);
        inner.transition(RunState::Running {
            step_index: 0,
            total,
        });
        inner.progress = Some(Progress {
            completed: 0,
            total,
            label: format!("Applying {first_label} 1/{total}"),
        });
        info!(%run_id, generation = inner.generation, total, "pipeline run started");
        self.publish(&inner);
        Ok((inner.generation, run_id))
    }

    fn step_input(&self, generation: u64) -> Result<EditableImage, PipelineError> {
        let mut inner = self.lock();
        let run = inner.active_run(generation)?;
        Ok(run.current().clone())
    }

    fn complete_step(
        &self,
        generation: u64,
        index: usize,
        operation: &EditOperation,
        output: EditableImage,
    ) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        let run = match inner.active_run(generation) {
            Ok(run) => run,
            Err(stale) => {
                debug!(
                    generation,
                    category = %operation.category,
                    "discarding edit result for superseded run"
                );
                return Err(stale);
            }
        };
        run.advance(output);
        let total = run.total();
        let completed = run.cursor();
        let next_label = run.next_operation().map(|op| self.step_label(op));

        let label = match next_label {
            Some(next) => {
                inner.transition(RunState::Running {
                    step_index: index + 1,
                    total,
                });
                format!("Applying {next} {}/{total}", completed + 1)
            }
            None => format!(
                "Applied {} {completed}/{total}",
                self.family.label(operation.category.as_str())
            ),
        };
        inner.progress = Some(Progress {
            completed,
            total,
            label,
        });
        info!(
            generation,
            step = completed,
            total,
            category = %operation.category,
            "edit step applied"
        );
        self.publish(&inner);
        Ok(())
    }

    fn fail_step(
        &self,
        generation: u64,
        index: usize,
        operation: &EditOperation,
        error: RemoteEditError,
    ) -> PipelineError {
        let mut inner = self.lock();
        let run = match inner.active_run(generation) {
            Ok(run) => run,
            Err(stale) => {
                debug!(
                    generation,
                    category = %operation.category,
                    error = %error,
                    "discarding edit failure for superseded run"
                );
                return stale;
            }
        };
        let last_good = run.current().clone();
        let total = run.total();
        let failure = StepFailure {
            step: index + 1,
            total,
            category: operation.category.clone(),
            label: self.family.label(operation.category.as_str()),
            last_good,
            source: error,
        };
        warn!(
            generation,
            step = failure.step,
            total,
            category = %failure.category,
            transport = failure.source.is_transport(),
            error = %failure.source,
            "edit step failed; pipeline aborted"
        );
        inner.transition(RunState::Failed {
            reason: failure.source.to_string(),
        });
        self.publish(&inner);
        PipelineError::Step(Box::new(failure))
    }

    fn finish(&self, generation: u64) -> Result<EditableImage, PipelineError> {
        let mut inner = self.lock();
        let run = inner.active_run(generation)?;
        let result = run.current().clone();
        let total = run.total();
        inner.transition(RunState::Completed);
        inner.progress = Some(Progress {
            completed: total,
            total,
            label: String::from("All selected edits applied"),
        });
        info!(generation, total, output = %result.digest(), "pipeline run completed");
        self.publish(&inner);
        Ok(result)
    }

    fn step_label(&self, operation: &EditOperation) -> String {
        let label = self.family.label(operation.category.as_str());
        match operation.param("shade") {
            Some(shade) => format!("{label} ({shade})"),
            None => label,
        }
    }

    fn publish(&self, inner: &ControllerInner) {
        self.snapshots.send_replace(inner.snapshot());
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
