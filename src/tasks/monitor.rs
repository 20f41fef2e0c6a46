//! Task monitor: the single source of truth for what is executing
//!
//! The monitor owns the submission handle of the compute worker. Queuing a
//! task records it as active, wraps it in a job that captures its result,
//! and publishes status changes on the [`EventBus`]. Errors raised by a task
//! are turned into status; they never cross the worker boundary.
//!
//! Every task is bound to the worker generation it was queued on. After
//! [`TaskMonitor::reset_monitor`] rebinds to a fresh worker, late progress
//! or completion from a task of an older generation is ignored, so the
//! published status always describes the most recently bound task.

use crate::error::{DrawbotError, Result};
use crate::events::{AppEvent, EventBus};
use crate::tasks::pool::{Job, WorkerContext, WorkerHandle};
use crate::tasks::{Task, TaskId, TaskKind, TaskOutcome};
use std::sync::{Arc, Mutex, MutexGuard};

/// Minimum progress change that triggers a new status event
const PROGRESS_PUBLISH_STEP: f64 = 0.01;

/// Published state of the compute worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatus {
    pub title: String,
    pub message: String,
    /// Fraction in `0.0..=1.0`
    pub progress: f64,
    /// Message of the last failure, cleared when a new task is queued
    pub error: Option<String>,
    pub active_task: Option<TaskId>,
    pub active_kind: Option<TaskKind>,
    /// Generation of the compute worker this status describes
    pub generation: u64,
}

impl TaskStatus {
    pub fn is_active(&self) -> bool {
        self.active_task.is_some()
    }

    /// Whether an export is streaming (enables pause, disables start)
    pub fn is_exporting(&self) -> bool {
        self.active_kind == Some(TaskKind::Export)
    }
}

struct MonitorState {
    worker: WorkerHandle,
    status: TaskStatus,
    active: Option<Arc<dyn Task>>,
}

struct MonitorInner {
    state: Mutex<MonitorState>,
    events: EventBus,
}

/// Tracks the active task on the compute worker
#[derive(Clone)]
pub struct TaskMonitor {
    inner: Arc<MonitorInner>,
}

impl TaskMonitor {
    pub fn new(worker: WorkerHandle, events: EventBus) -> Self {
        let status = TaskStatus {
            generation: worker.generation(),
            ..Default::default()
        };
        Self {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(MonitorState {
                    worker,
                    status,
                    active: None,
                }),
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Snapshot of the published status
    pub fn status(&self) -> TaskStatus {
        self.lock().status.clone()
    }

    /// The task currently bound to the compute worker
    pub fn active_task(&self) -> Option<Arc<dyn Task>> {
        self.lock().active.clone()
    }

    pub fn is_exporting(&self) -> bool {
        self.lock().status.is_exporting()
    }

    pub fn worker_generation(&self) -> u64 {
        self.lock().worker.generation()
    }

    /// Submit a task to the compute worker and make it the active task
    ///
    /// The caller is responsible for cancelling whatever was active before.
    pub fn queue_task(&self, task: Arc<dyn Task>) -> Result<()> {
        let task_id = task.id();
        let title = task.title();

        let (submitted, generation, status) = {
            let mut state = self.lock();
            let generation = state.worker.generation();
            state.active = Some(task.clone());
            state.status = TaskStatus {
                title: title.clone(),
                message: "Queued".to_string(),
                progress: 0.0,
                error: None,
                active_task: Some(task_id),
                active_kind: Some(task.kind()),
                generation,
            };

            let monitor = self.clone();
            let job: Job = Box::new(move |worker: &WorkerContext| {
                monitor.run_task(task, worker, generation);
            });
            let submitted = state.worker.submit(job);
            (submitted, generation, state.status.clone())
        };

        self.inner.events.publish(AppEvent::Status(status));

        match submitted {
            Ok(()) => {
                tracing::info!("Queued task {} '{}'", task_id, title);
                Ok(())
            }
            Err(e) => {
                self.complete(
                    generation,
                    task_id,
                    Err(DrawbotError::Worker(e.to_string())),
                );
                Err(e)
            }
        }
    }

    fn run_task(&self, task: Arc<dyn Task>, worker: &WorkerContext, generation: u64) {
        let task_id = task.id();
        let ctx = TaskContext {
            worker: worker.clone(),
            monitor: self.clone(),
            generation,
            task_id,
        };
        let mut guard = CompletionGuard {
            monitor: self,
            generation,
            task_id,
            armed: true,
        };

        ctx.update_message("Running");
        let result = task.run(&ctx);
        guard.armed = false;
        self.complete(generation, task_id, result);
    }

    /// Rebind to a freshly created compute worker
    ///
    /// Clears the active task and resets the published status in one step.
    pub fn reset_monitor(&self, worker: WorkerHandle) {
        let status = {
            let mut state = self.lock();
            if let Some(task) = state.active.take() {
                task.cancel();
            }
            state.status = TaskStatus {
                generation: worker.generation(),
                ..Default::default()
            };
            state.worker = worker;
            state.status.clone()
        };
        tracing::info!("Task monitor rebound to generation {}", status.generation);
        self.inner.events.publish(AppEvent::Status(status));
    }

    /// Apply a status change on behalf of a running task
    fn update(&self, generation: u64, task_id: TaskId, f: impl FnOnce(&mut TaskStatus) -> bool) {
        let status = {
            let mut state = self.lock();
            if !is_current(&state, generation, task_id) {
                return;
            }
            if !f(&mut state.status) {
                return;
            }
            state.status.clone()
        };
        self.inner.events.publish(AppEvent::Status(status));
    }

    fn complete(&self, generation: u64, task_id: TaskId, result: Result<TaskOutcome>) {
        match &result {
            Ok(outcome) => tracing::info!("Task {} ended: {:?}", task_id, outcome),
            Err(e) if e.is_cancelled() => tracing::info!("Task {} cancelled", task_id),
            Err(e) => tracing::error!("Task {} failed: {}", task_id, e),
        }

        let (status, failure) = {
            let mut state = self.lock();
            if !is_current(&state, generation, task_id) {
                tracing::debug!("Ignoring completion of superseded task {}", task_id);
                return;
            }
            state.active = None;
            let status = &mut state.status;
            status.active_task = None;
            status.active_kind = None;

            let mut failure = None;
            match result {
                Ok(TaskOutcome::Completed) => {
                    status.progress = 1.0;
                    status.message = "Finished".to_string();
                }
                Ok(TaskOutcome::Stopped) => status.message = "Stopped".to_string(),
                Ok(TaskOutcome::Cancelled) => status.message = "Cancelled".to_string(),
                Err(e) if e.is_cancelled() => status.message = "Cancelled".to_string(),
                Err(e) => {
                    let message = e.to_string();
                    status.message = message.clone();
                    status.error = Some(message.clone());
                    failure = Some(message);
                }
            }
            (status.clone(), failure)
        };

        if let Some(error) = failure {
            self.inner
                .events
                .publish(AppEvent::TaskFailed { task_id, error });
        }
        self.inner.events.publish(AppEvent::Status(status));
    }
}

fn is_current(state: &MonitorState, generation: u64, task_id: TaskId) -> bool {
    state.worker.generation() == generation && state.status.active_task == Some(task_id)
}

/// Reports completion if a task unwinds out of `run`
struct CompletionGuard<'a> {
    monitor: &'a TaskMonitor,
    generation: u64,
    task_id: TaskId,
    armed: bool,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.monitor.complete(
                self.generation,
                self.task_id,
                Err(DrawbotError::Worker(format!(
                    "task {} panicked",
                    self.task_id
                ))),
            );
        }
    }
}

/// A running task's view of its worker and monitor
pub struct TaskContext {
    worker: WorkerContext,
    monitor: TaskMonitor,
    generation: u64,
    task_id: TaskId,
}

impl TaskContext {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Whether the worker running this task has been hard-stopped
    pub fn is_interrupted(&self) -> bool {
        self.worker.is_interrupted()
    }

    pub fn events(&self) -> &EventBus {
        self.monitor.events()
    }

    /// Publish progress, clamped to `0.0..=1.0`
    pub fn update_progress(&self, progress: f64) {
        let progress = progress.clamp(0.0, 1.0);
        self.monitor
            .update(self.generation, self.task_id, |status| {
                let changed = (progress - status.progress).abs() >= PROGRESS_PUBLISH_STEP
                    || (progress >= 1.0 && status.progress < 1.0);
                status.progress = progress;
                changed
            });
    }

    pub fn update_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.monitor.update(self.generation, self.task_id, |status| {
            if status.message == message {
                return false;
            }
            status.message = message;
            true
        });
    }

    pub fn update_title(&self, title: impl Into<String>) {
        let title = title.into();
        self.monitor.update(self.generation, self.task_id, |status| {
            if status.title == title {
                return false;
            }
            status.title = title;
            true
        });
    }
}
