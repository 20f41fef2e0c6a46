//! Units of work and the workers that run them
//!
//! Long-running work (plotting an image, streaming an export, loading an
//! image) is packaged as a [`Task`] and handed to the [`TaskMonitor`], which
//! runs it on the compute worker of the [`WorkerPool`] and publishes its
//! progress.
//!
//! # Components
//!
//! - [`pool`] - Three single-thread workers: compute, background and image filtering
//! - [`monitor`] - Tracks the active task and publishes its status
//! - [`stage`] - Plotting stage enum and the pure stage-finished handler
//! - [`plotting`] - The plotting task state machine
//! - [`split`] - Colour separation for split plotting tasks
//! - [`export`] - Pausable streaming of a finished drawing to a sink
//! - [`image_load`] - Decoding a source image off the UI thread
//!
//! # Cancellation
//!
//! Cancellation is cooperative: tasks poll their own flags and
//! [`TaskContext::is_interrupted`] at safe points. The only forced path is
//! [`WorkerPool::reset_compute`], which interrupts the compute worker,
//! discards its queue and installs a fresh worker.

pub mod export;
pub mod image_load;
pub mod monitor;
pub mod plotting;
pub mod pool;
pub mod split;
pub mod stage;

pub use export::{ExportRequest, ExportSink, ExportTask};
pub use image_load::{ImageLoadTask, LoadedImage};
pub use monitor::{TaskContext, TaskMonitor, TaskStatus};
pub use plotting::{LayerCounts, LiveCounts, PlottingRequest, PlottingTask};
pub use pool::{Worker, WorkerContext, WorkerFault, WorkerHandle, WorkerKind, WorkerPool};
pub use split::ColourSplitter;
pub use stage::{on_stage_finished, StageSnapshot, TaskStage, UiIntent};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Plotting,
    Export,
    ImageLoad,
}

/// How a task's run ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ran to the end
    Completed,
    /// Stopped gracefully at a boundary, keeping a partial result
    Stopped,
    /// Abandoned; any result was discarded
    Cancelled,
}

/// A unit of work that runs on the compute worker
pub trait Task: Send + Sync {
    fn id(&self) -> TaskId;

    fn kind(&self) -> TaskKind;

    /// Title shown while the task is active
    fn title(&self) -> String;

    /// Execute the task, blocking the worker for its full duration
    fn run(&self, ctx: &TaskContext) -> Result<TaskOutcome>;

    /// Request unconditional abandonment
    fn cancel(&self);
}

/// Cooperative cancellation flags shared between a task and its owner
#[derive(Debug, Default)]
pub struct TaskSignals {
    cancelled: AtomicBool,
    stop_requested: AtomicBool,
}

impl TaskSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_signals_are_independent() {
        let signals = TaskSignals::new();
        signals.request_stop();
        assert!(signals.is_stop_requested());
        assert!(!signals.is_cancelled());
        signals.cancel();
        assert!(signals.is_cancelled());
    }
}
