//! Publish/subscribe notifications from workers to the UI context
//!
//! Workers never touch UI state. Everything a display needs to know
//! (stage transitions, progress, failures, device lists) is published as an
//! [`AppEvent`] on the [`EventBus`]; each subscriber gets its own channel and
//! drains it on its own schedule.

use crate::device::DetectedDevice;
use crate::tasks::pool::WorkerFault;
use crate::tasks::stage::{TaskStage, UiIntent};
use crate::tasks::{TaskId, TaskStatus};
use crate::types::Raster;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// State-change notification published to subscribers
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A plotting task completed a stage
    StageFinished {
        task_id: TaskId,
        stage: TaskStage,
        /// What the display should do in response, if anything
        intent: Option<UiIntent>,
    },
    /// Task monitor status changed (title, message, progress, error)
    Status(TaskStatus),
    /// A task failed; the error is also present in the next status
    TaskFailed { task_id: TaskId, error: String },
    /// A new source image finished loading
    ImageLoaded {
        path: Option<PathBuf>,
        width: u32,
        height: u32,
    },
    /// The image-filter preview was recomputed
    FilterPreview(Arc<Raster>),
    /// Result of a device enumeration
    DeviceList(Vec<DetectedDevice>),
    /// Manual jog mode was entered (`true`) or left (`false`)
    ManualMode(bool),
    /// Streaming progress of an export task
    ExportProgress {
        task_id: TaskId,
        delivered: usize,
        total: usize,
        progress: f64,
    },
    /// A worker thread died from an uncaught fault
    WorkerFault(WorkerFault),
}

/// Fan-out notification queue
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<AppEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Receiver<AppEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Deliver an event to every live subscriber
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub fn publish(&self, event: AppEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Receive all pending events without blocking
pub fn drain(receiver: &Receiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
