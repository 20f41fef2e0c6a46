//! Single-thread worker contexts
//!
//! Each [`Worker`] owns one named OS thread that runs submitted jobs one at
//! a time, in submission order. The [`WorkerPool`] keeps three of them apart
//! so a multi-minute plot never delays an image-filter preview, and
//! background chores (device enumeration, manual jog writes) never starve
//! plotting or export.
//!
//! # Faults
//!
//! A job that panics is caught at the worker boundary, logged, and
//! published as [`AppEvent::WorkerFault`]. From that point submissions
//! fail, and the worker thread exits; only a pool reset replaces it.
//!
//! # Reset
//!
//! [`WorkerPool::reset_compute`] is the emergency path. It flags the current
//! compute worker as interrupted (jobs still queued are discarded, the
//! in-flight job sees [`WorkerContext::is_interrupted`]), detaches its
//! thread instead of waiting for it, and installs a fresh worker with a new
//! generation number.

use crate::error::{DrawbotError, Result};
use crate::events::{AppEvent, EventBus};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of work submitted to a worker
pub type Job = Box<dyn FnOnce(&WorkerContext) + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// The three workers of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// Plotting, export and image loading
    Compute,
    /// Device enumeration, manual jog writes and other chores
    Background,
    /// Image-filter preview recomputation
    ImageFiltering,
}

impl WorkerKind {
    pub fn thread_name(self) -> &'static str {
        match self {
            WorkerKind::Compute => "drawbot-task",
            WorkerKind::Background => "drawbot-background",
            WorkerKind::ImageFiltering => "drawbot-image-filtering",
        }
    }
}

/// Report of a worker thread that died from a panic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFault {
    pub worker: String,
    pub generation: u64,
    pub message: String,
}

/// View of the worker given to each running job
#[derive(Debug, Clone)]
pub struct WorkerContext {
    name: Arc<str>,
    generation: u64,
    interrupted: Arc<AtomicBool>,
}

impl WorkerContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the worker has been hard-stopped
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// Cloneable submission handle for a worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    kind: WorkerKind,
    generation: u64,
    sender: Sender<Message>,
    interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Run(_) => f.write_str("Run(..)"),
            Message::Stop => f.write_str("Stop"),
        }
    }
}

impl WorkerHandle {
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Queue a job behind everything already submitted
    pub fn submit(&self, job: Job) -> Result<()> {
        if self.is_interrupted() {
            return Err(DrawbotError::Worker(format!(
                "{} (generation {}) is no longer accepting work",
                self.kind.thread_name(),
                self.generation
            )));
        }
        self.sender.send(Message::Run(job)).map_err(|_| {
            DrawbotError::Worker(format!(
                "{} is no longer accepting work",
                self.kind.thread_name()
            ))
        })
    }
}

/// A single-thread FIFO executor
pub struct Worker {
    handle: WorkerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker thread
    pub fn spawn(kind: WorkerKind, generation: u64, events: EventBus) -> Result<Self> {
        let (tx, rx) = unbounded();
        let interrupted = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            name: Arc::from(kind.thread_name()),
            generation,
            interrupted: interrupted.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || worker_loop(ctx, rx, events))?;

        Ok(Self {
            handle: WorkerHandle {
                kind,
                generation,
                sender: tx,
                interrupted,
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        self.handle.submit(job)
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Let queued jobs finish, then stop and join the thread
    pub fn shutdown(mut self) {
        let _ = self.handle.sender.send(Message::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("{} panicked during shutdown", self.handle.kind.thread_name());
            }
        }
    }

    /// Interrupt the worker and discard it without waiting
    ///
    /// Queued jobs are dropped unrun. The in-flight job keeps running
    /// until it next observes the interrupt; its thread is detached.
    pub fn shutdown_now(mut self) {
        self.handle.interrupted.store(true, Ordering::SeqCst);
        let _ = self.handle.sender.send(Message::Stop);
        if self.thread.take().is_some() {
            tracing::warn!(
                "{} (generation {}) interrupted and detached",
                self.handle.kind.thread_name(),
                self.handle.generation
            );
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.handle.sender.send(Message::Stop);
        }
    }
}

fn worker_loop(ctx: WorkerContext, jobs: Receiver<Message>, events: EventBus) {
    tracing::info!("{} (generation {}) started", ctx.name(), ctx.generation());

    while let Ok(message) = jobs.recv() {
        if ctx.is_interrupted() {
            break;
        }
        let job = match message {
            Message::Run(job) => job,
            Message::Stop => break,
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
            let message = panic_message(payload.as_ref());
            tracing::error!("Thread fault in {}: {}", ctx.name(), message);
            // Refuse submissions before anyone can observe the fault
            ctx.interrupted.store(true, Ordering::SeqCst);
            events.publish(AppEvent::WorkerFault(WorkerFault {
                worker: ctx.name().to_string(),
                generation: ctx.generation(),
                message,
            }));
            break;
        }
    }

    tracing::info!("{} (generation {}) stopped", ctx.name(), ctx.generation());
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The three workers of the application
pub struct WorkerPool {
    compute: Worker,
    background: Worker,
    image_filtering: Worker,
    compute_generation: u64,
    events: EventBus,
}

impl WorkerPool {
    /// Start all three workers
    pub fn new(events: EventBus) -> Result<Self> {
        Ok(Self {
            compute: Worker::spawn(WorkerKind::Compute, 0, events.clone())?,
            background: Worker::spawn(WorkerKind::Background, 0, events.clone())?,
            image_filtering: Worker::spawn(WorkerKind::ImageFiltering, 0, events.clone())?,
            compute_generation: 0,
            events,
        })
    }

    fn worker(&self, kind: WorkerKind) -> &Worker {
        match kind {
            WorkerKind::Compute => &self.compute,
            WorkerKind::Background => &self.background,
            WorkerKind::ImageFiltering => &self.image_filtering,
        }
    }

    pub fn handle(&self, kind: WorkerKind) -> WorkerHandle {
        self.worker(kind).handle()
    }

    pub fn submit(&self, kind: WorkerKind, job: Job) -> Result<()> {
        self.worker(kind).submit(job)
    }

    pub fn compute_generation(&self) -> u64 {
        self.compute_generation
    }

    /// Hard-stop the compute worker and install a fresh one
    ///
    /// Returns the handle of the new worker, which accepts work immediately.
    pub fn reset_compute(&mut self) -> Result<WorkerHandle> {
        let generation = self.compute_generation + 1;
        let fresh = Worker::spawn(WorkerKind::Compute, generation, self.events.clone())?;
        let old = std::mem::replace(&mut self.compute, fresh);
        old.shutdown_now();
        self.compute_generation = generation;
        tracing::info!("Compute worker reset (generation {})", generation);
        Ok(self.compute.handle())
    }

    /// Stop all workers, letting queued jobs finish
    pub fn shutdown(self) {
        self.image_filtering.shutdown();
        self.background.shutdown();
        self.compute.shutdown();
    }
}
