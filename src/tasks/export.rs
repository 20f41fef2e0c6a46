//! Pausable export of a finished drawing
//!
//! An [`ExportTask`] compiles a drawing into G-code and streams it, one line
//! at a time, to a file or to the selected device's [`CommandBuilder`].
//!
//! # Pause and Resume
//!
//! [`ExportTask::pause`] takes effect after the line currently being written;
//! the stream then waits without releasing the device. [`ExportTask::resume`]
//! continues from the first undelivered line, so nothing is sent twice.
//! Progress is a monotonic fraction readable at any time.
//!
//! # Failure
//!
//! A write error aborts the export and is reported through the task monitor.
//! There is no retry: after a partial write the physical state of the device
//! is unknown and must be checked by the operator. The device stays open.

use crate::device::{CommandBuilder, CompileOptions, FileChannel, GCodeCompiler, GeometryFilter, Program};
use crate::error::{DrawbotError, Result};
use crate::events::AppEvent;
use crate::tasks::{Task, TaskContext, TaskId, TaskKind, TaskOutcome};
use crate::types::{PenSet, PlottedDrawing};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How often a paused stream re-checks cancellation
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Where an export goes
#[derive(Clone)]
pub enum ExportSink {
    /// A G-code file; with separate pens, one file per pen next to it
    File(PathBuf),
    /// The selected device
    Device(Arc<CommandBuilder>),
}

impl std::fmt::Debug for ExportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportSink::File(path) => f.debug_tuple("File").field(path).finish(),
            ExportSink::Device(builder) => f.debug_tuple("Device").field(&builder.device()).finish(),
        }
    }
}

impl ExportSink {
    /// Display name of the sink
    pub fn name(&self) -> String {
        match self {
            ExportSink::File(path) => path.display().to_string(),
            ExportSink::Device(builder) => builder.device().to_string(),
        }
    }
}

/// Everything an export task consumes
#[derive(Clone)]
pub struct ExportRequest {
    pub drawing: Arc<PlottedDrawing>,
    pub pens: PenSet,
    pub filter: Arc<dyn GeometryFilter>,
    pub compiler: GCodeCompiler,
    pub sink: ExportSink,
    pub separate_pens: bool,
    pub bypass_optimisation: bool,
}

/// File written for one pen of a separate-pens export
///
/// `drawing.gcode` with pen 2 named `Red` becomes `drawing_pen2_Red.gcode`.
pub fn pen_file_path(base: &Path, pen: usize, pen_name: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    let extension = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gcode".to_string());
    let name: String = pen_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    base.with_file_name(format!("{}_pen{}_{}.{}", stem, pen, name, extension))
}

/// One program and where it is written
struct Target {
    program: Program,
    path: Option<PathBuf>,
}

struct PauseState {
    paused: bool,
}

/// Streams a compiled drawing to a sink
pub struct ExportTask {
    id: TaskId,
    request: ExportRequest,
    pause: Mutex<PauseState>,
    resumed: Condvar,
    cancelled: AtomicBool,
    done: AtomicBool,
    /// Progress fraction stored as `f64` bits
    progress: AtomicU64,
    delivered: AtomicUsize,
    total: AtomicUsize,
    outputs: Mutex<Vec<PathBuf>>,
    error: Mutex<Option<String>>,
}

impl ExportTask {
    pub fn new(request: ExportRequest) -> Self {
        Self {
            id: TaskId::next(),
            request,
            pause: Mutex::new(PauseState { paused: false }),
            resumed: Condvar::new(),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            progress: AtomicU64::new(0f64.to_bits()),
            delivered: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            outputs: Mutex::new(Vec::new()),
            error: Mutex::new(None),
        }
    }

    fn lock_pause(&self) -> MutexGuard<'_, PauseState> {
        self.pause.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn sink(&self) -> &ExportSink {
        &self.request.sink
    }

    /// Suspend after the line currently being written
    pub fn pause(&self) {
        let mut state = self.lock_pause();
        if !state.paused {
            state.paused = true;
            tracing::info!("Export {} paused at {}", self.id, self.delivered());
        }
    }

    /// Continue from the first undelivered line
    pub fn resume(&self) {
        let mut state = self.lock_pause();
        if state.paused {
            state.paused = false;
            tracing::info!("Export {} resumed at {}", self.id, self.delivered());
        }
        drop(state);
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.lock_pause().paused
    }

    /// Abort at the next line boundary, waking a paused stream
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the task has finished running, whatever the outcome
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Fraction of lines delivered, never decreasing
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::SeqCst))
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Number of lines to deliver, known once compilation is done
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Files written by a file export
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Failure message once a failed export is done
    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn advance_progress(&self, progress: f64) {
        let mut current = self.progress.load(Ordering::SeqCst);
        while f64::from_bits(current) < progress {
            match self.progress.compare_exchange_weak(
                current,
                progress.to_bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn should_abort(&self, ctx: &TaskContext) -> bool {
        self.is_cancelled() || ctx.is_interrupted()
    }

    /// Block while paused; false if the export must abort
    fn wait_while_paused(&self, ctx: &TaskContext) -> bool {
        let mut state = self.lock_pause();
        while state.paused {
            if self.should_abort(ctx) {
                return false;
            }
            state = self
                .resumed
                .wait_timeout(state, PAUSE_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        !self.should_abort(ctx)
    }

    fn compile(&self) -> Vec<Target> {
        let request = &self.request;
        let options = CompileOptions {
            bypass_optimisation: request.bypass_optimisation,
            pause_between_pens: request.separate_pens
                && matches!(request.sink, ExportSink::Device(_)),
        };

        match (&request.sink, request.separate_pens) {
            (ExportSink::File(base), true) => request
                .compiler
                .compile_per_pen(&request.drawing, &request.pens, request.filter.as_ref(), options)
                .into_iter()
                .map(|program| {
                    let pen = program.pen.unwrap_or(0);
                    let name = program.pen_name.clone().unwrap_or_default();
                    Target {
                        path: Some(pen_file_path(base, pen, &name)),
                        program,
                    }
                })
                .collect(),
            (sink, _) => {
                let program = request.compiler.compile(
                    &request.drawing,
                    &request.pens,
                    request.filter.as_ref(),
                    options,
                );
                let path = match sink {
                    ExportSink::File(path) => Some(path.clone()),
                    ExportSink::Device(_) => None,
                };
                vec![Target { program, path }]
            }
        }
    }

    fn stream(&self, ctx: &TaskContext, targets: Vec<Target>) -> Result<TaskOutcome> {
        let total = self.total();
        let mut last_percent = None;

        for target in targets {
            let builder = match (&target.path, &self.request.sink) {
                (Some(path), _) => Arc::new(CommandBuilder::new(Box::new(FileChannel::create(path)?))),
                (None, ExportSink::Device(builder)) => builder.clone(),
                (None, ExportSink::File(path)) => {
                    return Err(DrawbotError::Export(format!(
                        "no output file for {}",
                        path.display()
                    )))
                }
            };
            ctx.update_message(format!("Streaming to {}", builder.device()));

            for line in &target.program.lines {
                if !self.wait_while_paused(ctx) {
                    return Ok(TaskOutcome::Cancelled);
                }
                let abort = || self.should_abort(ctx);
                match builder.stream_line(line, &abort) {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => return Ok(TaskOutcome::Cancelled),
                    Err(e) => {
                        return Err(e.with_context(format!(
                            "export to {} failed at line {}",
                            builder.device(),
                            self.delivered() + 1
                        )))
                    }
                }

                let delivered = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
                let progress = delivered as f64 / total.max(1) as f64;
                self.advance_progress(progress);
                ctx.update_progress(progress);

                let percent = (progress * 100.0) as u32;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    ctx.events().publish(AppEvent::ExportProgress {
                        task_id: self.id,
                        delivered,
                        total,
                        progress,
                    });
                }
            }

            builder.flush()?;
            if let Some(path) = target.path {
                builder.close()?;
                tracing::info!("Wrote {}", path.display());
                self.outputs
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(path);
            }
        }
        Ok(TaskOutcome::Completed)
    }
}

impl Task for ExportTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Export
    }

    fn title(&self) -> String {
        format!("Exporting to {}", self.request.sink.name())
    }

    fn run(&self, ctx: &TaskContext) -> Result<TaskOutcome> {
        struct DoneGuard<'a>(&'a AtomicBool);
        impl Drop for DoneGuard<'_> {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }
        let _done = DoneGuard(&self.done);

        if self.should_abort(ctx) {
            return Ok(TaskOutcome::Cancelled);
        }

        ctx.update_message("Compiling G-code");
        let targets = self.compile();
        let total: usize = targets.iter().map(|t| t.program.len()).sum();
        self.total.store(total, Ordering::SeqCst);
        tracing::info!(
            "Export {}: {} lines in {} program(s) to {}",
            self.id,
            total,
            targets.len(),
            self.request.sink.name()
        );

        let outcome = self.stream(ctx, targets).map_err(|e| {
            *self.error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
            e
        })?;
        if outcome == TaskOutcome::Completed {
            self.advance_progress(1.0);
        }
        Ok(outcome)
    }

    fn cancel(&self) {
        ExportTask::cancel(self);
    }
}
