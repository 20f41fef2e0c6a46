//! Application context
//!
//! [`AppContext`] is constructed once at startup and owns every service:
//! the worker pool, the task monitor, the event bus, the current image and
//! drawing state, and the selected device. UI and CLI code call its
//! operations and learn about results through [`AppEvent`]s; no operation
//! blocks on a long-running task.
//!
//! # Example
//!
//! ```ignore
//! use drawbot_rs::app::AppContext;
//! use drawbot_rs::config::AppConfig;
//!
//! let app = AppContext::new(AppConfig::load_or_default())?;
//! let events = app.subscribe();
//!
//! app.open_image("portrait.pgm")?;
//! // ... wait for AppEvent::ImageLoaded
//! let task = app.start_plotting()?;
//! // ... wait for AppEvent::StageFinished { stage: TaskStage::Finished, .. }
//! app.shutdown();
//! ```

use crate::config::AppConfig;
use crate::device::{
    list_devices, open_device, CommandBuilder, DeviceChannel, GCodeCompiler, GeometryFilter,
    JogController,
};
use crate::error::{DrawbotError, Result};
use crate::events::{AppEvent, EventBus};
use crate::filters::{apply_all, ImageFilter};
use crate::pathfind::{PathFinder, ScanlinePathFinder};
use crate::tasks::pool::{Job, WorkerContext};
use crate::tasks::{
    ColourSplitter, ExportRequest, ExportSink, ExportTask, ImageLoadTask, LoadedImage,
    PlottingRequest, PlottingTask, TaskId, TaskMonitor, TaskStage, TaskStatus, WorkerKind, WorkerPool,
};
use crate::types::{PenSet, PlottedDrawing, Raster};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Live figures of the active plotting task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlottingStats {
    pub task_id: TaskId,
    pub stage: TaskStage,
    /// Aggregated over all layers for split tasks
    pub geometry_count: usize,
    pub vertex_count: u64,
    pub elapsed: Duration,
}

struct AppState {
    config: AppConfig,
    image: Option<Arc<Raster>>,
    image_path: Option<PathBuf>,
    filtered: Option<Arc<Raster>>,
    path_finder: Arc<dyn PathFinder>,
    plotting_task: Option<Arc<PlottingTask>>,
    image_load: Option<Arc<ImageLoadTask>>,
    export_task: Option<Arc<ExportTask>>,
    builder: Option<Arc<CommandBuilder>>,
    jog: Option<Arc<JogController>>,
    /// Manual sessions requested through the context and not yet exited
    manual_requests: usize,
}

impl AppState {
    /// Cancel the plotting task and drop its drawing before anything replaces it
    fn release_plotting_task(&mut self) {
        if let Some(task) = self.plotting_task.take() {
            task.cancel();
            task.reset();
            tracing::debug!("Released plotting task {}", task.id());
        }
    }

    /// Install an image decoded by `loaded.task_id`
    ///
    /// Refused unless that load is still the current one and uncancelled.
    fn install_loaded(&mut self, loaded: LoadedImage) -> bool {
        let current = self
            .image_load
            .as_ref()
            .is_some_and(|load| load.id() == loaded.task_id && !load.is_cancelled());
        if !current {
            return false;
        }
        self.image_load = None;
        self.image = Some(loaded.raster);
        self.image_path = Some(loaded.path);
        self.filtered = None;
        true
    }

    fn release_device(&mut self) {
        self.manual_requests = 0;
        if let Some(jog) = self.jog.take() {
            if let Err(e) = jog.release() {
                tracing::warn!("Failed to release jog: {}", e);
            }
        }
        if let Some(builder) = self.builder.take() {
            if let Err(e) = builder.close() {
                tracing::warn!("Failed to close {}: {}", builder.device(), e);
            }
        }
    }
}

/// Owner of all application services and state
pub struct AppContext {
    pool: Mutex<WorkerPool>,
    monitor: TaskMonitor,
    events: EventBus,
    state: Arc<Mutex<AppState>>,
    preview_generation: Arc<AtomicU64>,
}

impl AppContext {
    /// Start the workers and set up state from `config`
    pub fn new(config: AppConfig) -> Result<Self> {
        let events = EventBus::new();
        let pool = WorkerPool::new(events.clone())?;
        let monitor = TaskMonitor::new(pool.handle(WorkerKind::Compute), events.clone());
        let path_finder: Arc<dyn PathFinder> = Arc::new(ScanlinePathFinder::new(
            config.plotting.threshold,
            config.plotting.row_step,
        ));

        tracing::info!("Application context started");
        Ok(Self {
            pool: Mutex::new(pool),
            monitor,
            events,
            state: Arc::new(Mutex::new(AppState {
                config,
                image: None,
                image_path: None,
                filtered: None,
                path_finder,
                plotting_task: None,
                image_load: None,
                export_task: None,
                builder: None,
                jog: None,
                manual_requests: 0,
            })),
            preview_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pool(&self) -> MutexGuard<'_, WorkerPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ==================== Events & Status ====================

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// New subscription to every [`AppEvent`]
    pub fn subscribe(&self) -> Receiver<AppEvent> {
        self.events.subscribe()
    }

    pub fn monitor(&self) -> &TaskMonitor {
        &self.monitor
    }

    pub fn status(&self) -> TaskStatus {
        self.monitor.status()
    }

    // ==================== Configuration ====================

    pub fn config(&self) -> AppConfig {
        self.lock().config.clone()
    }

    /// Replace the configuration
    ///
    /// The path finder is rebuilt from it, and the jog controller is
    /// recreated on next use so new jog settings apply.
    pub fn set_config(&self, config: AppConfig) {
        let mut state = self.lock();
        state.path_finder = Arc::new(ScanlinePathFinder::new(
            config.plotting.threshold,
            config.plotting.row_step,
        ));
        state.config = config;
        if let Some(jog) = state.jog.take() {
            if let Err(e) = jog.release() {
                tracing::warn!("Failed to release jog: {}", e);
            }
        }
    }

    pub fn set_path_finder(&self, path_finder: Arc<dyn PathFinder>) {
        tracing::info!("Path finder set to {}", path_finder.name());
        self.lock().path_finder = path_finder;
    }

    pub fn set_pens(&self, pens: PenSet) {
        self.lock().config.pens = pens;
    }

    pub fn set_splitter(&self, splitter: ColourSplitter) {
        self.lock().config.plotting.splitter = splitter;
    }

    /// Pens a new plotting task would use
    pub fn pens(&self) -> PenSet {
        let state = self.lock();
        state
            .config
            .plotting
            .splitter
            .pen_set()
            .unwrap_or_else(|| state.config.pens.clone())
    }

    // ==================== Image ====================

    /// The current source image
    pub fn image(&self) -> Option<Arc<Raster>> {
        self.lock().image.clone()
    }

    /// The filtered preview, if filters have been applied
    pub fn filtered_image(&self) -> Option<Arc<Raster>> {
        self.lock().filtered.clone()
    }

    /// Use an already decoded image, superseding any plotting task
    pub fn set_image(&self, image: Raster, path: Option<PathBuf>) {
        let (width, height) = (image.width(), image.height());
        {
            let mut state = self.lock();
            state.release_plotting_task();
            if let Some(load) = state.image_load.take() {
                load.cancel();
            }
            state.image = Some(Arc::new(image));
            state.image_path = path.clone();
            state.filtered = None;
        }
        self.preview_generation.fetch_add(1, Ordering::SeqCst);
        self.events
            .publish(AppEvent::ImageLoaded { path, width, height });
    }

    /// Decode `path` on the compute worker and make it the current image
    ///
    /// The active plotting task is cancelled and the current image cleared
    /// first. Completion is announced with [`AppEvent::ImageLoaded`].
    pub fn open_image(&self, path: impl AsRef<Path>) -> Result<TaskId> {
        let path = path.as_ref().to_path_buf();
        let state_ref = Arc::downgrade(&self.state);
        let generation = self.preview_generation.clone();
        let task = Arc::new(ImageLoadTask::new(&path, move |loaded| {
            let Some(state) = state_ref.upgrade() else {
                return false;
            };
            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if !state.install_loaded(loaded) {
                return false;
            }
            generation.fetch_add(1, Ordering::SeqCst);
            true
        }));

        {
            let mut state = self.lock();
            state.release_plotting_task();
            if let Some(previous) = state.image_load.replace(task.clone()) {
                previous.cancel();
            }
            state.image = None;
            state.image_path = None;
            state.filtered = None;
        }
        self.preview_generation.fetch_add(1, Ordering::SeqCst);

        let id = task.id();
        tracing::info!("Opening image {}", path.display());
        if let Err(e) = self.monitor.queue_task(task) {
            let mut state = self.lock();
            if state.image_load.as_ref().is_some_and(|load| load.id() == id) {
                state.image_load = None;
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Recompute the filtered preview on the image-filtering worker
    ///
    /// A result is dropped if the image or the filters changed meanwhile.
    pub fn update_filter_preview(&self, filters: Vec<Arc<dyn ImageFilter>>) -> Result<()> {
        let image = self
            .image()
            .ok_or_else(|| DrawbotError::Image("no image loaded".to_string()))?;
        let generation = self.preview_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.preview_generation.clone();
        let state_ref = Arc::downgrade(&self.state);
        let events = self.events.clone();

        let job: Job = Box::new(move |_: &WorkerContext| {
            let filtered = Arc::new(apply_all(&filters, &image));
            if current.load(Ordering::SeqCst) != generation {
                tracing::debug!("Discarding stale filter preview {}", generation);
                return;
            }
            if let Some(state) = state_ref.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .filtered = Some(filtered.clone());
            }
            events.publish(AppEvent::FilterPreview(filtered));
        });
        self.pool().submit(WorkerKind::ImageFiltering, job)
    }

    // ==================== Plotting ====================

    /// Cancel any active plotting task and queue a new one
    ///
    /// Uses the filtered image when present, otherwise the source image.
    pub fn start_plotting(&self) -> Result<Arc<PlottingTask>> {
        let task = {
            let mut state = self.lock();
            state.release_plotting_task();

            let image = state
                .filtered
                .clone()
                .or_else(|| state.image.clone())
                .ok_or_else(|| DrawbotError::Image("no image loaded".to_string()))?;
            let splitter = state.config.plotting.splitter;
            let pens = splitter
                .pen_set()
                .unwrap_or_else(|| state.config.pens.clone());

            let mut request = PlottingRequest::new(image, state.path_finder.clone())
                .with_pens(pens)
                .with_splitter(splitter);
            request.source = state.image_path.clone();

            let task = Arc::new(PlottingTask::new(request));
            state.plotting_task = Some(task.clone());
            task
        };

        if let Err(e) = self.monitor.queue_task(task.clone()) {
            let mut state = self.lock();
            if state.plotting_task.as_ref().is_some_and(|t| t.id() == task.id()) {
                state.release_plotting_task();
            }
            return Err(e);
        }
        Ok(task)
    }

    /// Ask the active plotting task to stop at its next stage boundary
    pub fn stop_plotting(&self) {
        if let Some(task) = self.lock().plotting_task.clone() {
            task.stop_elegantly();
        }
    }

    /// Hard-stop the compute worker and clear the active task
    ///
    /// The export task, if any, is cancelled too since it ran on the same
    /// worker. The fresh worker accepts work as soon as this returns.
    pub fn reset_plotting(&self) -> Result<()> {
        let fresh = self.pool().reset_compute()?;
        self.monitor.reset_monitor(fresh);

        let mut state = self.lock();
        state.release_plotting_task();
        if let Some(export) = state.export_task.take() {
            export.cancel();
        }
        if let Some(load) = state.image_load.take() {
            load.cancel();
        }
        tracing::warn!("Plotting reset");
        Ok(())
    }

    /// The current plotting task
    pub fn plotting_task(&self) -> Option<Arc<PlottingTask>> {
        self.lock().plotting_task.clone()
    }

    /// The drawing of the current plotting task, once finished or stopped
    pub fn drawing(&self) -> Option<Arc<PlottedDrawing>> {
        self.plotting_task().and_then(|task| task.drawing())
    }

    /// Live counts of the current plotting task
    pub fn plotting_stats(&self) -> Option<PlottingStats> {
        self.plotting_task().map(|task| PlottingStats {
            task_id: task.id(),
            stage: task.stage(),
            geometry_count: task.geometry_count(),
            vertex_count: task.vertex_count(),
            elapsed: task.elapsed(),
        })
    }

    // ==================== Export ====================

    /// Sink for the selected device
    pub fn device_sink(&self) -> Result<ExportSink> {
        Ok(ExportSink::Device(self.builder()?))
    }

    /// Create and queue an export task, or resume the live one
    ///
    /// While an export task exists that has not finished, this resumes it
    /// and returns it unchanged; the arguments are ignored.
    pub fn create_or_resume_export_task(
        &self,
        drawing: Arc<PlottedDrawing>,
        filter: Arc<dyn GeometryFilter>,
        sink: ExportSink,
        separate_pens: bool,
        force_bypass_optimisation: bool,
    ) -> Result<Arc<ExportTask>> {
        let task = {
            let mut state = self.lock();
            if let Some(task) = state.export_task.as_ref().filter(|t| !t.is_done()) {
                task.resume();
                return Ok(task.clone());
            }

            let config = &state.config;
            let request = ExportRequest {
                drawing,
                pens: config.pens.clone(),
                filter,
                compiler: GCodeCompiler::new(config.gcode.clone(), config.drawing_area.clone()),
                sink,
                separate_pens,
                bypass_optimisation: force_bypass_optimisation
                    || config.plotting.bypass_optimisation,
            };
            let task = Arc::new(ExportTask::new(request));
            state.export_task = Some(task.clone());
            task
        };

        // A task that never reached the worker must not be resumed later
        if let Err(e) = self.monitor.queue_task(task.clone()) {
            task.cancel();
            let mut state = self.lock();
            if state.export_task.as_ref().is_some_and(|t| t.id() == task.id()) {
                state.export_task = None;
            }
            return Err(e);
        }
        Ok(task)
    }

    /// Suspend the live export after its current line
    pub fn pause_export_task(&self) {
        if let Some(task) = self.lock().export_task.clone() {
            task.pause();
        }
    }

    pub fn resume_export_task(&self) {
        if let Some(task) = self.lock().export_task.clone() {
            task.resume();
        }
    }

    pub fn cancel_export_task(&self) {
        if let Some(task) = self.lock().export_task.take() {
            task.cancel();
        }
    }

    pub fn export_task(&self) -> Option<Arc<ExportTask>> {
        self.lock().export_task.clone()
    }

    // ==================== Device ====================

    /// Enumerate devices on the background worker
    ///
    /// The result is published as [`AppEvent::DeviceList`].
    pub fn refresh_devices(&self) -> Result<()> {
        let events = self.events.clone();
        let job: Job = Box::new(move |_: &WorkerContext| {
            events.publish(AppEvent::DeviceList(list_devices()));
        });
        self.pool().submit(WorkerKind::Background, job)
    }

    /// Open the named device, or with `None` close the current one
    pub fn select_device(&self, name: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        state.release_device();
        let Some(name) = name else {
            state.config.device.last_device = None;
            return Ok(());
        };

        let channel = open_device(name, &state.config.device)?;
        state.builder = Some(Arc::new(CommandBuilder::new(channel)));
        state.config.device.last_device = Some(name.to_string());
        tracing::info!("Selected device {}", name);
        Ok(())
    }

    /// Use an already open channel as the device
    pub fn attach_device(&self, channel: Box<dyn DeviceChannel>) -> Arc<CommandBuilder> {
        let builder = Arc::new(CommandBuilder::new(channel));
        let mut state = self.lock();
        state.release_device();
        state.builder = Some(builder.clone());
        tracing::info!("Attached device {}", builder.device());
        builder
    }

    /// Command builder of the selected device
    pub fn builder(&self) -> Result<Arc<CommandBuilder>> {
        self.lock()
            .builder
            .clone()
            .ok_or(DrawbotError::DeviceNotSelected)
    }

    /// Run a device write on the background worker, then announce the mode
    fn submit_manual(
        &self,
        builder: Arc<CommandBuilder>,
        what: &'static str,
        f: impl FnOnce(&CommandBuilder) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        let events = self.events.clone();
        let job: Job = Box::new(move |_: &WorkerContext| {
            if let Err(e) = f(&builder) {
                tracing::warn!("{} on {} failed: {}", what, builder.device(), e);
            }
            events.publish(AppEvent::ManualMode(builder.is_manual_mode()));
        });
        self.pool().submit(WorkerKind::Background, job)
    }

    /// Take the device for direct control
    ///
    /// The `G91` write runs on the background worker, so a stalled device
    /// never blocks the caller. [`AppEvent::ManualMode`] follows it.
    pub fn enter_manual_mode(&self) -> Result<()> {
        let builder = {
            let mut state = self.lock();
            let builder = state
                .builder
                .clone()
                .ok_or(DrawbotError::DeviceNotSelected)?;
            state.manual_requests += 1;
            builder
        };
        self.submit_manual(builder, "Entering manual mode", |b| b.enter_manual_mode())
    }

    /// Leave one manual session; the `G90` write runs on the background worker
    pub fn exit_manual_mode(&self) -> Result<()> {
        let builder = {
            let mut state = self.lock();
            let builder = state
                .builder
                .clone()
                .ok_or(DrawbotError::DeviceNotSelected)?;
            if state.manual_requests == 0 {
                return Err(DrawbotError::ManualMode("not in manual mode".to_string()));
            }
            state.manual_requests -= 1;
            builder
        };
        self.submit_manual(builder, "Leaving manual mode", |b| b.exit_manual_mode())
    }

    /// Issue one relative move from the background worker
    ///
    /// Returns once the move is queued; a failed move is logged.
    pub fn manual_move(&self, vector: [f32; 3]) -> Result<()> {
        let (builder, requested) = {
            let state = self.lock();
            let builder = state
                .builder
                .clone()
                .ok_or(DrawbotError::DeviceNotSelected)?;
            (builder, state.manual_requests > 0)
        };
        if !requested && !builder.is_manual_mode() {
            return Err(DrawbotError::ManualMode(
                "manual moves require manual mode".to_string(),
            ));
        }
        let job: Job = Box::new(move |_: &WorkerContext| {
            if let Err(e) = builder.manual_move(vector) {
                tracing::warn!("Manual move {:?} failed: {}", vector, e);
            }
        });
        self.pool().submit(WorkerKind::Background, job)
    }

    /// Jog controller for the selected device, created on first use
    pub fn jog_controller(&self) -> Result<Arc<JogController>> {
        let mut state = self.lock();
        if let Some(jog) = state.jog.as_ref() {
            return Ok(jog.clone());
        }
        let builder = state
            .builder
            .clone()
            .ok_or(DrawbotError::DeviceNotSelected)?;
        let device = &state.config.device;
        let jog = Arc::new(JogController::new(
            builder,
            device.jog_step,
            device.jog_pen_step,
            device.jog_interval(),
        ));
        state.jog = Some(jog.clone());
        Ok(jog)
    }

    /// Home the device from the background worker
    pub fn return_home(&self) -> Result<()> {
        let builder = self.builder()?;
        let job: Job = Box::new(move |_: &WorkerContext| {
            if let Err(e) = builder.return_home() {
                tracing::warn!("Return home failed: {}", e);
            }
        });
        self.pool().submit(WorkerKind::Background, job)
    }

    // ==================== Lifecycle ====================

    /// Cancel outstanding work, close the device and join every worker
    pub fn shutdown(self) {
        {
            let mut state = self.lock();
            state.release_plotting_task();
            if let Some(export) = state.export_task.take() {
                export.cancel();
            }
            if let Some(load) = state.image_load.take() {
                load.cancel();
            }
            state.release_device();
        }
        let pool = self
            .pool
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pool.shutdown();
        tracing::info!("Application context shut down");
    }
}
