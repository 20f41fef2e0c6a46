//! Plotting task state machine
//!
//! A [`PlottingTask`] walks the stages
//! `QUEUED → PRE_PROCESSING → DO_PROCESS → POST_PROCESSING → FINISHING → FINISHED`
//! strictly forward. Each completed stage is published as
//! [`AppEvent::StageFinished`] together with the display intent computed by
//! [`on_stage_finished`].
//!
//! # Termination
//!
//! - [`PlottingTask::cancel`] abandons the task at the next safe point and
//!   discards its drawing. No further stage events are published.
//! - [`PlottingTask::stop_elegantly`] lets the current stage finish (the
//!   path finder winds down at its next safe point), publishes that stage,
//!   and keeps the geometry produced so far as the task's drawing. The task
//!   never reaches `FINISHED`.
//!
//! If both are requested, cancellation wins.
//!
//! # Split Tasks
//!
//! With a [`ColourSplitter`] other than `Default`, PRE_PROCESSING separates
//! the image into layers and DO_PROCESS plots each layer as an independent
//! sub-drawing. Live counts aggregate over all layers, so consumers read
//! split and plain tasks the same way.

use crate::error::Result;
use crate::events::AppEvent;
use crate::pathfind::{PathFinder, PathSink};
use crate::tasks::split::ColourSplitter;
use crate::tasks::stage::{on_stage_finished, StageSnapshot, TaskStage};
use crate::tasks::{Task, TaskContext, TaskId, TaskKind, TaskOutcome, TaskSignals};
use crate::types::{Geometry, PenSet, PlottedDrawing, Raster};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Everything a plotting task consumes
#[derive(Clone)]
pub struct PlottingRequest {
    pub image: Arc<Raster>,
    /// File the image was loaded from, if any
    pub source: Option<PathBuf>,
    pub pens: PenSet,
    pub path_finder: Arc<dyn PathFinder>,
    pub splitter: ColourSplitter,
}

impl PlottingRequest {
    pub fn new(image: Arc<Raster>, path_finder: Arc<dyn PathFinder>) -> Self {
        Self {
            image,
            source: None,
            pens: PenSet::default(),
            path_finder,
            splitter: ColourSplitter::Default,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_pens(mut self, pens: PenSet) -> Self {
        self.pens = pens;
        self
    }

    pub fn with_splitter(mut self, splitter: ColourSplitter) -> Self {
        self.splitter = splitter;
        self
    }
}

/// Geometry and vertex counters readable while a task runs
#[derive(Debug, Default)]
pub struct LiveCounts {
    geometry: AtomicUsize,
    vertices: AtomicU64,
}

impl LiveCounts {
    pub fn record(&self, geometry: &Geometry) {
        self.geometry.fetch_add(1, Ordering::Relaxed);
        self.vertices
            .fetch_add(geometry.vertex_count() as u64, Ordering::Relaxed);
    }

    pub fn geometry_count(&self) -> usize {
        self.geometry.load(Ordering::Relaxed)
    }

    pub fn vertex_count(&self) -> u64 {
        self.vertices.load(Ordering::Relaxed)
    }
}

/// Totals of one sub-computation of a split task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerCounts {
    pub pen: Option<usize>,
    pub geometry_count: usize,
    pub vertex_count: u64,
}

struct PlottingLayer {
    pen: Option<usize>,
    raster: Raster,
}

#[derive(Default)]
struct Timing {
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

/// Cancellable image-to-drawing computation
pub struct PlottingTask {
    id: TaskId,
    title: String,
    request: Mutex<Option<PlottingRequest>>,
    stage: Mutex<TaskStage>,
    signals: TaskSignals,
    counts: LiveCounts,
    layers: Mutex<Vec<LayerCounts>>,
    timing: Mutex<Timing>,
    drawing: Mutex<Option<Arc<PlottedDrawing>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PlottingTask {
    pub fn new(request: PlottingRequest) -> Self {
        let image_name = request
            .source
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let title = if request.splitter.is_split() {
            format!(
                "Plotting {} with {} ({:?} split)",
                image_name,
                request.path_finder.name(),
                request.splitter
            )
        } else {
            format!("Plotting {} with {}", image_name, request.path_finder.name())
        };

        Self {
            id: TaskId::next(),
            title,
            request: Mutex::new(Some(request)),
            stage: Mutex::new(TaskStage::Queued),
            signals: TaskSignals::new(),
            counts: LiveCounts::default(),
            layers: Mutex::new(Vec::new()),
            timing: Mutex::new(Timing::default()),
            drawing: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The stage currently executing (or next to execute)
    pub fn stage(&self) -> TaskStage {
        *lock(&self.stage)
    }

    pub fn is_finished(&self) -> bool {
        self.stage() == TaskStage::Finished
    }

    /// Abandon the task and discard its result
    pub fn cancel(&self) {
        if !self.signals.is_cancelled() {
            tracing::info!("Plotting task {} cancel requested", self.id);
        }
        self.signals.cancel();
    }

    /// Stop at the next stage boundary, keeping the geometry produced so far
    pub fn stop_elegantly(&self) {
        if !self.signals.is_stop_requested() {
            tracing::info!("Plotting task {} graceful stop requested", self.id);
        }
        self.signals.request_stop();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.is_cancelled()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.signals.is_stop_requested()
    }

    /// Release the image and drawing held by this task
    pub fn reset(&self) {
        lock(&self.request).take();
        lock(&self.drawing).take();
        lock(&self.layers).clear();
    }

    /// The finished (or gracefully stopped) drawing
    pub fn drawing(&self) -> Option<Arc<PlottedDrawing>> {
        lock(&self.drawing).clone()
    }

    /// Live geometry count, aggregated over all layers
    pub fn geometry_count(&self) -> usize {
        self.counts.geometry_count()
    }

    /// Live vertex count, aggregated over all layers
    pub fn vertex_count(&self) -> u64 {
        self.counts.vertex_count()
    }

    /// Totals of each completed sub-computation
    pub fn layer_counts(&self) -> Vec<LayerCounts> {
        lock(&self.layers).clone()
    }

    /// Time spent running, frozen once the task ends
    pub fn elapsed(&self) -> Duration {
        let timing = lock(&self.timing);
        match (timing.elapsed, timing.started) {
            (Some(elapsed), _) => elapsed,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    pub fn source(&self) -> Option<PathBuf> {
        lock(&self.request).as_ref().and_then(|r| r.source.clone())
    }

    fn is_abandoned(&self, ctx: &TaskContext) -> bool {
        self.signals.is_cancelled() || ctx.is_interrupted()
    }

    fn freeze_elapsed(&self) {
        let mut timing = lock(&self.timing);
        if timing.elapsed.is_none() {
            timing.elapsed = timing.started.map(|s| s.elapsed());
        }
    }

    fn abandon(&self) -> TaskOutcome {
        self.freeze_elapsed();
        lock(&self.drawing).take();
        tracing::info!("Plotting task {} abandoned during {}", self.id, self.stage());
        TaskOutcome::Cancelled
    }

    fn finish_stage(&self, ctx: &TaskContext, stage: TaskStage, drawing: &PlottedDrawing) {
        let snapshot = StageSnapshot {
            width: drawing.width(),
            height: drawing.height(),
            geometry_count: drawing.geometry_count(),
            vertex_count: drawing.vertex_count(),
        };
        let intent = on_stage_finished(stage, &snapshot);
        *lock(&self.stage) = stage.next().unwrap_or(TaskStage::Finished);

        tracing::info!("Plotting task {}: finished stage {}", self.id, stage);
        ctx.events().publish(AppEvent::StageFinished {
            task_id: self.id,
            stage,
            intent,
        });
    }

    /// Close `stage`, returning an outcome if the task must not continue
    fn end_stage(
        &self,
        ctx: &TaskContext,
        stage: TaskStage,
        drawing: &mut PlottedDrawing,
    ) -> Option<TaskOutcome> {
        if self.is_abandoned(ctx) {
            return Some(self.abandon());
        }
        self.finish_stage(ctx, stage, drawing);
        if self.signals.is_stop_requested() {
            self.freeze_elapsed();
            let kept = std::mem::take(drawing);
            tracing::info!(
                "Plotting task {} stopped after {} with {} geometries",
                self.id,
                stage,
                kept.geometry_count()
            );
            *lock(&self.drawing) = Some(Arc::new(kept));
            return Some(TaskOutcome::Stopped);
        }
        None
    }

    fn prepare_layers(&self, request: &PlottingRequest, ctx: &TaskContext) -> Result<Vec<PlottingLayer>> {
        let Some(channels) = request.splitter.separate(&request.image) else {
            return Ok(vec![PlottingLayer {
                pen: None,
                raster: request.path_finder.pre_process(&request.image)?,
            }]);
        };

        let mut layers = Vec::with_capacity(channels.len());
        for (pen, channel) in channels.into_iter().enumerate() {
            if self.is_abandoned(ctx) {
                break;
            }
            layers.push(PlottingLayer {
                pen: Some(pen),
                raster: request.path_finder.pre_process(&channel)?,
            });
        }
        Ok(layers)
    }
}

impl Task for PlottingTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Plotting
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn run(&self, ctx: &TaskContext) -> Result<TaskOutcome> {
        let Some(request) = lock(&self.request).clone() else {
            return Ok(TaskOutcome::Cancelled);
        };
        lock(&self.timing).started = Some(Instant::now());
        tracing::info!("Plotting task {} started: {}", self.id, self.title);

        let mut drawing = PlottedDrawing::default();
        if let Some(outcome) = self.end_stage(ctx, TaskStage::Queued, &mut drawing) {
            return Ok(outcome);
        }

        ctx.update_message("Pre-processing image");
        let layers = self.prepare_layers(&request, ctx)?;
        drawing = PlottedDrawing::new(request.image.width(), request.image.height());
        if let Some(outcome) = self.end_stage(ctx, TaskStage::PreProcessing, &mut drawing) {
            return Ok(outcome);
        }

        ctx.update_message(format!("Plotting with {}", request.path_finder.name()));
        let layer_total = layers.len();
        for (index, layer) in layers.into_iter().enumerate() {
            if self.signals.is_stop_requested() || self.is_abandoned(ctx) {
                break;
            }
            let mut sub = PlottedDrawing::new(drawing.width(), drawing.height());
            {
                let mut sink = PathSink::new(&mut sub, &self.counts, &self.signals, ctx)
                    .for_layer(layer.pen, index, layer_total);
                request
                    .path_finder
                    .find_paths(&layer.raster, &request.pens, &mut sink)?;
            }
            lock(&self.layers).push(LayerCounts {
                pen: layer.pen,
                geometry_count: sub.geometry_count(),
                vertex_count: sub.vertex_count(),
            });
            drawing.append(sub);
        }
        if let Some(outcome) = self.end_stage(ctx, TaskStage::DoProcess, &mut drawing) {
            return Ok(outcome);
        }

        ctx.update_message("Post-processing");
        request.path_finder.post_process(&mut drawing)?;
        drawing.clamp_pens(request.pens.len().max(1));
        if let Some(outcome) = self.end_stage(ctx, TaskStage::PostProcessing, &mut drawing) {
            return Ok(outcome);
        }

        ctx.update_message("Finishing");
        self.freeze_elapsed();
        if let Some(outcome) = self.end_stage(ctx, TaskStage::Finishing, &mut drawing) {
            return Ok(outcome);
        }
        if self.is_abandoned(ctx) {
            return Ok(self.abandon());
        }

        let drawing = Arc::new(drawing);
        *lock(&self.drawing) = Some(drawing.clone());
        self.finish_stage(ctx, TaskStage::Finished, &drawing);
        ctx.update_progress(1.0);
        tracing::info!(
            "Plotting task {} finished: {} geometries, {} vertices in {:?}",
            self.id,
            drawing.geometry_count(),
            drawing.vertex_count(),
            self.elapsed()
        );
        Ok(TaskOutcome::Completed)
    }

    fn cancel(&self) {
        PlottingTask::cancel(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::pathfind::ScanlinePathFinder;
    use crate::tasks::monitor::TaskMonitor;
    use crate::tasks::pool::{WorkerKind, WorkerPool};

    fn run_to_completion(task: Arc<PlottingTask>) -> (Vec<TaskStage>, WorkerPool) {
        let events = EventBus::new();
        let rx = events.subscribe();
        let pool = WorkerPool::new(events.clone()).unwrap();
        let monitor = TaskMonitor::new(pool.handle(WorkerKind::Compute), events);
        monitor.queue_task(task.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.status().is_active() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stages = crate::events::drain(&rx)
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::StageFinished { task_id, stage, .. } if task_id == task.id() => {
                    Some(stage)
                }
                _ => None,
            })
            .collect();
        (stages, pool)
    }

    #[test]
    fn test_scanline_plot_walks_every_stage() {
        let image = Arc::new(Raster::solid(4, 4, [0, 0, 0, 255]));
        let request = PlottingRequest::new(image, Arc::new(ScanlinePathFinder::new(128, 1)));
        let task = Arc::new(PlottingTask::new(request));

        let (stages, pool) = run_to_completion(task.clone());
        assert_eq!(stages, TaskStage::ALL.to_vec());
        assert!(task.is_finished());
        let drawing = task.drawing().unwrap();
        assert_eq!(drawing.geometry_count(), 4);
        assert_eq!(task.geometry_count(), 4);
        assert_eq!(task.vertex_count(), 8);
        pool.shutdown();
    }

    #[test]
    fn test_cancel_before_run_publishes_nothing() {
        let image = Arc::new(Raster::solid(4, 4, [0, 0, 0, 255]));
        let task = Arc::new(PlottingTask::new(PlottingRequest::new(
            image,
            Arc::new(ScanlinePathFinder::default()),
        )));
        task.cancel();
        task.stop_elegantly();

        let (stages, pool) = run_to_completion(task.clone());
        assert!(stages.is_empty());
        assert!(task.drawing().is_none());
        assert_eq!(task.stage(), TaskStage::Queued);
        pool.shutdown();
    }

    #[test]
    fn test_reset_releases_drawing() {
        let image = Arc::new(Raster::solid(2, 2, [0, 0, 0, 255]));
        let task = Arc::new(PlottingTask::new(
            PlottingRequest::new(image, Arc::new(ScanlinePathFinder::default()))
                .with_source("/tmp/cat.pgm"),
        ));
        assert_eq!(task.source(), Some(PathBuf::from("/tmp/cat.pgm")));
        assert!(task.title().contains("cat.pgm"));

        let (_, pool) = run_to_completion(task.clone());
        assert!(task.drawing().is_some());
        task.reset();
        assert!(task.drawing().is_none());
        assert!(task.source().is_none());
        pool.shutdown();
    }

    #[test]
    fn test_cmyk_split_aggregates_layers() {
        // Pure black only produces strokes in the key layer
        let image = Arc::new(Raster::solid(4, 2, [0, 0, 0, 255]));
        let request = PlottingRequest::new(image, Arc::new(ScanlinePathFinder::new(128, 1)))
            .with_pens(PenSet::cmyk())
            .with_splitter(ColourSplitter::Cmyk);
        let task = Arc::new(PlottingTask::new(request));

        let (stages, pool) = run_to_completion(task.clone());
        assert_eq!(stages, TaskStage::ALL.to_vec());

        let layers = task.layer_counts();
        assert_eq!(layers.len(), 4);
        let total: usize = layers.iter().map(|l| l.geometry_count).sum();
        assert_eq!(total, task.geometry_count());
        assert_eq!(layers[3].geometry_count, 2);

        let drawing = task.drawing().unwrap();
        assert!(drawing.geometries().iter().all(|g| g.pen_index == 3));
        pool.shutdown();
    }
}
