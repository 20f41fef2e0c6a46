//! Loading a source image through the task monitor

use crate::error::{ResultExt, Result};
use crate::events::AppEvent;
use crate::tasks::{Task, TaskContext, TaskId, TaskKind, TaskOutcome, TaskSignals};
use crate::types::Raster;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A decoded image and the file it came from
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The load task that decoded it
    pub task_id: TaskId,
    pub path: PathBuf,
    pub raster: Arc<Raster>,
}

/// Installs a loaded image; returns false when the load is stale
type LoadedCallback = Box<dyn Fn(LoadedImage) -> bool + Send + Sync>;

/// Decodes an image file off the UI context
pub struct ImageLoadTask {
    id: TaskId,
    path: PathBuf,
    signals: TaskSignals,
    on_loaded: LoadedCallback,
}

impl ImageLoadTask {
    /// `on_loaded` receives the image unless the task was cancelled first
    ///
    /// It returns whether the image was taken. A refused image ends the
    /// task as cancelled and nothing is announced.
    pub fn new(
        path: impl Into<PathBuf>,
        on_loaded: impl Fn(LoadedImage) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: TaskId::next(),
            path: path.into(),
            signals: TaskSignals::new(),
            on_loaded: Box::new(on_loaded),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cancel(&self) {
        self.signals.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.is_cancelled()
    }
}

impl Task for ImageLoadTask {
    fn id(&self) -> TaskId {
        ImageLoadTask::id(self)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::ImageLoad
    }

    fn title(&self) -> String {
        format!("Loading {}", self.path.display())
    }

    fn run(&self, ctx: &TaskContext) -> Result<TaskOutcome> {
        if self.is_cancelled() || ctx.is_interrupted() {
            return Ok(TaskOutcome::Cancelled);
        }

        ctx.update_message("Decoding image");
        let raster = Raster::load(&self.path)
            .with_context(|| format!("Failed to load {}", self.path.display()))?;
        if self.is_cancelled() || ctx.is_interrupted() {
            return Ok(TaskOutcome::Cancelled);
        }

        let (width, height) = (raster.width(), raster.height());
        let taken = (self.on_loaded)(LoadedImage {
            task_id: self.id,
            path: self.path.clone(),
            raster: Arc::new(raster),
        });
        if !taken {
            tracing::debug!("Discarding superseded image {}", self.path.display());
            return Ok(TaskOutcome::Cancelled);
        }
        tracing::info!("Loaded {} ({}x{})", self.path.display(), width, height);
        ctx.events().publish(AppEvent::ImageLoaded {
            path: Some(self.path.clone()),
            width,
            height,
        });
        Ok(TaskOutcome::Completed)
    }

    fn cancel(&self) {
        ImageLoadTask::cancel(self);
    }
}
