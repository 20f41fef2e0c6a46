//! Plotting stages and the stage-finished handler

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages of a plotting task, in strict forward order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskStage {
    Queued,
    PreProcessing,
    DoProcess,
    PostProcessing,
    Finishing,
    Finished,
}

impl TaskStage {
    /// Every stage, in execution order
    pub const ALL: [TaskStage; 6] = [
        TaskStage::Queued,
        TaskStage::PreProcessing,
        TaskStage::DoProcess,
        TaskStage::PostProcessing,
        TaskStage::Finishing,
        TaskStage::Finished,
    ];

    /// The stage that follows this one, `None` once finished
    pub fn next(self) -> Option<TaskStage> {
        match self {
            TaskStage::Queued => Some(TaskStage::PreProcessing),
            TaskStage::PreProcessing => Some(TaskStage::DoProcess),
            TaskStage::DoProcess => Some(TaskStage::PostProcessing),
            TaskStage::PostProcessing => Some(TaskStage::Finishing),
            TaskStage::Finishing => Some(TaskStage::Finished),
            TaskStage::Finished => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == TaskStage::Finished
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskStage::Queued => "QUEUED",
            TaskStage::PreProcessing => "PRE_PROCESSING",
            TaskStage::DoProcess => "DO_PROCESS",
            TaskStage::PostProcessing => "POST_PROCESSING",
            TaskStage::Finishing => "FINISHING",
            TaskStage::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the display should do after a stage finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiIntent {
    /// A drawing surface exists; switch the viewport from image to drawing
    ShowDrawing { width: u32, height: u32 },
    /// Geometry counts are final; reinitialise the displayed-lines controls
    ResetDisplayedGeometry {
        geometry_count: usize,
        vertex_count: u64,
    },
}

/// The drawing facts a stage handler needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSnapshot {
    pub width: u32,
    pub height: u32,
    pub geometry_count: usize,
    pub vertex_count: u64,
}

/// Map a finished stage to the display update it calls for
pub fn on_stage_finished(stage: TaskStage, snapshot: &StageSnapshot) -> Option<UiIntent> {
    match stage {
        TaskStage::Queued => None,
        TaskStage::PreProcessing => Some(UiIntent::ShowDrawing {
            width: snapshot.width,
            height: snapshot.height,
        }),
        TaskStage::DoProcess => Some(UiIntent::ResetDisplayedGeometry {
            geometry_count: snapshot.geometry_count,
            vertex_count: snapshot.vertex_count,
        }),
        TaskStage::PostProcessing => None,
        TaskStage::Finishing => None,
        TaskStage::Finished => None,
    }
}
