//! # drawbot-rs: Image-to-Plotter Task Orchestration
//!
//! Converts raster images into line drawings and streams them to pen
//! plotters as G-code. Long-running work runs on dedicated worker threads
//! so the controlling UI or CLI never blocks.
//!
//! ## Architecture
//!
//! - **Workers**: Three single-thread workers (compute, background, image filtering)
//! - **Tasks**: Plotting, export and image-load tasks run on the compute worker
//!   under a task monitor that publishes their status
//! - **Device**: A command builder owns the device channel and arbitrates
//!   between streamed exports and manual jog moves
//! - **Communication**: Crossbeam channels carry [`events::AppEvent`]s to subscribers
//!
//! ## Configuration
//!
//! The configuration is stored as TOML in the platform-appropriate data
//! directory under `dev.drawbot.drawbot-rs`:
//!
//! - **Linux**: `~/.local/share/dev.drawbot.drawbot-rs/`
//! - **macOS**: `~/Library/Application Support/dev.drawbot.drawbot-rs/`
//! - **Windows**: `%APPDATA%\dev.drawbot.drawbot-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use drawbot_rs::{AppConfig, AppContext, AppEvent, TaskStage};
//!
//! let app = AppContext::new(AppConfig::load_or_default())?;
//! let events = app.subscribe();
//! app.open_image("portrait.pgm")?;
//!
//! for event in events.iter() {
//!     match event {
//!         AppEvent::ImageLoaded { .. } => {
//!             app.start_plotting()?;
//!         }
//!         AppEvent::StageFinished { stage: TaskStage::Finished, .. } => break,
//!         _ => {}
//!     }
//! }
//! app.shutdown();
//! ```

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod filters;
pub mod pathfind;
pub mod tasks;
pub mod types;

// Re-export commonly used types
pub use app::{AppContext, PlottingStats};
pub use config::AppConfig;
pub use device::{CommandBuilder, DeviceChannel, JogController, JogDirection};
pub use error::{DrawbotError, Result};
pub use events::{AppEvent, EventBus};
pub use pathfind::{PathFinder, PathSink, ScanlinePathFinder};
pub use tasks::{ExportTask, PlottingTask, TaskMonitor, TaskStage, UiIntent};
pub use types::{Geometry, Pen, PenSet, PlottedDrawing, Raster};
