//! drawbot - Headless Plotter Driver
//!
//! Plots an image with the built-in scanline path finder and exports the
//! drawing as G-code to a file or straight to a serial plotter.
//!
//! # Logging
//!
//! Logs go to stderr and to a daily rolling file in the app data
//! directory. `RUST_LOG` overrides the default filter.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use drawbot_rs::{
    config::{log_dir, AppConfig},
    device::{list_devices, EnabledPens},
    tasks::{ColourSplitter, ExportSink, TaskId},
    AppContext, AppEvent, TaskStage,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// drawbot - image to pen plotter
#[derive(Parser, Debug)]
#[command(name = "drawbot")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the app data directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial devices that may be plotters
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Plot an image and export the drawing
    Plot(PlotArgs),
    /// Print the effective configuration
    Config,
}

#[derive(clap::Args, Debug)]
struct PlotArgs {
    /// Image to plot (PNG, JPEG, PNM or BMP)
    image: PathBuf,

    /// Write G-code to this file
    #[arg(long, value_name = "FILE", conflicts_with = "device")]
    out: Option<PathBuf>,

    /// Stream G-code to this device
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// One file per pen, or a pause between pens on a device
    #[arg(long)]
    separate_pens: bool,

    /// Keep plotted stroke order
    #[arg(long)]
    bypass_optimisation: bool,

    /// Separate the image into CMYK layers
    #[arg(long)]
    cmyk: bool,
}

fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,drawbot_rs=debug"));

    let (file_layer, guard) = match log_dir().map(|dir| std::fs::create_dir_all(&dir).map(|_| dir)) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "drawbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(AppConfig::load_or_default()),
    }
}

/// Receive events until `f` yields a result
fn wait_for<T>(
    events: &Receiver<AppEvent>,
    mut f: impl FnMut(&AppEvent) -> Option<Result<T>>,
) -> Result<T> {
    loop {
        match events.recv_timeout(Duration::from_secs(600)) {
            Ok(event) => {
                if let Some(result) = f(&event) {
                    return result;
                }
            }
            Err(RecvTimeoutError::Timeout) => bail!("timed out waiting for the task"),
            Err(RecvTimeoutError::Disconnected) => bail!("event bus closed"),
        }
    }
}

fn failure_of(event: &AppEvent, id: TaskId) -> Option<String> {
    match event {
        AppEvent::TaskFailed { task_id, error } if *task_id == id => Some(error.clone()),
        _ => None,
    }
}

fn plot(config: AppConfig, args: PlotArgs) -> Result<()> {
    let PlotArgs {
        image,
        out,
        device,
        separate_pens,
        bypass_optimisation,
        cmyk,
    } = args;
    let app = AppContext::new(config)?;
    if cmyk {
        app.set_splitter(ColourSplitter::Cmyk);
    }
    let events = app.subscribe();

    let load = app.open_image(&image)?;
    wait_for(&events, |event| match event {
        AppEvent::ImageLoaded { width, height, .. } => {
            println!("Loaded {} ({}x{})", image.display(), width, height);
            Some(Ok(()))
        }
        other => failure_of(other, load).map(|e| Err(anyhow::anyhow!(e))),
    })?;

    let task = app.start_plotting()?;
    let id = task.id();
    wait_for(&events, |event| match event {
        AppEvent::StageFinished { task_id, stage, .. } if *task_id == id => {
            tracing::debug!("Stage {} finished", stage);
            (*stage == TaskStage::Finished).then_some(Ok(()))
        }
        other => failure_of(other, id).map(|e| Err(anyhow::anyhow!(e))),
    })?;

    let drawing = task.drawing().context("plotting produced no drawing")?;
    println!(
        "Plotted {} geometries, {} vertices in {:.2?}",
        drawing.geometry_count(),
        drawing.vertex_count(),
        task.elapsed()
    );

    let sink = match (out, device) {
        (Some(path), _) => ExportSink::File(path),
        (None, Some(name)) => {
            app.select_device(Some(&name))?;
            app.device_sink()?
        }
        (None, None) => {
            app.shutdown();
            return Ok(());
        }
    };

    let export = app.create_or_resume_export_task(
        drawing,
        Arc::new(EnabledPens),
        sink,
        separate_pens,
        bypass_optimisation,
    )?;
    while !export.is_done() {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(AppEvent::ExportProgress { task_id, delivered, total, .. }) if task_id == export.id() => {
                tracing::debug!("Export {}/{}", delivered, total);
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("event bus closed"),
        }
    }
    if let Some(error) = export.error() {
        bail!(error);
    }

    let outputs = export.outputs();
    if outputs.is_empty() {
        println!("Streamed {} lines to {}", export.delivered(), export.sink().name());
    }
    for path in outputs {
        println!("Wrote {}", path.display());
    }
    app.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging();
    tracing::info!("Starting drawbot {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Devices { json } => {
            let devices = list_devices();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No devices found");
            } else {
                for device in devices {
                    println!("{}\t{:?}", device.name, device.kind);
                }
            }
        }
        Command::Plot(plot_args) => plot(config, plot_args)?,
        Command::Config => {
            if let Ok(path) = AppConfig::default_path() {
                println!("# {}", path.display());
            }
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
