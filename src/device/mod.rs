//! Output devices and the command path to them
//!
//! Everything that reaches a plotter goes through one [`CommandBuilder`],
//! which owns the open [`DeviceChannel`] and serializes every write, whether
//! it comes from a streaming export or from the operator jogging the pen.
//!
//! # Components
//!
//! - [`DeviceChannel`] - Line-oriented connection to a device or file
//! - [`PortChannel`] - Serial device node, optionally awaiting `ok` per line
//! - [`FileChannel`] - Writes commands to a file
//! - [`CommandBuilder`] - Sole writer; arbitrates manual and automated commands
//! - [`GCodeCompiler`] - Turns a drawing into G-code lines
//! - [`JogController`] - Repeats manual moves while a direction is held
//! - `SimulatedPlotter` - In-memory plotter (`mock-device` feature)

pub mod builder;
pub mod file;
pub mod gcode;
pub mod jog;
#[cfg(any(test, feature = "mock-device"))]
pub mod mock;
pub mod port;

pub use builder::CommandBuilder;
pub use file::FileChannel;
pub use gcode::{AllGeometry, CompileOptions, EnabledPens, GCodeCompiler, GeometryFilter, PenFilter, Program};
pub use jog::{JogController, JogDirection};
#[cfg(any(test, feature = "mock-device"))]
pub use mock::{SimulatedPlotter, SimulatorState};
pub use port::PortChannel;

use crate::config::DeviceConfig;
use crate::error::{DrawbotError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name under which the simulated plotter is listed
pub const SIMULATED_DEVICE: &str = "simulated";

/// Prefixes of device nodes that may be plotters
const SERIAL_PREFIXES: [&str; 3] = ["ttyUSB", "ttyACM", "cu."];

/// An open, line-oriented connection to an output device
///
/// Implementations are owned by exactly one [`CommandBuilder`] and are
/// never written to concurrently.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceChannel: Send {
    /// Identifier shown to the user (port path or file name)
    fn name(&self) -> String;

    /// Write one command line; the line terminator is added by the channel
    fn write_line(&mut self, line: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn close(&mut self) -> Result<()>;
}

/// What kind of device an enumeration entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Serial,
    Simulated,
}

/// A device found by [`list_devices`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedDevice {
    /// Name used to select the device
    pub name: String,
    pub path: PathBuf,
    pub kind: DeviceKind,
}

/// Enumerate candidate plotters
pub fn list_devices() -> Vec<DetectedDevice> {
    #[allow(unused_mut)]
    let mut devices = list_serial_devices(Path::new("/dev"));
    #[cfg(feature = "mock-device")]
    devices.push(DetectedDevice {
        name: SIMULATED_DEVICE.to_string(),
        path: PathBuf::from(SIMULATED_DEVICE),
        kind: DeviceKind::Simulated,
    });
    devices
}

/// Serial device nodes in `dir`, sorted by name
pub fn list_serial_devices(dir: &Path) -> Vec<DetectedDevice> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot enumerate devices in {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut devices: Vec<DetectedDevice> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            SERIAL_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
                .then(|| DetectedDevice {
                    path: entry.path(),
                    name: entry.path().to_string_lossy().into_owned(),
                    kind: DeviceKind::Serial,
                })
        })
        .collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!("Found {} serial devices in {}", devices.len(), dir.display());
    devices
}

/// Open the named device
///
/// `name` is a device path as reported by [`list_devices`], or
/// [`SIMULATED_DEVICE`] when the `mock-device` feature is enabled.
pub fn open_device(name: &str, config: &DeviceConfig) -> Result<Box<dyn DeviceChannel>> {
    if name.is_empty() {
        return Err(DrawbotError::DeviceNotSelected);
    }

    #[cfg(feature = "mock-device")]
    if name == SIMULATED_DEVICE {
        return Ok(Box::new(SimulatedPlotter::new()));
    }

    let channel = PortChannel::open(name, config.await_ack)?.with_ack_timeout(config.ack_timeout());
    Ok(Box::new(channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_only_serial_nodes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyUSB0", "ttyACM1", "cu.usbserial", "tty0", "null"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let names: Vec<_> = list_serial_devices(dir.path())
            .into_iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cu.usbserial", "ttyACM1", "ttyUSB0"]);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        assert!(list_serial_devices(Path::new("/nonexistent/drawbot")).is_empty());
    }

    #[test]
    fn test_empty_name_is_not_selected() {
        assert!(matches!(
            open_device("", &DeviceConfig::default()),
            Err(DrawbotError::DeviceNotSelected)
        ));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let err = open_device("/nonexistent/ttyUSB9", &DeviceConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, DrawbotError::Device { .. }));
    }
}
