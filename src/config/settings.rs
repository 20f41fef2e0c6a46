//! Configuration sections
//!
//! Each section is a plain serde struct with `#[serde(default)]`, so a
//! config file only needs to name the values it overrides.
//!
//! # Main Types
//!
//! - [`DrawingAreaConfig`] - Paper size and padding in millimetres
//! - [`GCodeConfig`] - Command snippets, origin offset, feed rates and precision
//! - [`PlottingConfig`] - Colour splitting and export optimisation
//! - [`DeviceConfig`] - Serial acknowledgement and manual jog cadence

use crate::tasks::ColourSplitter;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Physical drawing area the drawing is scaled into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingAreaConfig {
    /// Paper width in mm
    pub width: f32,
    /// Paper height in mm
    pub height: f32,
    /// Margin on every side in mm
    pub padding: f32,
}

impl Default for DrawingAreaConfig {
    fn default() -> Self {
        // A4 portrait
        Self {
            width: 210.0,
            height: 297.0,
            padding: 10.0,
        }
    }
}

impl DrawingAreaConfig {
    /// Usable width after padding
    pub fn inner_width(&self) -> f32 {
        (self.width - 2.0 * self.padding).max(0.0)
    }

    /// Usable height after padding
    pub fn inner_height(&self) -> f32 {
        (self.height - 2.0 * self.padding).max(0.0)
    }
}

/// G-code snippets and formatting
///
/// Multi-line snippets are split on `\n`. `%PEN%` in the layer codes is
/// replaced with the pen name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GCodeConfig {
    pub start_code: String,
    pub end_code: String,
    pub pen_up_code: String,
    pub pen_down_code: String,
    pub start_layer_code: String,
    pub end_layer_code: String,
    /// Machine X coordinate of the drawing area origin
    pub offset_x: f32,
    /// Machine Y coordinate of the drawing area origin
    pub offset_y: f32,
    /// Feed rate for pen-down moves in mm/min
    pub draw_feed_rate: f32,
    /// Feed rate for pen-up travel in mm/min
    pub travel_feed_rate: f32,
    /// Decimal places of emitted coordinates
    pub precision: usize,
}

impl Default for GCodeConfig {
    fn default() -> Self {
        Self {
            start_code: "G21\nG90\nG28".to_string(),
            end_code: "G28".to_string(),
            pen_up_code: "G0 Z1".to_string(),
            pen_down_code: "G0 Z0".to_string(),
            start_layer_code: "; layer %PEN%".to_string(),
            end_layer_code: String::new(),
            offset_x: 0.0,
            offset_y: 0.0,
            draw_feed_rate: 1500.0,
            travel_feed_rate: 3000.0,
            precision: 3,
        }
    }
}

/// Plotting and export behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlottingConfig {
    /// Colour separation applied before path finding
    pub splitter: ColourSplitter,
    /// Export geometry in plotted order instead of optimising travel
    pub bypass_optimisation: bool,
    /// Distance between scanned rows of the built-in path finder, in pixels
    pub row_step: u32,
    /// Luminance below which the scanline path finder draws
    pub threshold: u8,
}

impl Default for PlottingConfig {
    fn default() -> Self {
        Self {
            splitter: ColourSplitter::Default,
            bypass_optimisation: false,
            row_step: 2,
            threshold: 128,
        }
    }
}

/// Output device and manual jog settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Wait for an `ok` line after every command
    pub await_ack: bool,
    /// Longest wait for an acknowledgement before the write fails
    pub ack_timeout_ms: u64,
    /// X/Y distance of one jog move in mm
    pub jog_step: f32,
    /// Pen Z distance of one jog move
    pub jog_pen_step: f32,
    /// Cadence of repeated jog moves while a direction is held
    pub jog_interval_ms: u64,
    /// Device selected in the previous session
    pub last_device: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            await_ack: false,
            ack_timeout_ms: 10_000,
            jog_step: 5.0,
            jog_pen_step: 1.0,
            jog_interval_ms: 500,
            last_device: None,
        }
    }
}

impl DeviceConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.max(1))
    }

    pub fn jog_interval(&self) -> Duration {
        Duration::from_millis(self.jog_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_area_excludes_padding() {
        let area = DrawingAreaConfig {
            width: 100.0,
            height: 50.0,
            padding: 5.0,
        };
        assert_eq!(area.inner_width(), 90.0);
        assert_eq!(area.inner_height(), 40.0);
    }

    #[test]
    fn test_oversized_padding_clamps_to_zero() {
        let area = DrawingAreaConfig {
            width: 10.0,
            height: 10.0,
            padding: 20.0,
        };
        assert_eq!(area.inner_width(), 0.0);
    }

    #[test]
    fn test_jog_defaults() {
        let device = DeviceConfig::default();
        assert_eq!(device.jog_interval(), Duration::from_millis(500));
        assert_eq!(device.jog_step, 5.0);
        assert_eq!(device.jog_pen_step, 1.0);
        assert_eq!(device.ack_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let gcode: GCodeConfig = toml::from_str("precision = 1").unwrap();
        assert_eq!(gcode.precision, 1);
        assert_eq!(gcode.pen_up_code, GCodeConfig::default().pen_up_code);
    }
}
