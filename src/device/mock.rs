//! Simulated plotter for running without hardware
//!
//! Interprets the subset of G-code the compiler and builder emit and keeps
//! the resulting machine state in a shared [`SimulatorState`], so callers
//! can inspect what a real plotter would have done.

use crate::device::DeviceChannel;
use crate::error::{DrawbotError, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Machine state of a [`SimulatedPlotter`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorState {
    /// Current X, Y and pen Z
    pub position: [f32; 3],
    /// `G91` is in effect
    pub relative: bool,
    /// Number of `M0` pauses seen
    pub pauses: usize,
    /// Every line received, in order
    pub received: Vec<String>,
    pub open: bool,
}

/// An in-memory plotter that tracks position
#[derive(Debug, Clone)]
pub struct SimulatedPlotter {
    state: Arc<Mutex<SimulatorState>>,
}

impl Default for SimulatedPlotter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlotter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatorState {
                open: true,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the machine state
    pub fn state(&self) -> SimulatorState {
        self.lock().clone()
    }

    pub fn position(&self) -> [f32; 3] {
        self.lock().position
    }

    pub fn received(&self) -> Vec<String> {
        self.lock().received.clone()
    }
}

fn apply(state: &mut SimulatorState, line: &str) -> Result<()> {
    let code = line.split(';').next().unwrap_or("").trim();
    let mut words = code.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(());
    };

    match command.to_ascii_uppercase().as_str() {
        "G0" | "G1" => {
            for word in words {
                let mut chars = word.chars();
                let axis = match chars.next().map(|c| c.to_ascii_uppercase()) {
                    Some('X') => 0,
                    Some('Y') => 1,
                    Some('Z') => 2,
                    _ => continue,
                };
                let value: f32 = chars.as_str().parse().map_err(|_| {
                    DrawbotError::device("simulated", format!("bad coordinate in '{}'", line))
                })?;
                if state.relative {
                    state.position[axis] += value;
                } else {
                    state.position[axis] = value;
                }
            }
        }
        "G28" => state.position = [0.0; 3],
        "G90" => state.relative = false,
        "G91" => state.relative = true,
        "M0" => state.pauses += 1,
        other => tracing::debug!("Simulated plotter ignoring {}", other),
    }
    Ok(())
}

impl DeviceChannel for SimulatedPlotter {
    fn name(&self) -> String {
        super::SIMULATED_DEVICE.to_string()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.open {
            return Err(DrawbotError::device("simulated", "plotter is closed"));
        }
        apply(&mut state, line)?;
        state.received.push(line.to_string());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn close(&mut self) -> Result<()> {
        self.lock().open = false;
        Ok(())
    }
}
