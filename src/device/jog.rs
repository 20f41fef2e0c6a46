//! Repeating manual moves while a direction is held
//!
//! [`JogController::press`] enters manual mode, moves once immediately and
//! then keeps moving on a fixed cadence from a timer thread.
//! [`JogController::release`] stops that thread before returning, so no move
//! is issued after it, and leaves manual mode.

use crate::device::CommandBuilder;
use crate::error::Result;
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// A held directional control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JogDirection {
    Left,
    Right,
    Up,
    Down,
    PenUp,
    PenDown,
}

impl JogDirection {
    /// Relative move `[dx, dy, dz]` for one tick
    pub fn vector(self, step: f32, pen_step: f32) -> [f32; 3] {
        match self {
            JogDirection::Left => [-step, 0.0, 0.0],
            JogDirection::Right => [step, 0.0, 0.0],
            JogDirection::Up => [0.0, step, 0.0],
            JogDirection::Down => [0.0, -step, 0.0],
            JogDirection::PenUp => [0.0, 0.0, pen_step],
            JogDirection::PenDown => [0.0, 0.0, -pen_step],
        }
    }
}

struct ActiveJog {
    direction: JogDirection,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Drives [`CommandBuilder::manual_move`] from a held control
pub struct JogController {
    builder: Arc<CommandBuilder>,
    step: f32,
    pen_step: f32,
    interval: Duration,
    active: Mutex<Option<ActiveJog>>,
}

impl JogController {
    pub fn new(builder: Arc<CommandBuilder>, step: f32, pen_step: f32, interval: Duration) -> Self {
        Self {
            builder,
            step,
            pen_step,
            interval,
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveJog>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Direction currently held, if any
    pub fn active_direction(&self) -> Option<JogDirection> {
        self.lock().as_ref().map(|jog| jog.direction)
    }

    /// Start moving in `direction` until [`JogController::release`]
    ///
    /// Pressing a new direction while one is held switches to it.
    pub fn press(&self, direction: JogDirection) -> Result<()> {
        let mut active = self.lock();
        if active.as_ref().is_some_and(|jog| jog.direction == direction) {
            return Ok(());
        }
        if let Some(previous) = active.take() {
            stop(previous);
        } else {
            self.builder.enter_manual_mode()?;
        }

        let vector = direction.vector(self.step, self.pen_step);
        if let Err(e) = self.builder.manual_move(vector) {
            self.builder.exit_manual_mode()?;
            return Err(e);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(self.interval);
        let builder = self.builder.clone();
        let spawned = std::thread::Builder::new()
            .name("drawbot-jog".to_string())
            .spawn(move || loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if let Err(e) = builder.manual_move(vector) {
                            tracing::warn!("Jog {:?} stopped: {}", direction, e);
                            break;
                        }
                    }
                }
            });

        match spawned {
            Ok(thread) => {
                tracing::debug!("Jog {:?} started", direction);
                *active = Some(ActiveJog {
                    direction,
                    stop: stop_tx,
                    thread,
                });
                Ok(())
            }
            Err(e) => {
                self.builder.exit_manual_mode()?;
                Err(e.into())
            }
        }
    }

    /// Stop moving and leave manual mode
    ///
    /// Releasing with nothing held is a no-op.
    pub fn release(&self) -> Result<()> {
        let Some(jog) = self.lock().take() else {
            return Ok(());
        };
        let direction = jog.direction;
        stop(jog);
        tracing::debug!("Jog {:?} released", direction);
        self.builder.exit_manual_mode()
    }
}

fn stop(jog: ActiveJog) {
    let _ = jog.stop.send(());
    if jog.thread.join().is_err() {
        tracing::error!("Jog thread for {:?} panicked", jog.direction);
    }
}

impl Drop for JogController {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release jog on drop: {}", e);
        }
    }
}
