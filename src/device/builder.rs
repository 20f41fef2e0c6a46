//! Command builder: the single writer to a device channel
//!
//! Automated streaming (exports) and manual operator moves share one
//! [`DeviceChannel`]. The builder holds the channel behind a mutex, so each
//! line is an atomic write and no two writers ever interleave mid-line.
//!
//! # Manual mode
//!
//! [`CommandBuilder::enter_manual_mode`] brackets a period of direct
//! operator control. While it is in effect:
//!
//! - automated writes block in [`CommandBuilder::stream_line`] until the
//!   matching [`CommandBuilder::exit_manual_mode`] (or until their abort
//!   check fires)
//! - [`CommandBuilder::manual_move`] issues relative `G0` moves immediately
//!
//! Entering switches the device to relative positioning (`G91`); exiting
//! restores absolute positioning (`G90`) and wakes blocked writers. Manual
//! moves are written straight through and never queued, so nothing is
//! replayed on exit. Entering is re-entrant; only the outermost exit leaves
//! manual mode.

use crate::device::DeviceChannel;
use crate::error::{DrawbotError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How often a blocked automated write re-checks its abort condition
const MANUAL_WAIT_POLL: Duration = Duration::from_millis(50);

struct BuilderState {
    channel: Box<dyn DeviceChannel>,
    manual_depth: usize,
}

/// Serializes every write to one device channel
///
/// The counters and the manual flag are readable without taking the
/// channel lock, so they never wait on a stalled device.
pub struct CommandBuilder {
    device: String,
    state: Mutex<BuilderState>,
    manual_exit: Condvar,
    manual: AtomicBool,
    lines_written: AtomicU64,
    manual_moves: AtomicU64,
}

impl std::fmt::Debug for CommandBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl CommandBuilder {
    pub fn new(channel: Box<dyn DeviceChannel>) -> Self {
        let device = channel.name();
        Self {
            device,
            state: Mutex::new(BuilderState {
                channel,
                manual_depth: 0,
            }),
            manual_exit: Condvar::new(),
            manual: AtomicBool::new(false),
            lines_written: AtomicU64::new(0),
            manual_moves: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BuilderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Name of the underlying device channel
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_manual_mode(&self) -> bool {
        self.manual.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.lock().channel.is_open()
    }

    /// Total lines written through this builder
    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::SeqCst)
    }

    pub fn manual_moves(&self) -> u64 {
        self.manual_moves.load(Ordering::SeqCst)
    }

    fn write(&self, state: &mut BuilderState, line: &str) -> Result<()> {
        state.channel.write_line(line)?;
        self.lines_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Write one automated instruction
    ///
    /// Blocks while manual mode is in effect. `should_abort` is polled while
    /// blocked; when it returns true the write is abandoned with
    /// [`DrawbotError::Cancelled`].
    pub fn stream_line(&self, line: &str, should_abort: &dyn Fn() -> bool) -> Result<()> {
        let mut state = self.lock();
        while state.manual_depth > 0 {
            if should_abort() {
                return Err(DrawbotError::Cancelled);
            }
            state = self
                .manual_exit
                .wait_timeout(state, MANUAL_WAIT_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        tracing::trace!("{} <- {}", self.device, line);
        self.write(&mut state, line)
    }

    /// Begin direct operator control
    ///
    /// Any in-flight automated write completes first; later ones wait.
    pub fn enter_manual_mode(&self) -> Result<()> {
        let mut state = self.lock();
        if state.manual_depth == 0 {
            self.write(&mut state, "G91")?;
            tracing::info!("{}: entered manual mode", self.device);
        }
        state.manual_depth += 1;
        self.manual.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// End direct operator control, resuming automated writes
    pub fn exit_manual_mode(&self) -> Result<()> {
        let mut state = self.lock();
        match state.manual_depth {
            0 => Err(DrawbotError::ManualMode("not in manual mode".to_string())),
            1 => {
                state.manual_depth = 0;
                self.manual.store(false, Ordering::SeqCst);
                let restored = self.write(&mut state, "G90");
                drop(state);
                self.manual_exit.notify_all();
                tracing::info!("{}: left manual mode", self.device);
                restored
            }
            _ => {
                state.manual_depth -= 1;
                Ok(())
            }
        }
    }

    /// Issue one relative move `[dx, dy, dz]` immediately
    pub fn manual_move(&self, vector: [f32; 3]) -> Result<()> {
        let mut state = self.lock();
        if state.manual_depth == 0 {
            return Err(DrawbotError::ManualMode(
                "manual moves require manual mode".to_string(),
            ));
        }

        let [dx, dy, dz] = vector;
        if dx != 0.0 || dy != 0.0 {
            self.write(&mut state, &format!("G0 X{:.3} Y{:.3}", dx, dy))?;
        }
        if dz != 0.0 {
            self.write(&mut state, &format!("G0 Z{:.3}", dz))?;
        }
        self.manual_moves.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("{}: manual move {:?}", self.device, vector);
        Ok(())
    }

    /// Send the device to its home position
    pub fn return_home(&self) -> Result<()> {
        let mut state = self.lock();
        tracing::info!("{}: returning home", self.device);
        self.write(&mut state, "G28")
    }

    pub fn flush(&self) -> Result<()> {
        self.lock().channel.flush()
    }

    /// Flush and close the channel
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if state.channel.is_open() {
            state.channel.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MockDeviceChannel, SimulatedPlotter};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn simulated() -> (SimulatedPlotter, Arc<CommandBuilder>) {
        let plotter = SimulatedPlotter::new();
        let builder = Arc::new(CommandBuilder::new(Box::new(plotter.clone())));
        (plotter, builder)
    }

    #[test]
    fn test_manual_move_requires_manual_mode() {
        let (_, builder) = simulated();
        assert!(matches!(
            builder.manual_move([5.0, 0.0, 0.0]),
            Err(DrawbotError::ManualMode(_))
        ));
        assert!(builder.exit_manual_mode().is_err());
    }

    #[test]
    fn test_manual_session_brackets_relative_mode() {
        let (plotter, builder) = simulated();
        builder.enter_manual_mode().unwrap();
        builder.manual_move([5.0, 0.0, 0.0]).unwrap();
        builder.manual_move([0.0, -5.0, 0.0]).unwrap();
        builder.manual_move([0.0, 0.0, 1.0]).unwrap();
        builder.exit_manual_mode().unwrap();

        assert_eq!(
            plotter.received(),
            vec![
                "G91",
                "G0 X5.000 Y0.000",
                "G0 X0.000 Y-5.000",
                "G0 Z1.000",
                "G90"
            ]
        );
        assert_eq!(plotter.position(), [5.0, -5.0, 1.0]);
        assert_eq!(builder.manual_moves(), 3);
    }

    #[test]
    fn test_nested_manual_mode_exits_once() {
        let (plotter, builder) = simulated();
        builder.enter_manual_mode().unwrap();
        builder.enter_manual_mode().unwrap();
        builder.exit_manual_mode().unwrap();
        assert!(builder.is_manual_mode());
        builder.exit_manual_mode().unwrap();
        assert!(!builder.is_manual_mode());
        assert_eq!(plotter.received(), vec!["G91", "G90"]);
    }

    #[test]
    fn test_automated_write_waits_for_exit() {
        let (plotter, builder) = simulated();
        builder.enter_manual_mode().unwrap();

        let streamer = {
            let builder = builder.clone();
            std::thread::spawn(move || builder.stream_line("G1 X1 Y1", &|| false))
        };
        std::thread::sleep(Duration::from_millis(120));
        builder.manual_move([1.0, 0.0, 0.0]).unwrap();
        builder.exit_manual_mode().unwrap();
        streamer.join().unwrap().unwrap();

        assert_eq!(
            plotter.received(),
            vec!["G91", "G0 X1.000 Y0.000", "G90", "G1 X1 Y1"]
        );
    }

    #[test]
    fn test_blocked_write_can_abort() {
        let (plotter, builder) = simulated();
        builder.enter_manual_mode().unwrap();

        let abort = Arc::new(AtomicBool::new(false));
        let streamer = {
            let builder = builder.clone();
            let abort = abort.clone();
            std::thread::spawn(move || {
                builder.stream_line("G1 X1 Y1", &|| abort.load(Ordering::SeqCst))
            })
        };
        let started = Instant::now();
        abort.store(true, Ordering::SeqCst);
        let result = streamer.join().unwrap();

        assert!(matches!(result, Err(DrawbotError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(plotter.received(), vec!["G91"]);
    }

    /// Holds every write until the gate is released or dropped
    struct GatedChannel {
        gate: crossbeam_channel::Receiver<()>,
    }

    impl DeviceChannel for GatedChannel {
        fn name(&self) -> String {
            "gated".to_string()
        }

        fn write_line(&mut self, _line: &str) -> Result<()> {
            let _ = self.gate.recv();
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_state_readable_while_write_stalls() {
        let (release, gate) = crossbeam_channel::bounded::<()>(0);
        let builder = Arc::new(CommandBuilder::new(Box::new(GatedChannel { gate })));
        let writer = {
            let builder = builder.clone();
            std::thread::spawn(move || builder.enter_manual_mode())
        };
        std::thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        assert!(!builder.is_manual_mode());
        assert_eq!(builder.lines_written(), 0);
        assert_eq!(builder.manual_moves(), 0);
        assert!(started.elapsed() < Duration::from_millis(500));

        drop(release);
        writer.join().unwrap().unwrap();
        assert!(builder.is_manual_mode());
        assert_eq!(builder.lines_written(), 1);
    }

    #[test]
    fn test_channel_failure_propagates() {
        let mut channel = MockDeviceChannel::new();
        channel.expect_name().return_const("mock".to_string());
        channel
            .expect_write_line()
            .returning(|_| Err(DrawbotError::device("mock", "unplugged")));

        let builder = CommandBuilder::new(Box::new(channel));
        let err = builder.stream_line("G28", &|| false).unwrap_err();
        assert!(err.to_string().contains("unplugged"));
        assert_eq!(builder.lines_written(), 0);
    }
}
