//! Serial device channel
//!
//! The port is opened as a plain read/write device node; line settings are
//! left to the operating system. With acknowledgement enabled, every line
//! waits until the firmware answers `ok` (GRBL style) or reports `error:`.
//! Replies are read on a helper thread so the wait can time out: a silent
//! firmware fails the write with a device error instead of holding the
//! channel forever.

use crate::device::DeviceChannel;
use crate::error::{DrawbotError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default wait for an acknowledgement
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// One event from the reply reader
#[derive(Debug)]
enum Reply {
    Line(String),
    Failed(String),
    Closed,
}

/// Forward every line read from `reader` until it ends or nobody listens
fn spawn_reply_reader(name: &str, reader: impl BufRead + Send + 'static) -> Result<Receiver<Reply>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name(format!("drawbot-ack {}", name))
        .spawn(move || {
            let mut reader = reader;
            loop {
                let mut line = String::new();
                let reply = match reader.read_line(&mut line) {
                    Ok(0) => Reply::Closed,
                    Ok(_) => Reply::Line(line),
                    Err(e) => Reply::Failed(e.to_string()),
                };
                let done = !matches!(reply, Reply::Line(_));
                if tx.send(reply).is_err() || done {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Channel to a serial plotter
pub struct PortChannel {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    replies: Option<Receiver<Reply>>,
    ack_timeout: Duration,
}

impl std::fmt::Debug for PortChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortChannel")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .field("await_ack", &self.replies.is_some())
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl PortChannel {
    /// Open the device node at `path`
    pub fn open(path: impl AsRef<Path>, await_ack: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| DrawbotError::device(&name, format!("failed to open: {}", e)))?;

        let replies = if await_ack {
            let clone = file
                .try_clone()
                .map_err(|e| DrawbotError::device(&name, format!("failed to clone handle: {}", e)))?;
            Some(spawn_reply_reader(&name, BufReader::new(clone))?)
        } else {
            None
        };

        tracing::info!("Opened device {} (await ack: {})", name, await_ack);
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            replies,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        })
    }

    /// How long a write waits for its acknowledgement
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    fn device_error(&self, message: impl Into<String>) -> DrawbotError {
        DrawbotError::device(self.path.display().to_string(), message)
    }

    fn await_ack(&mut self, line: &str) -> Result<()> {
        let Some(replies) = self.replies.as_ref() else {
            return Ok(());
        };

        loop {
            let reply = match replies.recv_timeout(self.ack_timeout) {
                Ok(Reply::Line(reply)) => reply,
                Ok(Reply::Failed(e)) => return Err(self.device_error(e)),
                Ok(Reply::Closed) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.device_error(format!("closed while awaiting ack for '{}'", line)))
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(self.device_error(format!(
                        "no ack for '{}' within {:?}",
                        line, self.ack_timeout
                    )))
                }
            };

            let reply = reply.trim();
            if reply.eq_ignore_ascii_case("ok") {
                return Ok(());
            }
            if let Some(code) = reply.strip_prefix("error") {
                return Err(self.device_error(format!(
                    "rejected '{}': error{}",
                    line, code
                )));
            }
            // Status reports and banners are not acknowledgements
            tracing::debug!("{}: {}", self.path.display(), reply);
        }
    }
}

impl DeviceChannel for PortChannel {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DrawbotError::device(self.path.display().to_string(), "port is closed"))?;
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| DrawbotError::device(self.path.display().to_string(), e.to_string()))?;
        self.await_ack(line)
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| DrawbotError::device(self.path.display().to_string(), e.to_string()))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.writer = None;
        self.replies = None;
        tracing::info!("Closed device {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_lines_without_ack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyUSB0");
        std::fs::write(&path, b"").unwrap();

        let mut port = PortChannel::open(&path, false).unwrap();
        port.write_line("G28").unwrap();
        port.write_line("G0 X1 Y2").unwrap();
        port.close().unwrap();
        assert!(!port.is_open());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "G28\nG0 X1 Y2\n");
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyACM0");
        std::fs::write(&path, b"").unwrap();

        let mut port = PortChannel::open(&path, false).unwrap();
        port.close().unwrap();
        assert!(matches!(
            port.write_line("G28"),
            Err(DrawbotError::Device { .. })
        ));
    }

    #[test]
    fn test_ack_reads_until_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyUSB1");
        std::fs::write(&path, b"Grbl 1.1h\nok\nerror:20\n").unwrap();

        // Separate read offset, so echoed commands are skipped as non-replies
        let mut port = PortChannel::open(&path, true).unwrap();
        port.replies = Some(
            spawn_reply_reader("ttyUSB1", BufReader::new(File::open(&path).unwrap())).unwrap(),
        );
        port.write_line("G28").unwrap();
        let err = port.write_line("G99").unwrap_err();
        assert!(err.to_string().contains("error:20"));
    }

    #[test]
    fn test_silent_firmware_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyACM1");
        std::fs::write(&path, b"").unwrap();

        let mut port = PortChannel::open(&path, false)
            .unwrap()
            .with_ack_timeout(Duration::from_millis(50));
        // Replies that never arrive
        let (_firmware, replies) = unbounded();
        port.replies = Some(replies);

        let started = std::time::Instant::now();
        match port.write_line("G28") {
            Err(DrawbotError::Device { message, .. }) => assert!(message.contains("no ack")),
            other => panic!("expected device error, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
