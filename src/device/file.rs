//! File output channel for exports written to disk

use crate::device::DeviceChannel;
use crate::error::{DrawbotError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes command lines to a file
#[derive(Debug)]
pub struct FileChannel {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    lines_written: usize,
}

impl FileChannel {
    /// Create (or truncate) the file at `path`, creating parent directories
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DrawbotError::Export(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let file = File::create(&path).map_err(|e| {
            DrawbotError::Export(format!("Failed to create {}: {}", path.display(), e))
        })?;

        tracing::debug!("Writing commands to {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            lines_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    fn io_error(&self, e: std::io::Error) -> DrawbotError {
        DrawbotError::device(self.path.display().to_string(), e.to_string())
    }
}

impl DeviceChannel for FileChannel {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(DrawbotError::device(self.name(), "file is closed"));
        };
        if let Err(e) = writeln!(writer, "{}", line) {
            return Err(self.io_error(e));
        }
        self.lines_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                return Err(self.io_error(e));
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.writer = None;
        tracing::debug!("Closed {} after {} lines", self.path.display(), self.lines_written);
        Ok(())
    }
}
