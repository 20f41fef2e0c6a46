//! Mock devices and path finders

use drawbot_rs::{DeviceChannel, DrawbotError, Geometry, PathFinder, PathSink, PenSet, Raster, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Device channel that records every line it receives
///
/// Clones share the same log, so a test keeps one clone while the builder
/// owns the other.
#[derive(Clone)]
pub struct RecordingChannel {
    lines: Arc<Mutex<Vec<String>>>,
    open: Arc<AtomicBool>,
    delay: Duration,
    fail_at: Option<usize>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicBool::new(true)),
            delay: Duration::ZERO,
            fail_at: None,
        }
    }

    /// Sleep this long inside every write
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the write of the given 1-based line
    pub fn failing_at(mut self, line: usize) -> Self {
        self.fail_at = Some(line);
        self
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }
}

impl DeviceChannel for RecordingChannel {
    fn name(&self) -> String {
        "recorder".to_string()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DrawbotError::device("recorder", "closed"));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let mut lines = self.lines.lock().unwrap();
        if self.fail_at == Some(lines.len() + 1) {
            return Err(DrawbotError::device("recorder", "unplugged"));
        }
        lines.push(line.to_string());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Path finder that emits exactly one line across the image
pub struct OneLineFinder;

impl PathFinder for OneLineFinder {
    fn name(&self) -> &str {
        "one-line"
    }

    fn find_paths(&self, image: &Raster, _pens: &PenSet, sink: &mut PathSink<'_>) -> Result<()> {
        let y = image.height() as f32 / 2.0;
        sink.add_geometry(Geometry::line(0, [0.0, y], [image.width() as f32, y]));
        sink.set_progress(1.0);
        Ok(())
    }
}

/// Path finder that keeps emitting short strokes until told to stop
pub struct EndlessFinder {
    pub pause: Duration,
}

impl Default for EndlessFinder {
    fn default() -> Self {
        Self {
            pause: Duration::from_millis(1),
        }
    }
}

impl PathFinder for EndlessFinder {
    fn name(&self) -> &str {
        "endless"
    }

    fn find_paths(&self, image: &Raster, _pens: &PenSet, sink: &mut PathSink<'_>) -> Result<()> {
        let width = image.width().max(1) as f32;
        let mut row = 0u32;
        while !sink.should_stop() {
            let y = (row % image.height().max(1)) as f32;
            sink.add_geometry(Geometry::line(0, [0.0, y], [width, y]));
            row += 1;
            std::thread::sleep(self.pause);
        }
        Ok(())
    }
}

/// Path finder that fails while finding paths
pub struct FailingFinder;

impl PathFinder for FailingFinder {
    fn name(&self) -> &str {
        "failing"
    }

    fn find_paths(&self, _image: &Raster, _pens: &PenSet, _sink: &mut PathSink<'_>) -> Result<()> {
        Err(DrawbotError::Task("path finder exploded".to_string()))
    }
}
