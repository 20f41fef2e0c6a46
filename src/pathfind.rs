//! Path-finding seam between plotting tasks and line-generation algorithms
//!
//! A [`PathFinder`] turns a pre-processed raster into ordered strokes. It
//! never writes to a drawing directly: geometry goes through a [`PathSink`],
//! which keeps the task's live counters current and tells the algorithm when
//! to stop. Algorithms should call [`PathSink::should_stop`] at every safe
//! point (typically once per emitted stroke or per scanned row).
//!
//! [`ScanlinePathFinder`] is the built-in algorithm: horizontal strokes
//! over runs of dark pixels, every `row_step` rows.

use crate::error::Result;
use crate::tasks::{LiveCounts, TaskContext, TaskSignals};
use crate::types::{Geometry, PenSet, PlottedDrawing, Raster};
use serde::{Deserialize, Serialize};

/// Produces line geometry from an image
pub trait PathFinder: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the image for path finding (runs during PRE_PROCESSING)
    fn pre_process(&self, image: &Raster) -> Result<Raster> {
        Ok(image.clone())
    }

    /// Emit strokes into `sink` (runs during DO_PROCESS)
    fn find_paths(&self, image: &Raster, pens: &PenSet, sink: &mut PathSink<'_>) -> Result<()>;

    /// Adjust the finished geometry (runs during POST_PROCESSING)
    fn post_process(&self, _drawing: &mut PlottedDrawing) -> Result<()> {
        Ok(())
    }
}

/// Where a path finder sends its geometry
pub struct PathSink<'a> {
    drawing: &'a mut PlottedDrawing,
    counts: &'a LiveCounts,
    signals: &'a TaskSignals,
    ctx: &'a TaskContext,
    pen_override: Option<usize>,
    progress_offset: f64,
    progress_scale: f64,
}

impl<'a> PathSink<'a> {
    pub(crate) fn new(
        drawing: &'a mut PlottedDrawing,
        counts: &'a LiveCounts,
        signals: &'a TaskSignals,
        ctx: &'a TaskContext,
    ) -> Self {
        Self {
            drawing,
            counts,
            signals,
            ctx,
            pen_override: None,
            progress_offset: 0.0,
            progress_scale: 1.0,
        }
    }

    /// Route output of one colour-separated layer out of `layers`
    pub(crate) fn for_layer(mut self, pen: Option<usize>, index: usize, layers: usize) -> Self {
        let layers = layers.max(1) as f64;
        self.pen_override = pen;
        self.progress_offset = index as f64 / layers;
        self.progress_scale = 1.0 / layers;
        self
    }

    /// Append a stroke; strokes without points are ignored
    pub fn add_geometry(&mut self, mut geometry: Geometry) {
        if geometry.points.is_empty() {
            return;
        }
        if let Some(pen) = self.pen_override {
            geometry.pen_index = pen;
        }
        self.counts.record(&geometry);
        self.drawing.push(geometry);
    }

    /// Whether the algorithm should wind down at this safe point
    ///
    /// True on cancellation, graceful stop, or a worker interrupt.
    pub fn should_stop(&self) -> bool {
        self.signals.is_cancelled() || self.signals.is_stop_requested() || self.ctx.is_interrupted()
    }

    /// Report progress through this layer as a fraction
    pub fn set_progress(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.ctx
            .update_progress(self.progress_offset + fraction * self.progress_scale);
    }

    pub fn geometry_count(&self) -> usize {
        self.drawing.geometry_count()
    }
}

/// Horizontal strokes over runs of dark pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanlinePathFinder {
    /// Pixels with luminance below this are drawn
    pub threshold: u8,
    /// Distance between scanned rows, in pixels
    pub row_step: u32,
}

impl Default for ScanlinePathFinder {
    fn default() -> Self {
        Self {
            threshold: 128,
            row_step: 2,
        }
    }
}

impl ScanlinePathFinder {
    pub fn new(threshold: u8, row_step: u32) -> Self {
        Self {
            threshold,
            row_step: row_step.max(1),
        }
    }

    /// Half-open `[start, end)` pixel runs darker than the threshold on row `y`
    pub fn dark_runs(&self, image: &Raster, y: u32) -> Vec<(u32, u32)> {
        let mut runs = Vec::new();
        let mut start = None;
        for x in 0..image.width() {
            let dark = image.luminance(x, y) < self.threshold;
            match (dark, start) {
                (true, None) => start = Some(x),
                (false, Some(s)) => {
                    runs.push((s, x));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, image.width()));
        }
        runs
    }
}

impl PathFinder for ScanlinePathFinder {
    fn name(&self) -> &str {
        "Scanline"
    }

    fn pre_process(&self, image: &Raster) -> Result<Raster> {
        Ok(image.to_luminance())
    }

    fn find_paths(&self, image: &Raster, _pens: &PenSet, sink: &mut PathSink<'_>) -> Result<()> {
        let height = image.height().max(1) as f64;
        let mut y = 0;
        while y < image.height() {
            if sink.should_stop() {
                break;
            }
            let row = y as f32 + 0.5;
            for (start, end) in self.dark_runs(image, y) {
                sink.add_geometry(Geometry::line(0, [start as f32, row], [end as f32, row]));
            }
            sink.set_progress((y + 1) as f64 / height);
            y += self.row_step.max(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dark_runs_split_on_light_pixels() {
        let mut image = Raster::solid(6, 1, [0, 0, 0, 255]);
        image.set_pixel(2, 0, [255, 255, 255, 255]);
        image.set_pixel(3, 0, [255, 255, 255, 255]);

        let finder = ScanlinePathFinder::default();
        assert_eq!(finder.dark_runs(&image, 0), vec![(0, 2), (4, 6)]);
    }

    #[test]
    fn test_light_image_has_no_runs() {
        let image = Raster::solid(4, 4, [250, 250, 250, 255]);
        let finder = ScanlinePathFinder::new(100, 1);
        for y in 0..4 {
            assert!(finder.dark_runs(&image, y).is_empty());
        }
    }

    #[test]
    fn test_row_step_never_zero() {
        assert_eq!(ScanlinePathFinder::new(128, 0).row_step, 1);
    }

    #[test]
    fn test_pre_process_is_greyscale() {
        let image = Raster::solid(1, 1, [255, 0, 0, 255]);
        let grey = ScanlinePathFinder::default().pre_process(&image).unwrap();
        let [r, g, b, _] = grey.pixel(0, 0);
        assert_eq!(r, g);
        assert_eq!(g, b);
    }
}
