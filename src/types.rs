//! Core data types for drawbot-rs
//!
//! This module contains the data that flows between the plotting and
//! export tasks:
//!
//! - [`Raster`] - A decoded RGBA8 image, the input of a plotting task
//! - [`Pen`] / [`PenSet`] - The pens a drawing is plotted with
//! - [`Geometry`] - A single polyline stroke assigned to a pen
//! - [`PlottedDrawing`] - Ordered geometry plus the counts shown to the user
//!
//! # Image Decoding
//!
//! [`Raster::load`] decodes files with the `image` crate and converts them
//! to RGBA8.

use crate::error::{DrawbotError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of bytes per RGBA pixel
const BYTES_PER_PIXEL: usize = 4;

/// A decoded RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Raster {
    /// Create a raster from RGBA8 pixel data
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(DrawbotError::Image(format!(
                "expected {} bytes for {}x{} RGBA image, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Create a raster filled with a single colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * BYTES_PER_PIXEL);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    /// Get the RGBA value of a pixel
    ///
    /// # Panics
    /// Panics if the coordinate is outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Set the RGBA value of a pixel
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
    }

    /// Perceived brightness of a pixel (Rec. 601 weights), 0 = black
    pub fn luminance(&self, x: u32, y: u32) -> u8 {
        let [r, g, b, _] = self.pixel(x, y);
        ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
    }

    /// Build a new raster by mapping every pixel
    pub fn map_pixels(&self, f: impl Fn([u8; 4]) -> [u8; 4]) -> Raster {
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for chunk in self.pixels.chunks_exact(BYTES_PER_PIXEL) {
            pixels.extend_from_slice(&f([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Raster {
            width: self.width,
            height: self.height,
            pixels,
        }
    }

    /// Greyscale copy of this raster
    pub fn to_luminance(&self) -> Raster {
        self.map_pixels(|[r, g, b, a]| {
            let l = ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8;
            [l, l, l, a]
        })
    }

    /// Raw RGBA8 bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Decode an image file in any supported format (PNG, JPEG, PNM, BMP)
    pub fn load(path: impl AsRef<Path>) -> Result<Raster> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| {
            DrawbotError::Image(format!("Failed to decode {}: {}", path.display(), e))
        })?;
        Self::from_rgba(image.to_rgba8())
    }

    /// Take over the pixels of a decoded RGBA image
    pub fn from_rgba(image: image::RgbaImage) -> Result<Raster> {
        let (width, height) = image.dimensions();
        Raster::new(width, height, image.into_raw())
    }
}

/// A drawing pen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pen {
    /// Display name, also substituted into layer codes
    pub name: String,
    /// RGB colour of the ink
    pub colour: [u8; 3],
    /// Disabled pens are skipped on export
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Pen {
    pub fn new(name: impl Into<String>, colour: [u8; 3]) -> Self {
        Self {
            name: name.into(),
            colour,
            enabled: true,
        }
    }
}

/// An ordered set of pens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenSet {
    pub name: String,
    pub pens: Vec<Pen>,
}

impl Default for PenSet {
    fn default() -> Self {
        Self {
            name: "Black".to_string(),
            pens: vec![Pen::new("Black", [0, 0, 0])],
        }
    }
}

impl PenSet {
    /// Cyan, magenta, yellow and black, in separation order
    pub fn cmyk() -> Self {
        Self {
            name: "CMYK".to_string(),
            pens: vec![
                Pen::new("Cyan", [0, 255, 255]),
                Pen::new("Magenta", [255, 0, 255]),
                Pen::new("Yellow", [255, 255, 0]),
                Pen::new("Black", [0, 0, 0]),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.pens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pen> {
        self.pens.get(index)
    }

    /// Whether the pen at `index` exists and is enabled
    pub fn is_enabled(&self, index: usize) -> bool {
        self.pens.get(index).is_some_and(|p| p.enabled)
    }

    /// Indices of all enabled pens
    pub fn enabled_indices(&self) -> Vec<usize> {
        (0..self.pens.len()).filter(|&i| self.is_enabled(i)).collect()
    }
}

/// A single polyline stroke drawn with one pen
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub pen_index: usize,
    pub points: Vec<[f32; 2]>,
}

impl Geometry {
    pub fn new(pen_index: usize, points: Vec<[f32; 2]>) -> Self {
        Self { pen_index, points }
    }

    /// A straight line between two points
    pub fn line(pen_index: usize, from: [f32; 2], to: [f32; 2]) -> Self {
        Self::new(pen_index, vec![from, to])
    }

    pub fn vertex_count(&self) -> usize {
        self.points.len()
    }

    pub fn start(&self) -> Option<[f32; 2]> {
        self.points.first().copied()
    }

    pub fn end(&self) -> Option<[f32; 2]> {
        self.points.last().copied()
    }
}

/// The ordered geometry produced by a plotting task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlottedDrawing {
    width: u32,
    height: u32,
    geometry: Vec<Geometry>,
    vertex_count: u64,
}

impl PlottedDrawing {
    /// Create an empty drawing surface of the given size in pixels
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            geometry: Vec::new(),
            vertex_count: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn push(&mut self, geometry: Geometry) {
        self.vertex_count += geometry.vertex_count() as u64;
        self.geometry.push(geometry);
    }

    /// Move all geometry of `other` onto the end of this drawing
    pub fn append(&mut self, other: PlottedDrawing) {
        self.vertex_count += other.vertex_count;
        self.geometry.extend(other.geometry);
    }

    pub fn geometries(&self) -> &[Geometry] {
        &self.geometry
    }

    pub fn geometries_mut(&mut self) -> &mut [Geometry] {
        &mut self.geometry
    }

    pub fn geometry_count(&self) -> usize {
        self.geometry.len()
    }

    pub fn vertex_count(&self) -> u64 {
        self.vertex_count
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }

    /// Number of strokes assigned to each pen
    pub fn pen_distribution(&self, pen_count: usize) -> Vec<usize> {
        let mut counts = vec![0; pen_count];
        for g in &self.geometry {
            if let Some(c) = counts.get_mut(g.pen_index) {
                *c += 1;
            }
        }
        counts
    }

    /// Reassign strokes with an out-of-range pen to the last pen
    pub fn clamp_pens(&mut self, pen_count: usize) {
        let last = pen_count.saturating_sub(1);
        for g in &mut self.geometry {
            if g.pen_index > last {
                g.pen_index = last;
            }
        }
    }

    /// Drop all geometry, keeping the surface size
    pub fn clear(&mut self) {
        self.geometry = Vec::new();
        self.vertex_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_rejects_wrong_length() {
        assert!(Raster::new(2, 2, vec![0; 15]).is_err());
        assert!(Raster::new(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn test_solid_raster_luminance() {
        let black = Raster::solid(4, 4, [0, 0, 0, 255]);
        assert_eq!(black.luminance(3, 3), 0);
        let white = Raster::solid(1, 1, [255, 255, 255, 255]);
        assert_eq!(white.luminance(0, 0), 255);
    }

    #[test]
    fn test_load_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swatch.png");
        let mut swatch = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        swatch.put_pixel(2, 1, image::Rgba([0, 0, 0, 128]));
        swatch.save(&path).unwrap();

        let raster = Raster::load(&path).unwrap();
        assert_eq!((raster.width(), raster.height()), (3, 2));
        assert_eq!(raster.pixel(0, 0), [10, 20, 30, 255]);
        assert_eq!(raster.pixel(2, 1), [0, 0, 0, 128]);
    }

    #[test]
    fn test_load_pgm_keeps_full_range_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.pgm");
        std::fs::write(&path, b"P5\n# made by hand\n3 1\n255\n\x00\xc8\xff").unwrap();

        let raster = Raster::load(&path).unwrap();
        assert_eq!(raster.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(raster.pixel(1, 0), [200, 200, 200, 255]);
        assert_eq!(raster.pixel(2, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn test_load_rejects_garbage_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.png");
        std::fs::write(&path, b"\x89PNG not really").unwrap();
        match Raster::load(&path) {
            Err(DrawbotError::Image(message)) => assert!(message.contains("noise.png")),
            other => panic!("expected image error, got {:?}", other),
        }
        assert!(Raster::load(dir.path().join("absent.jpg")).is_err());
    }

    #[test]
    fn test_drawing_counts() {
        let mut drawing = PlottedDrawing::new(10, 10);
        drawing.push(Geometry::line(0, [0.0, 0.0], [1.0, 1.0]));
        drawing.push(Geometry::new(3, vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]));
        assert_eq!(drawing.geometry_count(), 2);
        assert_eq!(drawing.vertex_count(), 5);

        drawing.clamp_pens(2);
        assert_eq!(drawing.pen_distribution(2), vec![1, 1]);

        let mut other = PlottedDrawing::new(10, 10);
        other.push(Geometry::line(0, [2.0, 2.0], [3.0, 3.0]));
        drawing.append(other);
        assert_eq!(drawing.geometry_count(), 3);
        assert_eq!(drawing.vertex_count(), 7);

        drawing.clear();
        assert!(drawing.is_empty());
        assert_eq!(drawing.vertex_count(), 0);
    }

    #[test]
    fn test_pen_set_enabled() {
        let mut pens = PenSet::cmyk();
        pens.pens[1].enabled = false;
        assert_eq!(pens.enabled_indices(), vec![0, 2, 3]);
        assert!(!pens.is_enabled(7));
    }
}
