//! Image filters applied before plotting
//!
//! Filters run on the image-filtering worker so that recomputing the preview
//! never waits behind a long plotting task. Any `Fn(&Raster) -> Raster`
//! closure is a filter.

use crate::types::Raster;
use std::sync::Arc;

/// Transforms a raster into a new raster
pub trait ImageFilter: Send + Sync {
    fn apply(&self, image: &Raster) -> Raster;
}

impl<F> ImageFilter for F
where
    F: Fn(&Raster) -> Raster + Send + Sync,
{
    fn apply(&self, image: &Raster) -> Raster {
        self(image)
    }
}

/// Greyscale by luminance
#[derive(Debug, Clone, Copy, Default)]
pub struct Greyscale;

impl ImageFilter for Greyscale {
    fn apply(&self, image: &Raster) -> Raster {
        image.to_luminance()
    }
}

/// Colour negative
#[derive(Debug, Clone, Copy, Default)]
pub struct Invert;

impl ImageFilter for Invert {
    fn apply(&self, image: &Raster) -> Raster {
        image.map_pixels(|[r, g, b, a]| [255 - r, 255 - g, 255 - b, a])
    }
}

/// Black below the level, white at or above it
#[derive(Debug, Clone, Copy)]
pub struct Threshold(pub u8);

impl ImageFilter for Threshold {
    fn apply(&self, image: &Raster) -> Raster {
        let level = self.0;
        image.map_pixels(|px| {
            let lum = ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8;
            let v = if lum < level { 0 } else { 255 };
            [v, v, v, px[3]]
        })
    }
}

/// Shift every channel by a signed amount
#[derive(Debug, Clone, Copy)]
pub struct Brightness(pub i16);

impl ImageFilter for Brightness {
    fn apply(&self, image: &Raster) -> Raster {
        let delta = self.0;
        let shift = |c: u8| (c as i16 + delta).clamp(0, 255) as u8;
        image.map_pixels(|[r, g, b, a]| [shift(r), shift(g), shift(b), a])
    }
}

/// Run `filters` in order
pub fn apply_all(filters: &[Arc<dyn ImageFilter>], image: &Raster) -> Raster {
    filters
        .iter()
        .fold(image.clone(), |current, filter| filter.apply(&current))
}
