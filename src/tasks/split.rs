//! Colour separation for split plotting tasks
//!
//! A split plotting task decomposes its source image into one greyscale
//! layer per ink, plots each layer independently with the same path finder,
//! and appends the results into one drawing. Each layer's strokes are
//! assigned to the pen of that ink. Darkness in a layer means "more of this
//! ink", so any path finder that draws dark pixels works unchanged.

use crate::types::{PenSet, Raster};
use serde::{Deserialize, Serialize};

/// How a plotting task separates its image into pen layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColourSplitter {
    /// No separation; one layer plotted with the configured pens
    #[default]
    Default,
    /// Cyan, magenta, yellow and key (black) layers
    Cmyk,
}

impl ColourSplitter {
    pub fn is_split(self) -> bool {
        self != ColourSplitter::Default
    }

    /// Names of the separated layers, in pen order
    pub fn layer_names(self) -> &'static [&'static str] {
        match self {
            ColourSplitter::Default => &[],
            ColourSplitter::Cmyk => &["Cyan", "Magenta", "Yellow", "Black"],
        }
    }

    /// The pen set matching the separated layers
    pub fn pen_set(self) -> Option<PenSet> {
        match self {
            ColourSplitter::Default => None,
            ColourSplitter::Cmyk => Some(PenSet::cmyk()),
        }
    }

    /// Separate `image` into one greyscale raster per layer
    ///
    /// Returns `None` for [`ColourSplitter::Default`].
    pub fn separate(self, image: &Raster) -> Option<Vec<Raster>> {
        match self {
            ColourSplitter::Default => None,
            ColourSplitter::Cmyk => Some(
                (0..4)
                    .map(|channel| image.map_pixels(|px| cmyk_layer_pixel(px, channel)))
                    .collect(),
            ),
        }
    }
}

/// Ink amounts in `0.0..=1.0` for one RGB pixel
fn rgb_to_cmyk([r, g, b, _]: [u8; 4]) -> [f32; 4] {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 {
        return [0.0, 0.0, 0.0, 1.0];
    }
    let c = (1.0 - r - k) / (1.0 - k);
    let m = (1.0 - g - k) / (1.0 - k);
    let y = (1.0 - b - k) / (1.0 - k);
    [c, m, y, k]
}

fn cmyk_layer_pixel(px: [u8; 4], channel: usize) -> [u8; 4] {
    let ink = rgb_to_cmyk(px)[channel].clamp(0.0, 1.0);
    let level = (255.0 - ink * 255.0).round() as u8;
    [level, level, level, px[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_does_not_split() {
        let image = Raster::solid(2, 2, [10, 20, 30, 255]);
        assert!(ColourSplitter::Default.separate(&image).is_none());
        assert!(!ColourSplitter::Default.is_split());
        assert!(ColourSplitter::Default.pen_set().is_none());
    }

    #[test]
    fn test_black_lands_in_key_layer_only() {
        let image = Raster::solid(1, 1, [0, 0, 0, 255]);
        let layers = ColourSplitter::Cmyk.separate(&image).unwrap();
        assert_eq!(layers.len(), 4);
        for layer in &layers[..3] {
            assert_eq!(layer.luminance(0, 0), 255);
        }
        assert_eq!(layers[3].luminance(0, 0), 0);
    }

    #[test]
    fn test_cyan_lands_in_cyan_layer() {
        let image = Raster::solid(1, 1, [0, 255, 255, 255]);
        let layers = ColourSplitter::Cmyk.separate(&image).unwrap();
        assert_eq!(layers[0].luminance(0, 0), 0);
        assert_eq!(layers[1].luminance(0, 0), 255);
        assert_eq!(layers[2].luminance(0, 0), 255);
        assert_eq!(layers[3].luminance(0, 0), 255);
    }

    #[test]
    fn test_pen_set_matches_layers() {
        let pens = ColourSplitter::Cmyk.pen_set().unwrap();
        let names: Vec<_> = pens.pens.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ColourSplitter::Cmyk.layer_names());
    }
}
