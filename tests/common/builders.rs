//! Test data builders for drawings and images

use drawbot_rs::{Geometry, PlottedDrawing, Raster};

/// Builder for drawings of evenly spaced horizontal strokes
pub struct DrawingBuilder {
    width: u32,
    height: u32,
    strokes: usize,
    pens: usize,
    points: usize,
}

impl DrawingBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            strokes: 1,
            pens: 1,
            points: 2,
        }
    }

    pub fn strokes(mut self, strokes: usize) -> Self {
        self.strokes = strokes;
        self
    }

    /// Spread strokes round-robin over this many pens
    pub fn pens(mut self, pens: usize) -> Self {
        self.pens = pens.max(1);
        self
    }

    /// Points per stroke (at least two)
    pub fn points(mut self, points: usize) -> Self {
        self.points = points.max(2);
        self
    }

    pub fn build(self) -> PlottedDrawing {
        let mut drawing = PlottedDrawing::new(self.width, self.height);
        let w = self.width as f32;
        let h = self.height as f32;
        for i in 0..self.strokes {
            let y = h * (i as f32 + 0.5) / self.strokes as f32;
            let points = (0..self.points)
                .map(|p| [w * p as f32 / (self.points - 1) as f32, y])
                .collect();
            drawing.push(Geometry::new(i % self.pens, points));
        }
        drawing
    }
}

/// Opaque black image
pub fn black_image(width: u32, height: u32) -> Raster {
    Raster::solid(width, height, [0, 0, 0, 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drawing_builder() {
        let drawing = DrawingBuilder::new(100, 100).strokes(6).pens(3).points(4).build();

        assert_eq!(drawing.geometry_count(), 6);
        assert_eq!(drawing.vertex_count(), 24);
        assert_eq!(drawing.pen_distribution(3), vec![2, 2, 2]);
    }
}
