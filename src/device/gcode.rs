//! G-code compilation of plotted drawings
//!
//! The compiler scales a [`PlottedDrawing`] from pixel space into the
//! configured drawing area (preserving aspect ratio, Y axis pointing up) and
//! emits one layer per pen:
//!
//! ```text
//! ; drawbot-rs <timestamp>
//! <start code>
//! <start layer code, %PEN% = pen name>
//! <pen up> / G0 to stroke start / <pen down> / G1 ... / <pen up>
//! <end layer code>
//! <end code>
//! ```
//!
//! Strokes of each pen are reordered by a greedy nearest-neighbour search
//! (reversing a stroke when its far end is closer) unless optimisation is
//! bypassed, in which case plotted order is kept.

use crate::config::{DrawingAreaConfig, GCodeConfig};
use crate::types::{Geometry, PenSet, PlottedDrawing};

/// Decides which geometry an export includes
pub trait GeometryFilter: Send + Sync {
    fn accept(&self, geometry: &Geometry, pens: &PenSet) -> bool;
}

impl<F> GeometryFilter for F
where
    F: Fn(&Geometry, &PenSet) -> bool + Send + Sync,
{
    fn accept(&self, geometry: &Geometry, pens: &PenSet) -> bool {
        self(geometry, pens)
    }
}

/// Every stroke regardless of pen
#[derive(Debug, Clone, Copy, Default)]
pub struct AllGeometry;

impl GeometryFilter for AllGeometry {
    fn accept(&self, _geometry: &Geometry, _pens: &PenSet) -> bool {
        true
    }
}

/// Strokes of enabled pens only
#[derive(Debug, Clone, Copy, Default)]
pub struct EnabledPens;

impl GeometryFilter for EnabledPens {
    fn accept(&self, geometry: &Geometry, pens: &PenSet) -> bool {
        pens.is_enabled(geometry.pen_index)
    }
}

/// Strokes of a single pen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenFilter(pub usize);

impl GeometryFilter for PenFilter {
    fn accept(&self, geometry: &Geometry, _pens: &PenSet) -> bool {
        geometry.pen_index == self.0
    }
}

/// Options for one compilation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Keep plotted stroke order
    pub bypass_optimisation: bool,
    /// Emit an `M0` pause before every pen layer after the first
    pub pause_between_pens: bool,
}

/// Compiled commands, either for the whole drawing or for one pen
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Pen index when compiled for a single pen
    pub pen: Option<usize>,
    /// Pen name when compiled for a single pen
    pub pen_name: Option<String>,
    pub lines: Vec<String>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Pixel to millimetre mapping for one drawing
#[derive(Debug, Clone, Copy)]
struct Transform {
    scale: f32,
    origin_x: f32,
    origin_y: f32,
    height: f32,
}

impl Transform {
    fn new(drawing: &PlottedDrawing, area: &DrawingAreaConfig, gcode: &GCodeConfig) -> Self {
        let width = drawing.width().max(1) as f32;
        let height = drawing.height().max(1) as f32;
        let scale = (area.inner_width() / width).min(area.inner_height() / height);
        Self {
            scale,
            origin_x: gcode.offset_x + area.padding,
            origin_y: gcode.offset_y + area.padding,
            height,
        }
    }

    fn apply(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        [
            self.origin_x + x * self.scale,
            self.origin_y + (self.height - y) * self.scale,
        ]
    }
}

/// Turns drawings into G-code
#[derive(Debug, Clone, Default)]
pub struct GCodeCompiler {
    gcode: GCodeConfig,
    area: DrawingAreaConfig,
}

impl GCodeCompiler {
    pub fn new(gcode: GCodeConfig, area: DrawingAreaConfig) -> Self {
        Self { gcode, area }
    }

    /// Compile every accepted stroke into one program
    pub fn compile(
        &self,
        drawing: &PlottedDrawing,
        pens: &PenSet,
        filter: &dyn GeometryFilter,
        options: CompileOptions,
    ) -> Program {
        let transform = Transform::new(drawing, &self.area, &self.gcode);
        let mut lines = self.header();
        for (i, (pen, strokes)) in self.layers(drawing, pens, filter).into_iter().enumerate() {
            if i > 0 && options.pause_between_pens {
                lines.push(format!("M0 ; change to {}", pen_name(pens, pen)));
            }
            self.emit_layer(&mut lines, &transform, pens, pen, strokes, options);
        }
        self.footer(&mut lines);
        Program {
            pen: None,
            pen_name: None,
            lines,
        }
    }

    /// Compile one standalone program per pen that has accepted strokes
    pub fn compile_per_pen(
        &self,
        drawing: &PlottedDrawing,
        pens: &PenSet,
        filter: &dyn GeometryFilter,
        options: CompileOptions,
    ) -> Vec<Program> {
        let transform = Transform::new(drawing, &self.area, &self.gcode);
        self.layers(drawing, pens, filter)
            .into_iter()
            .map(|(pen, strokes)| {
                let mut lines = self.header();
                self.emit_layer(&mut lines, &transform, pens, pen, strokes, options);
                self.footer(&mut lines);
                Program {
                    pen: Some(pen),
                    pen_name: Some(pen_name(pens, pen)),
                    lines,
                }
            })
            .collect()
    }

    /// Accepted strokes grouped by pen, in pen order
    fn layers<'a>(
        &self,
        drawing: &'a PlottedDrawing,
        pens: &PenSet,
        filter: &dyn GeometryFilter,
    ) -> Vec<(usize, Vec<&'a Geometry>)> {
        let mut layers: Vec<(usize, Vec<&'a Geometry>)> = Vec::new();
        for geometry in drawing.geometries() {
            if geometry.points.is_empty() || !filter.accept(geometry, pens) {
                continue;
            }
            match layers.iter_mut().find(|(pen, _)| *pen == geometry.pen_index) {
                Some((_, strokes)) => strokes.push(geometry),
                None => layers.push((geometry.pen_index, vec![geometry])),
            }
        }
        layers.sort_by_key(|(pen, _)| *pen);
        layers
    }

    fn header(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "; drawbot-rs {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )];
        push_code(&mut lines, &self.gcode.start_code, None);
        lines
    }

    fn footer(&self, lines: &mut Vec<String>) {
        push_code(lines, &self.gcode.end_code, None);
    }

    fn emit_layer(
        &self,
        lines: &mut Vec<String>,
        transform: &Transform,
        pens: &PenSet,
        pen: usize,
        strokes: Vec<&Geometry>,
        options: CompileOptions,
    ) {
        let name = pen_name(pens, pen);
        push_code(lines, &self.gcode.start_layer_code, Some(&name));

        let strokes = if options.bypass_optimisation {
            strokes.into_iter().map(StrokeRef::forward).collect()
        } else {
            order_strokes(strokes)
        };

        let precision = self.gcode.precision;
        for stroke in strokes {
            let mut points = stroke.points();
            let Some(first) = points.next() else {
                continue;
            };
            let [x, y] = transform.apply(first);
            push_code(lines, &self.gcode.pen_up_code, None);
            lines.push(format!(
                "G0 X{:.p$} Y{:.p$} F{}",
                x,
                y,
                self.gcode.travel_feed_rate,
                p = precision
            ));
            push_code(lines, &self.gcode.pen_down_code, None);
            for (i, point) in points.enumerate() {
                let [x, y] = transform.apply(point);
                if i == 0 {
                    lines.push(format!(
                        "G1 X{:.p$} Y{:.p$} F{}",
                        x,
                        y,
                        self.gcode.draw_feed_rate,
                        p = precision
                    ));
                } else {
                    lines.push(format!("G1 X{:.p$} Y{:.p$}", x, y, p = precision));
                }
            }
        }
        push_code(lines, &self.gcode.pen_up_code, None);
        push_code(lines, &self.gcode.end_layer_code, Some(&name));
    }
}

fn pen_name(pens: &PenSet, pen: usize) -> String {
    pens.get(pen)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| format!("Pen {}", pen + 1))
}

/// Append the non-empty lines of a configured snippet
fn push_code(lines: &mut Vec<String>, code: &str, pen: Option<&str>) {
    for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match pen {
            Some(name) => lines.push(line.replace("%PEN%", name)),
            None => lines.push(line.to_string()),
        }
    }
}

/// A stroke in either direction
#[derive(Clone, Copy)]
struct StrokeRef<'a> {
    geometry: &'a Geometry,
    reversed: bool,
}

impl<'a> StrokeRef<'a> {
    fn forward(geometry: &'a Geometry) -> Self {
        Self {
            geometry,
            reversed: false,
        }
    }

    fn points(self) -> Box<dyn Iterator<Item = [f32; 2]> + 'a> {
        let points = self.geometry.points.iter().copied();
        if self.reversed {
            Box::new(points.rev())
        } else {
            Box::new(points)
        }
    }
}

fn distance_sq(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Greedy nearest-neighbour ordering starting from the origin
fn order_strokes(strokes: Vec<&Geometry>) -> Vec<StrokeRef<'_>> {
    let mut remaining = strokes;
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut position = [0.0f32, 0.0];

    while !remaining.is_empty() {
        let mut best = (0, false, f32::INFINITY);
        for (i, geometry) in remaining.iter().enumerate() {
            let (Some(start), Some(end)) = (geometry.start(), geometry.end()) else {
                continue;
            };
            let to_start = distance_sq(position, start);
            if to_start < best.2 {
                best = (i, false, to_start);
            }
            let to_end = distance_sq(position, end);
            if to_end < best.2 {
                best = (i, true, to_end);
            }
        }

        let (index, reversed, _) = best;
        let geometry = remaining.swap_remove(index);
        let stroke = StrokeRef { geometry, reversed };
        if let Some(last) = stroke.points().last() {
            position = last;
        }
        ordered.push(stroke);
    }
    ordered
}
