//! Path model for rendered curves.
//!
//! A [`Path`] is an ordered list of [`PathCommand`]s. Its `Display`
//! implementation produces an SVG path `d` attribute, which is also the
//! serialized form.

use std::fmt::{self, Write};

use serde::{Serialize, Serializer};

/// A point in the drawing plane (x right, y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Creates a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A single drawing command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCommand {
    /// Start a new sub-path at the point (`M`).
    MoveTo(Point),
    /// Straight segment to the point (`L`).
    LineTo(Point),
    /// Cubic Bézier with two control points and an end point (`C`).
    CubicTo(Point, Point, Point),
}

impl PathCommand {
    /// The point the pen ends at after this command.
    #[must_use]
    pub const fn end(&self) -> Point {
        match *self {
            Self::MoveTo(p) | Self::LineTo(p) | Self::CubicTo(_, _, p) => p,
        }
    }
}

/// Ordered sequence of drawing commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    commands: Vec<PathCommand>,
}

impl Path {
    /// Starts a path at the given point.
    #[must_use]
    pub fn starting_at(x: f64, y: f64) -> Self {
        Self {
            commands: vec![PathCommand::MoveTo(Point::new(x, y))],
        }
    }

    /// Appends a straight segment.
    pub fn line_to(&mut self, x: f64, y: f64) -> &mut Self {
        self.commands.push(PathCommand::LineTo(Point::new(x, y)));
        self
    }

    /// Appends a cubic Bézier segment.
    pub fn cubic_to(&mut self, c1: Point, c2: Point, end: Point) -> &mut Self {
        self.commands.push(PathCommand::CubicTo(c1, c2, end));
        self
    }

    /// The commands in drawing order.
    #[must_use]
    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    /// Returns `true` if the path has no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// End points of every command, in order.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.commands.iter().map(PathCommand::end)
    }

    /// The last point of the path, if any.
    #[must_use]
    pub fn last_point(&self) -> Option<Point> {
        self.commands.last().map(PathCommand::end)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match command {
                PathCommand::MoveTo(p) => write!(out, "M {}", coords(*p))?,
                PathCommand::LineTo(p) => write!(out, "L {}", coords(*p))?,
                PathCommand::CubicTo(c1, c2, p) => write!(
                    out,
                    "C {}, {}, {}",
                    coords(*c1),
                    coords(*c2),
                    coords(*p)
                )?,
            }
        }
        f.write_str(&out)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn coords(p: Point) -> String {
    format!("{} {}", format_coord(p.x), format_coord(p.y))
}

/// Formats a coordinate with at most two decimals and no trailing zeros.
///
/// ```
/// use niv_waveform::format_coord;
///
/// assert_eq!(format_coord(133.333_333), "133.33");
/// assert_eq!(format_coord(100.0), "100");
/// assert_eq!(format_coord(-0.001), "0");
/// ```
#[must_use]
pub fn format_coord(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    // Collapse -0 so identical curves always print identically.
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded}")
}
