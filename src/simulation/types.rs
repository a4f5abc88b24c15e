//! Spatial type definitions for the simulated arena.
//!
//! Contains:
//! - `Point`: planar world coordinates
//! - `Position`: planar or spatial device position
//! - `Obstacle`: rectangles and circles blocking line of sight and routes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simple 2D point in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        super::geometry::distance_from_d2(super::geometry::distance2(self, other))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Position of a device in the environment's coordinate space.
///
/// Only planar positions can be routed around obstacles or turned into
/// planar displacement vectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    // Tried first when deserializing: a bare `{x, y}` must not match here.
    Spatial { x: f64, y: f64, z: f64 },
    Planar(Point),
}

impl Position {
    pub fn planar(x: f64, y: f64) -> Self {
        Position::Planar(Point::new(x, y))
    }

    pub fn spatial(x: f64, y: f64, z: f64) -> Self {
        Position::Spatial { x, y, z }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Position::Planar(_) => 2,
            Position::Spatial { .. } => 3,
        }
    }

    pub fn as_planar(&self) -> Option<&Point> {
        match self {
            Position::Planar(p) => Some(p),
            Position::Spatial { .. } => None,
        }
    }

    pub fn coordinates(&self) -> Vec<f64> {
        match self {
            Position::Planar(p) => vec![p.x, p.y],
            Position::Spatial { x, y, z } => vec![*x, *y, *z],
        }
    }

    /// Straight-line distance, defined only between positions of the same dimensionality.
    pub fn euclidean_distance(&self, other: &Position) -> Option<f64> {
        match (self, other) {
            (Position::Planar(a), Position::Planar(b)) => Some(a.distance(b)),
            (Position::Spatial { x: x1, y: y1, z: z1 }, Position::Spatial { x: x2, y: y2, z: z2 }) => {
                let (dx, dy, dz) = (x2 - x1, y2 - y1, z2 - z1);
                Some((dx * dx + dy * dy + dz * dz).sqrt())
            }
            _ => None,
        }
    }

    /// Bit-exact key so positions can index hash maps.
    pub(crate) fn cache_key(&self) -> [u64; 3] {
        match self {
            Position::Planar(p) => [p.x.to_bits(), p.y.to_bits(), u64::MAX],
            Position::Spatial { x, y, z } => [x.to_bits(), y.to_bits(), z.to_bits()],
        }
    }
}

impl From<Point> for Position {
    fn from(p: Point) -> Self {
        Position::Planar(p)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Planar(p) => write!(f, "{}", p),
            Position::Spatial { x, y, z } => write!(f, "({}, {}, {})", x, y, z),
        }
    }
}

/// Rectangle position with two corners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectPos {
    #[serde(rename = "top-left-position")]
    pub top_left: Point,
    #[serde(rename = "bottom-right-position")]
    pub bottom_right: Point,
}

/// Circle position defined by its center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CirclePos {
    #[serde(rename = "center_position")]
    pub center: Point,
    pub radius: f64,
}

/// Obstacles represented as tagged enum.
/// Rectangles are defined by two corners; circles by center and radius. They
/// block line of sight between devices and force routes to walk around them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Obstacle {
    #[serde(rename = "rectangle")]
    Rectangle {
        #[serde(flatten)]
        position: RectPos,
    },
    #[serde(rename = "circle")]
    Circle {
        #[serde(flatten)]
        position: CirclePos,
    },
}

impl Obstacle {
    pub fn rectangle(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Obstacle::Rectangle {
            position: RectPos {
                top_left: Point::new(left, top),
                bottom_right: Point::new(right, bottom),
            },
        }
    }

    pub fn circle(cx: f64, cy: f64, radius: f64) -> Self {
        Obstacle::Circle {
            position: CirclePos {
                center: Point::new(cx, cy),
                radius,
            },
        }
    }
}
