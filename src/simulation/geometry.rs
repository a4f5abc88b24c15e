//! Geometry calculations for line-of-sight and obstacle intersection.
//!
//! Contains helper functions for:
//! - Point-in-shape tests (rectangles, circles)
//! - Segment-shape intersection tests
//! - Segment-segment intersection with collinear handling
//! - Distance calculations (squared distance to avoid sqrt in hot paths)

use super::types::{CirclePos, Obstacle, Point, RectPos};

/// Squared Euclidean distance in world units (avoids a sqrt in hot paths).
///
/// Neighborhood checks compare d² against range², so the square root is
/// only taken when the actual distance value is needed.
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Convert squared distance back to distance.
pub fn distance_from_d2(d2: f64) -> f64 {
    d2.sqrt()
}

/// Check if a straight line between two points intersects any obstacle.
///
/// Two devices see each other (and a route leg may be walked straight) only
/// if the segment between them crosses no obstacle.
///
/// ## Degenerate Case Handling
///
/// If point1 == point2 (degenerate segment), treats it as a point-inside-obstacle
/// test rather than a segment intersection test.
///
/// # Returns
///
/// `true` if the line intersects any obstacle (line-of-sight blocked),
/// `false` if clear line-of-sight exists.
pub fn is_intersect(point1: &Point, point2: &Point, obstacles: &[Obstacle]) -> bool {
    if point1 == point2 {
        return point_in_any(point1, obstacles);
    }

    obstacles.iter().any(|obs| match obs {
        Obstacle::Rectangle { position } => segment_intersects_rect(point1, point2, position),
        Obstacle::Circle { position } => segment_intersects_circle(point1, point2, position),
    })
}

/// True if `p` lies inside (or on the border of) any obstacle.
pub fn point_in_any(p: &Point, obstacles: &[Obstacle]) -> bool {
    obstacles.iter().any(|obs| match obs {
        Obstacle::Rectangle { position } => point_in_rect(p, position),
        Obstacle::Circle { position } => point_in_circle(p, position),
    })
}

// ---------- Geometry helpers ----------

/// Normalize rectangle corners to (left,right,top,bottom) tuple.
pub(crate) fn rect_bounds(rect: &RectPos) -> (f64, f64, f64, f64) {
    let left = rect.top_left.x.min(rect.bottom_right.x);
    let right = rect.top_left.x.max(rect.bottom_right.x);
    let top = rect.top_left.y.min(rect.bottom_right.y);
    let bottom = rect.top_left.y.max(rect.bottom_right.y);
    (left, right, top, bottom)
}

/// Inclusive point-in-rectangle test.
pub fn point_in_rect(p: &Point, rect: &RectPos) -> bool {
    let (left, right, top, bottom) = rect_bounds(rect);
    p.x >= left && p.x <= right && p.y >= top && p.y <= bottom
}

/// Inclusive point-inside-circle test.
pub fn point_in_circle(p: &Point, circle: &CirclePos) -> bool {
    distance2(p, &circle.center) <= circle.radius * circle.radius
}

/// Segment vs. axis-aligned rectangle intersection test.
fn segment_intersects_rect(p1: &Point, p2: &Point, rect: &RectPos) -> bool {
    if point_in_rect(p1, rect) || point_in_rect(p2, rect) {
        return true;
    }

    let (left, right, top, bottom) = rect_bounds(rect);
    let lt = Point::new(left, top);
    let rt = Point::new(right, top);
    let rb = Point::new(right, bottom);
    let lb = Point::new(left, bottom);

    segments_intersect(p1, p2, &lt, &rt) || segments_intersect(p1, p2, &rt, &rb) || segments_intersect(p1, p2, &rb, &lb) || segments_intersect(p1, p2, &lb, &lt)
}

/// Segment vs. circle intersection using projection and clamped parameter t.
fn segment_intersects_circle(p1: &Point, p2: &Point, circle: &CirclePos) -> bool {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return point_in_circle(p1, circle);
    }
    let t = ((circle.center.x - p1.x) * dx + (circle.center.y - p1.y) * dy) / len2;
    let t_clamped = t.clamp(0.0, 1.0);
    let closest = Point::new(p1.x + t_clamped * dx, p1.y + t_clamped * dy);
    point_in_circle(&closest, circle)
}

/// Orientation of ordered triplet (a,b,c): returns 1 if clockwise, -1 if
/// counter-clockwise, and 0 if collinear.
fn orientation(a: &Point, b: &Point, c: &Point) -> i32 {
    let val = (b.y - a.y) * (c.x - b.x) - (b.x - a.x) * (c.y - b.y);
    if val > 0.0 {
        1
    } else if val < 0.0 {
        -1
    } else {
        0
    }
}

/// True if point b lies on segment a–c, assuming collinearity.
fn on_segment(a: &Point, b: &Point, c: &Point) -> bool {
    b.x >= a.x.min(c.x) && b.x <= a.x.max(c.x) && b.y >= a.y.min(c.y) && b.y <= a.y.max(c.y)
}

/// Robust segment–segment intersection including collinear overlap.
///
/// Handles proper crossings, endpoint touching and collinear overlap using
/// the orientation of point triplets.
pub fn segments_intersect(p1: &Point, q1: &Point, p2: &Point, q2: &Point) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }
    (o1 == 0 && on_segment(p1, p2, q1)) || (o2 == 0 && on_segment(p1, q2, q1)) || (o3 == 0 && on_segment(p2, p1, q2)) || (o4 == 0 && on_segment(p2, q1, q2))
}
