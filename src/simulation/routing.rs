//! Obstacle-avoiding routes for routed distances.
//!
//! `ObstacleRouter` builds a visibility graph over the route endpoints and
//! waypoints placed just outside every obstacle, then runs Dijkstra over the
//! legs that have clear line of sight. Rectangles contribute their four
//! corners; circles an enclosing octagon.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f64::consts::PI;

use super::geometry::{is_intersect, point_in_any, rect_bounds};
use super::types::{Obstacle, Point, Position};

/// Distance kept between waypoints and the obstacle they walk around.
pub const ROUTE_CLEARANCE: f64 = 0.5;

/// Number of waypoints approximating a circle.
const CIRCLE_WAYPOINTS: usize = 8;

/// Why a route could not be computed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    /// An endpoint lies inside an obstacle or the obstacles disconnect the endpoints.
    #[error("no route exists between the endpoints")]
    Unreachable,

    /// The router only works on planar positions.
    #[error("router cannot handle {0}-dimensional positions")]
    IncompatiblePosition(usize),

    /// The computed length was not a number.
    #[error("route length is NaN")]
    NotANumber,
}

/// A computed route and its walked length.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub waypoints: Vec<Point>,
    pub length: f64,
}

impl Route {
    fn from_waypoints(waypoints: Vec<Point>) -> Self {
        let length = waypoints.windows(2).map(|leg| leg[0].distance(&leg[1])).sum();
        Route { waypoints, length }
    }
}

/// Route computation capability of an environment.
pub trait Router {
    /// Whether positions of this kind can be routed.
    fn supports(&self, position: &Position) -> bool;

    fn compute_route(&self, from: &Position, to: &Position) -> Result<Route, RouteError>;
}

/// Shortest paths around static obstacles.
#[derive(Debug, Clone)]
pub struct ObstacleRouter {
    obstacles: Vec<Obstacle>,
    waypoints: Vec<Point>,
}

impl ObstacleRouter {
    pub fn new(obstacles: Vec<Obstacle>) -> Self {
        let waypoints = obstacles
            .iter()
            .flat_map(waypoints_around)
            .filter(|p| !point_in_any(p, &obstacles))
            .collect();
        ObstacleRouter { obstacles, waypoints }
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    fn route_planar(&self, from: &Point, to: &Point) -> Result<Route, RouteError> {
        if point_in_any(from, &self.obstacles) || point_in_any(to, &self.obstacles) {
            return Err(RouteError::Unreachable);
        }
        if !is_intersect(from, to, &self.obstacles) {
            return Ok(Route::from_waypoints(vec![*from, *to]));
        }

        // Graph nodes: 0 = from, 1 = to, then the obstacle waypoints.
        let mut nodes = Vec::with_capacity(self.waypoints.len() + 2);
        nodes.push(*from);
        nodes.push(*to);
        nodes.extend(self.waypoints.iter().copied());

        let mut dist = vec![f64::INFINITY; nodes.len()];
        let mut prev: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut heap = BinaryHeap::new();
        dist[0] = 0.0;
        heap.push(Candidate { cost: 0.0, node: 0 });

        while let Some(Candidate { cost, node }) = heap.pop() {
            if node == 1 {
                break;
            }
            if cost > dist[node] {
                continue;
            }
            for next in 1..nodes.len() {
                if next == node || is_intersect(&nodes[node], &nodes[next], &self.obstacles) {
                    continue;
                }
                let candidate = cost + nodes[node].distance(&nodes[next]);
                if candidate < dist[next] {
                    dist[next] = candidate;
                    prev[next] = Some(node);
                    heap.push(Candidate { cost: candidate, node: next });
                }
            }
        }

        if !dist[1].is_finite() {
            return Err(RouteError::Unreachable);
        }
        let mut path = vec![nodes[1]];
        let mut cursor = 1;
        while let Some(p) = prev[cursor] {
            path.push(nodes[p]);
            cursor = p;
        }
        path.reverse();
        Ok(Route::from_waypoints(path))
    }
}

impl Router for ObstacleRouter {
    fn supports(&self, position: &Position) -> bool {
        position.as_planar().is_some()
    }

    fn compute_route(&self, from: &Position, to: &Position) -> Result<Route, RouteError> {
        match (from, to) {
            (Position::Planar(a), Position::Planar(b)) => {
                let route = self.route_planar(a, b)?;
                if route.length.is_nan() {
                    return Err(RouteError::NotANumber);
                }
                Ok(route)
            }
            (Position::Planar(_), other) | (other, _) => Err(RouteError::IncompatiblePosition(other.dimensions())),
        }
    }
}

/// Waypoints just outside an obstacle, from which it can be walked around.
fn waypoints_around(obstacle: &Obstacle) -> Vec<Point> {
    match obstacle {
        Obstacle::Rectangle { position } => {
            let (left, right, top, bottom) = rect_bounds(position);
            let c = ROUTE_CLEARANCE;
            vec![
                Point::new(left - c, top - c),
                Point::new(right + c, top - c),
                Point::new(right + c, bottom + c),
                Point::new(left - c, bottom + c),
            ]
        }
        Obstacle::Circle { position } => {
            // Octagon vertices far enough out that every edge clears the circle.
            let step = 2.0 * PI / CIRCLE_WAYPOINTS as f64;
            let reach = (position.radius + ROUTE_CLEARANCE) / (step / 2.0).cos();
            (0..CIRCLE_WAYPOINTS)
                .map(|i| {
                    let angle = step * i as f64;
                    Point::new(position.center.x + reach * angle.cos(), position.center.y + reach * angle.sin())
                })
                .collect()
        }
    }
}

/// Min-heap entry for Dijkstra (BinaryHeap is a max-heap, so ordering is reversed).
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    node: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.total_cmp(&self.cost).then_with(|| other.node.cmp(&self.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unobstructed_route_is_straight() {
        let router = ObstacleRouter::new(vec![Obstacle::rectangle(100.0, 100.0, 110.0, 110.0)]);
        let route = router.compute_route(&Position::planar(0.0, 0.0), &Position::planar(3.0, 4.0)).unwrap();
        assert_eq!(route.waypoints.len(), 2);
        assert!((route.length - 5.0).abs() < 1e-9);
    }

    #[test]
    fn wall_forces_detour() {
        // Wall from y=-10 to y=10 between the endpoints.
        let router = ObstacleRouter::new(vec![Obstacle::rectangle(4.0, -10.0, 6.0, 10.0)]);
        let route = router.compute_route(&Position::planar(0.0, 0.0), &Position::planar(10.0, 0.0)).unwrap();
        assert!(route.length > 10.0);
        assert!(route.waypoints.len() >= 3);
        // Around a corner at (3.5, ±10.5) and (6.5, ±10.5).
        let expected = (3.5f64.powi(2) + 10.5f64.powi(2)).sqrt() * 2.0 + 3.0;
        assert!((route.length - expected).abs() < 1e-6, "length {}", route.length);
    }

    #[test]
    fn circle_forces_detour() {
        let router = ObstacleRouter::new(vec![Obstacle::circle(5.0, 0.0, 2.0)]);
        let route = router.compute_route(&Position::planar(0.0, 0.0), &Position::planar(10.0, 0.0)).unwrap();
        assert!(route.length > 10.0);
        assert!(route.length < 14.0);
    }

    #[test]
    fn endpoint_inside_obstacle_is_unreachable() {
        let router = ObstacleRouter::new(vec![Obstacle::rectangle(0.0, 0.0, 10.0, 10.0)]);
        let result = router.compute_route(&Position::planar(5.0, 5.0), &Position::planar(20.0, 20.0));
        assert_eq!(result, Err(RouteError::Unreachable));
    }

    #[test]
    fn spatial_positions_are_rejected() {
        let router = ObstacleRouter::new(Vec::new());
        assert!(!router.supports(&Position::spatial(0.0, 0.0, 0.0)));
        let result = router.compute_route(&Position::planar(0.0, 0.0), &Position::spatial(1.0, 1.0, 1.0));
        assert_eq!(result, Err(RouteError::IncompatiblePosition(3)));
    }

    #[test]
    fn same_point_route_has_zero_length() {
        let router = ObstacleRouter::new(vec![Obstacle::circle(50.0, 50.0, 5.0)]);
        let route = router.compute_route(&Position::planar(1.0, 1.0), &Position::planar(1.0, 1.0)).unwrap();
        assert_eq!(route.length, 0.0);
    }
}
