//! Simulated world the field layer runs in.
//!
//! ## Module Organization
//!
//! - `types`: Positions and obstacles
//! - `geometry`: Line-of-sight and obstacle intersection logic
//! - `routing`: Obstacle-avoiding shortest paths
//! - `signal_calculations`: Radio link budget used to derive ranges
//! - `environment`: The `Environment` boundary and the arena implementation
//! - `programs`: Sample aggregate programs
//! - `runner`: Round-robin stepping harness

pub mod environment;
pub mod geometry;
pub mod programs;
pub mod routing;
pub mod runner;
pub mod signal_calculations;
pub mod types;

pub use environment::{ArenaEnvironment, Environment};
pub use runner::Simulator;
pub use types::{Obstacle, Point, Position};
