pub mod common;
pub mod field;
pub mod simulation;
