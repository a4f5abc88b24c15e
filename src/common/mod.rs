//! Scene and configuration input shared by the library and the binary.

pub mod config;
pub mod scene;
