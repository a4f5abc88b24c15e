//! Per-device communication and execution substrate.
//!
//! Devices exchange their last staged payload with topological neighbors
//! through `NeighborMessageStore`s, read it back as `Field`s through a
//! `DeviceExecutionContext`, and measure distances through a per-device
//! `DistanceCache`. Validity everywhere is measured in simulated time.

pub mod builder;
pub mod context;
pub mod distance_cache;
pub mod error;
pub mod message_store;
pub mod reaction;
pub mod types;

pub use builder::{Field, FieldBuilder};
pub use context::{DeviceExecutionContext, DeviceRuntime, DeviceSettings, Target};
pub use error::{FieldError, FieldResult};
pub use message_store::{NeighborMessageStore, NeighborState, RetentionPolicy};
pub use types::{BranchKey, DeviceId, Message, PayloadMap, SimTime, Value};
