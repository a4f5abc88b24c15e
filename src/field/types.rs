//! Identity, time and payload types shared by the field layer.
//!
//! - `DeviceId`: stable identity of a simulated device
//! - `SimTime`: simulated (never wall-clock) timestamp
//! - `BranchKey`: code path of a value inside the aggregate program
//! - `Value` / `PayloadMap`: what devices exchange
//! - `Message`: a payload stamped with its sender and simulated time

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Stable identity of a simulated device. Never reused while the device is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub fn new(raw: u32) -> Self {
        DeviceId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// Simulated time. Comparisons are exact: two reads at the same instant see the same `SimTime`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn new(t: f64) -> Self {
        SimTime(t)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Elapsed simulated time from `earlier` to `self` (negative if `earlier` is later).
    pub fn since(self, earlier: SimTime) -> f64 {
        self.0 - earlier.0
    }

    pub fn plus(self, delta: f64) -> SimTime {
        SimTime(self.0 + delta)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

/// A point in the evaluation tree of the aggregate program.
///
/// Values from different branches are keyed by different paths, so a
/// neighbor's value computed in one branch can never be read by another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BranchKey(Vec<u16>);

impl BranchKey {
    pub fn root() -> Self {
        BranchKey(Vec::new())
    }

    pub fn from_path(path: &[u16]) -> Self {
        BranchKey(path.to_vec())
    }

    /// The key of the `index`-th child of this branch.
    pub fn child(&self, index: u16) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        BranchKey(path)
    }

    pub fn path(&self) -> &[u16] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Values exchanged between devices, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Point(f64, f64),
    Tuple(Vec<Value>),
}

impl Value {
    /// Numeric view of the value; integers widen, everything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Immutable per-step result of one device: branch → value.
pub type PayloadMap = Rc<BTreeMap<BranchKey, Value>>;

/// Build a `PayloadMap` from `(branch, value)` pairs.
pub fn payload_from<I>(entries: I) -> PayloadMap
where
    I: IntoIterator<Item = (BranchKey, Value)>,
{
    Rc::new(entries.into_iter().collect())
}

/// A delivered payload, stamped with its sender and the simulated time of delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    sender: DeviceId,
    simulated_time: SimTime,
    payload: PayloadMap,
}

impl Message {
    pub fn new(sender: DeviceId, simulated_time: SimTime, payload: PayloadMap) -> Self {
        Message {
            sender,
            simulated_time,
            payload,
        }
    }

    pub fn sender(&self) -> DeviceId {
        self.sender
    }

    pub fn simulated_time(&self) -> SimTime {
        self.simulated_time
    }

    pub fn payload(&self) -> &PayloadMap {
        &self.payload
    }

    /// Age of the message at `now`.
    pub fn age(&self, now: SimTime) -> f64 {
        now.since(self.simulated_time)
    }
}
