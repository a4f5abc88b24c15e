//! The reaction driving a device's program.
//!
//! The discrete-event engine owns scheduling; a `Reaction` only records when
//! the device is currently executing and when it will execute next, which is
//! all the field layer needs (current simulated time and `nbr_delay`).

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::{FieldError, FieldResult};
use super::types::{DeviceId, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReactionId(u64);

static NEXT_REACTION_ID: AtomicU64 = AtomicU64::new(1);

impl ReactionId {
    fn next() -> Self {
        ReactionId(NEXT_REACTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Periodic program execution of one device.
#[derive(Debug)]
pub struct Reaction {
    id: ReactionId,
    device: DeviceId,
    rate: f64,
    time: Cell<SimTime>,
    next_time: Cell<SimTime>,
}

impl Reaction {
    /// A reaction firing `rate` times per simulated time unit, first at `start`.
    pub fn new(device: DeviceId, rate: f64, start: SimTime) -> FieldResult<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(FieldError::Precondition(format!("reaction rate of {} must be positive, got {}", device, rate)));
        }
        Ok(Reaction {
            id: ReactionId::next(),
            device,
            rate,
            time: Cell::new(start),
            next_time: Cell::new(start.plus(1.0 / rate)),
        })
    }

    pub fn id(&self) -> ReactionId {
        self.id
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Simulated time of the current (or last) execution.
    pub fn time(&self) -> SimTime {
        self.time.get()
    }

    /// Simulated time of the next scheduled execution.
    pub fn next_time(&self) -> SimTime {
        self.next_time.get()
    }

    /// Forward view of the step length: from now to the next execution.
    pub fn step_interval(&self) -> f64 {
        self.next_time.get().since(self.time.get())
    }

    /// Record an execution at `now`; the next one is one period later.
    pub fn fire(&self, now: SimTime) {
        self.time.set(now);
        self.next_time.set(now.plus(1.0 / self.rate));
    }

    /// Record an execution at `now` with an engine-chosen next execution time.
    pub fn fire_with_next(&self, now: SimTime, next: SimTime) {
        self.time.set(now);
        self.next_time.set(next);
    }
}
