//! Per-device message store simulating asynchronous neighbor delivery.
//!
//! Each device stages one outbound payload per step. When the engine calls
//! `deliver`, the staged payload is pushed into the store of every current
//! topological neighbor that runs the program, stamped with the delivery
//! time. Reading `neighbor_state` applies the retention policy and evicts
//! stale messages permanently; repeated reads at the same simulated time
//! return the same memoized snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::simulation::environment::Environment;

use super::error::{FieldError, FieldResult};
use super::types::{BranchKey, DeviceId, Message, PayloadMap, SimTime, Value};

/// How long a received message stays visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetentionPolicy {
    /// Kept exactly as long as the sender is a topological neighbor.
    TopologyBound,
    /// Kept while `now - sent < window`, regardless of topology.
    TimeBound(f64),
}

impl RetentionPolicy {
    /// NaN means "unset" and selects topology-bound retention.
    pub fn from_retention_time(retention_time: f64) -> FieldResult<Self> {
        if retention_time.is_nan() {
            Ok(RetentionPolicy::TopologyBound)
        } else if retention_time < 0.0 {
            Err(FieldError::Precondition(format!("retention time must be non-negative, got {}", retention_time)))
        } else {
            Ok(RetentionPolicy::TimeBound(retention_time))
        }
    }

    fn keeps(&self, message: &Message, now: SimTime, neighbors: &BTreeSet<DeviceId>) -> bool {
        match self {
            RetentionPolicy::TopologyBound => neighbors.contains(&message.sender()),
            RetentionPolicy::TimeBound(window) => message.age(now) < *window,
        }
    }
}

/// Immutable snapshot of the best last-known state of each neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborState {
    time: SimTime,
    messages: BTreeMap<DeviceId, Message>,
}

impl NeighborState {
    fn empty(time: SimTime) -> Self {
        NeighborState {
            time,
            messages: BTreeMap::new(),
        }
    }

    /// Simulated time this snapshot was computed for.
    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.messages.contains_key(&device)
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.messages.keys().copied()
    }

    pub fn message(&self, device: DeviceId) -> Option<&Message> {
        self.messages.get(&device)
    }

    pub fn payload(&self, device: DeviceId) -> Option<&PayloadMap> {
        self.messages.get(&device).map(Message::payload)
    }

    /// Simulated time at which `device`'s retained message was delivered.
    pub fn recorded_at(&self, device: DeviceId) -> Option<SimTime> {
        self.messages.get(&device).map(Message::simulated_time)
    }

    pub fn value(&self, device: DeviceId, branch: &BranchKey) -> Option<&Value> {
        self.payload(device).and_then(|payload| payload.get(branch))
    }

    /// The `DeviceId → PayloadMap` view.
    pub fn payloads(&self) -> BTreeMap<DeviceId, PayloadMap> {
        self.messages.iter().map(|(id, msg)| (*id, msg.payload().clone())).collect()
    }
}

/// One device's outbound staged payload and retained inbound messages.
#[derive(Debug)]
pub struct NeighborMessageStore {
    owner: DeviceId,
    retention: RetentionPolicy,
    staged: Option<PayloadMap>,
    inbox: BTreeMap<DeviceId, Message>,
    snapshot: Option<Rc<NeighborState>>,
    recomputations: u64,
}

impl NeighborMessageStore {
    /// Create the store of `owner`. A NaN `retention_time` selects topology-bound
    /// retention; a negative one is rejected.
    pub fn new(owner: DeviceId, retention_time: f64) -> FieldResult<Self> {
        Ok(Self::with_policy(owner, RetentionPolicy::from_retention_time(retention_time)?))
    }

    pub fn with_policy(owner: DeviceId, retention: RetentionPolicy) -> Self {
        NeighborMessageStore {
            owner,
            retention,
            staged: None,
            inbox: BTreeMap::new(),
            snapshot: None,
            recomputations: 0,
        }
    }

    pub fn owner(&self) -> DeviceId {
        self.owner
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Replace the staged outbound payload. An absent payload is a precondition failure.
    pub fn stage(&mut self, payload: impl Into<Option<PayloadMap>>) -> FieldResult<()> {
        let payload = payload
            .into()
            .ok_or_else(|| FieldError::Precondition(format!("{} staged an absent payload", self.owner)))?;
        self.staged = Some(payload);
        Ok(())
    }

    pub fn staged(&self) -> Option<&PayloadMap> {
        self.staged.as_ref()
    }

    /// Push the staged payload to every current topological neighbor running the
    /// program. The staged payload is consumed; returns the number of recipients.
    pub fn deliver(&mut self, env: &dyn Environment, now: SimTime) -> usize {
        let Some(payload) = self.staged.take() else {
            return 0;
        };
        let mut recipients = 0;
        for neighbor in env.neighbors_of(self.owner) {
            if neighbor == self.owner {
                continue;
            }
            if let Some(store) = env.message_store(neighbor) {
                store.borrow_mut().receive(Message::new(self.owner, now, payload.clone()));
                recipients += 1;
            }
        }
        log::trace!("{} delivered at {} to {} neighbor(s)", self.owner, now, recipients);
        recipients
    }

    /// Insert a message, overwriting any earlier one from the same sender.
    pub fn receive(&mut self, message: Message) {
        self.inbox.insert(message.sender(), message);
    }

    /// Number of retained messages (including ones not yet filtered by a read).
    pub fn retained(&self) -> usize {
        self.inbox.len()
    }

    /// How many times the state was actually recomputed rather than memoized.
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    /// The best last-known state of each neighbor at `now`.
    ///
    /// Reads at the same simulated time as the previous read return the previous
    /// snapshot untouched. Otherwise messages rejected by the retention policy are
    /// removed from the store for good.
    pub fn neighbor_state(&mut self, env: &dyn Environment, now: SimTime) -> Rc<NeighborState> {
        if let Some(snapshot) = &self.snapshot {
            if snapshot.time == now {
                return Rc::clone(snapshot);
            }
        }
        self.recomputations += 1;

        if self.inbox.is_empty() {
            let empty = Rc::new(NeighborState::empty(now));
            self.snapshot = Some(Rc::clone(&empty));
            return empty;
        }

        let neighbors = match self.retention {
            RetentionPolicy::TopologyBound => env.neighbors_of(self.owner),
            RetentionPolicy::TimeBound(_) => BTreeSet::new(),
        };
        let retention = self.retention;
        let owner = self.owner;
        self.inbox.retain(|sender, message| {
            let keep = retention.keeps(message, now, &neighbors);
            if !keep {
                log::debug!("{} evicted message from {} sent at {} ({:?})", owner, sender, message.simulated_time(), retention);
            }
            keep
        });

        let state = Rc::new(NeighborState {
            time: now,
            messages: self.inbox.clone(),
        });
        self.snapshot = Some(Rc::clone(&state));
        state
    }
}
