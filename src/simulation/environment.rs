//! The spatial environment devices live in.
//!
//! `Environment` is the boundary the field layer consumes: positions,
//! topological neighborhoods, the recipient lookup used for delivery and an
//! optional routing capability. `ArenaEnvironment` is the concrete
//! implementation used by the stepping harness: a flat arena with obstacles
//! where two devices are neighbors when within communication range and in
//! line of sight.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::field::error::{FieldError, FieldResult};
use crate::field::message_store::NeighborMessageStore;
use crate::field::types::DeviceId;

use super::geometry::{distance2, is_intersect};
use super::routing::{ObstacleRouter, Router};
use super::types::{Obstacle, Position};

/// Shared handle to a device's message store.
///
/// Stores are owned per device and reached through the environment's
/// neighbor lookup; single-threaded by construction (`Rc`, not `Arc`).
pub type StoreHandle = Rc<RefCell<NeighborMessageStore>>;

/// Identity of an environment instance, independent of where it lives in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvironmentId(u64);

static NEXT_ENVIRONMENT_ID: AtomicU64 = AtomicU64::new(1);

impl EnvironmentId {
    pub fn next() -> Self {
        EnvironmentId(NEXT_ENVIRONMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What the field layer needs from the physical environment.
pub trait Environment {
    fn id(&self) -> EnvironmentId;

    fn contains(&self, device: DeviceId) -> bool;

    fn position_of(&self, device: DeviceId) -> Option<Position>;

    /// Current topological neighbors of `device`, never including itself.
    fn neighbors_of(&self, device: DeviceId) -> BTreeSet<DeviceId>;

    /// Message store of `device`, present only if it runs the program.
    fn message_store(&self, device: DeviceId) -> Option<StoreHandle>;

    /// Route computation, present only on routing-capable environments.
    fn router(&self) -> Option<&dyn Router>;
}

struct DeviceSlot {
    position: Position,
    communication_range: f64,
    store: Option<StoreHandle>,
}

/// Flat arena with static obstacles.
pub struct ArenaEnvironment {
    id: EnvironmentId,
    devices: RefCell<BTreeMap<DeviceId, DeviceSlot>>,
    obstacles: Vec<Obstacle>,
    communication_range: f64,
    router: Option<ObstacleRouter>,
}

impl ArenaEnvironment {
    /// Arena without routing: distances are straight lines only.
    pub fn new(obstacles: Vec<Obstacle>, communication_range: f64) -> Self {
        ArenaEnvironment {
            id: EnvironmentId::next(),
            devices: RefCell::new(BTreeMap::new()),
            obstacles,
            communication_range,
            router: None,
        }
    }

    /// Arena that also routes around its obstacles.
    pub fn with_routing(obstacles: Vec<Obstacle>, communication_range: f64) -> Self {
        let router = ObstacleRouter::new(obstacles.clone());
        ArenaEnvironment {
            router: Some(router),
            ..ArenaEnvironment::new(obstacles, communication_range)
        }
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn communication_range(&self) -> f64 {
        self.communication_range
    }

    pub fn device_count(&self) -> usize {
        self.devices.borrow().len()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.borrow().keys().copied().collect()
    }

    pub fn add_device(&self, device: DeviceId, position: Position) -> FieldResult<()> {
        self.add_device_with_range(device, position, self.communication_range)
    }

    /// Add a device whose radio reaches `communication_range` instead of the arena default.
    pub fn add_device_with_range(&self, device: DeviceId, position: Position, communication_range: f64) -> FieldResult<()> {
        let mut devices = self.devices.borrow_mut();
        if devices.contains_key(&device) {
            return Err(FieldError::Precondition(format!("device {} is already in the environment", device)));
        }
        devices.insert(
            device,
            DeviceSlot {
                position,
                communication_range,
                store: None,
            },
        );
        log::debug!("Added {} at {} (range {})", device, position, communication_range);
        Ok(())
    }

    pub fn move_device(&self, device: DeviceId, position: Position) -> FieldResult<()> {
        let mut devices = self.devices.borrow_mut();
        let slot = devices
            .get_mut(&device)
            .ok_or_else(|| FieldError::Precondition(format!("cannot move {}: not in the environment", device)))?;
        slot.position = position;
        Ok(())
    }

    /// Remove a device; its store (and anything staged in it) goes with it.
    pub fn remove_device(&self, device: DeviceId) -> bool {
        let removed = self.devices.borrow_mut().remove(&device).is_some();
        if removed {
            log::debug!("Removed {}", device);
        }
        removed
    }

    /// Mark `device` as running the program, reachable through `store`.
    pub fn attach_program(&self, device: DeviceId, store: StoreHandle) -> FieldResult<()> {
        let mut devices = self.devices.borrow_mut();
        let slot = devices
            .get_mut(&device)
            .ok_or_else(|| FieldError::Precondition(format!("cannot attach program to {}: not in the environment", device)))?;
        slot.store = Some(store);
        Ok(())
    }

    fn in_range(&self, from: &DeviceSlot, to: &DeviceSlot) -> bool {
        let range2 = from.communication_range * from.communication_range;
        match (&from.position, &to.position) {
            (Position::Planar(a), Position::Planar(b)) => distance2(a, b) < range2 && !is_intersect(a, b, &self.obstacles),
            (a, b) => a.euclidean_distance(b).is_some_and(|d| d * d < range2),
        }
    }
}

impl Environment for ArenaEnvironment {
    fn id(&self) -> EnvironmentId {
        self.id
    }

    fn contains(&self, device: DeviceId) -> bool {
        self.devices.borrow().contains_key(&device)
    }

    fn position_of(&self, device: DeviceId) -> Option<Position> {
        self.devices.borrow().get(&device).map(|slot| slot.position)
    }

    fn neighbors_of(&self, device: DeviceId) -> BTreeSet<DeviceId> {
        let devices = self.devices.borrow();
        let Some(me) = devices.get(&device) else {
            return BTreeSet::new();
        };
        devices
            .iter()
            .filter(|(other_id, other)| **other_id != device && self.in_range(me, other))
            .map(|(other_id, _)| *other_id)
            .collect()
    }

    fn message_store(&self, device: DeviceId) -> Option<StoreHandle> {
        self.devices.borrow().get(&device).and_then(|slot| slot.store.clone())
    }

    fn router(&self) -> Option<&dyn Router> {
        self.router.as_ref().map(|r| r as &dyn Router)
    }
}
