//! Per-device memoized distance function.
//!
//! Routed distances are expensive (a visibility graph search per query), and
//! aggregate programs ask for the same destinations every step. The cache
//! keeps at most `capacity` entries, forgets entries that have not been
//! accessed for `idle_time` units of simulated time, and evicts the least
//! recently accessed entry when full. Failed computations are never stored.

use std::collections::HashMap;

use crate::simulation::environment::Environment;
use crate::simulation::routing::RouteError;
use crate::simulation::types::Position;

use super::error::{FieldError, FieldResult};
use super::types::{DeviceId, SimTime};

/// Default bound on cached destinations per device.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
/// Default simulated idle time after which an entry expires.
pub const DEFAULT_CACHE_IDLE_TIME: f64 = 4.0;

/// How a distance is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceMetric {
    /// Straight line between the two positions.
    Euclidean,
    /// Length of the route the environment computes between them.
    Routed,
}

impl DistanceMetric {
    /// Compute the distance from `from` to `to` on behalf of `device`.
    pub fn compute(self, device: DeviceId, env: &dyn Environment, from: &Position, to: &Position) -> FieldResult<f64> {
        match self {
            DistanceMetric::Euclidean => from.euclidean_distance(to).ok_or(FieldError::TypeMismatch {
                device,
                from: *from,
                to: *to,
            }),
            DistanceMetric::Routed => {
                let router = env.router().ok_or(FieldError::MissingCapability {
                    device,
                    capability: "route computation",
                })?;
                if !router.supports(from) || !router.supports(to) {
                    return Err(FieldError::TypeMismatch {
                        device,
                        from: *from,
                        to: *to,
                    });
                }
                let failed = |source: RouteError| FieldError::DistanceComputation {
                    device,
                    from: *from,
                    to: *to,
                    source,
                };
                let route = router.compute_route(from, to).map_err(failed)?;
                if route.length.is_nan() {
                    return Err(failed(RouteError::NotANumber));
                }
                Ok(route.length)
            }
        }
    }
}

type CacheKey = ([u64; 3], DistanceMetric);

#[derive(Debug, Clone)]
struct CacheEntry {
    origin: Position,
    distance: f64,
    last_access: SimTime,
    access_seq: u64,
}

/// Bounded, idle-expiring distance cache keyed by destination.
///
/// An entry also remembers the origin it was computed from; a lookup from a
/// different origin (the device moved) recomputes and overwrites it.
#[derive(Debug)]
pub struct DistanceCache {
    owner: DeviceId,
    capacity: usize,
    idle_time: f64,
    entries: HashMap<CacheKey, CacheEntry>,
    access_seq: u64,
    computations: u64,
    evictions: u64,
}

impl DistanceCache {
    pub fn new(owner: DeviceId, capacity: usize, idle_time: f64) -> FieldResult<Self> {
        if capacity == 0 {
            return Err(FieldError::Precondition("distance cache capacity must be at least 1".into()));
        }
        if idle_time.is_nan() || idle_time < 0.0 {
            return Err(FieldError::Precondition(format!("distance cache idle time must be non-negative, got {}", idle_time)));
        }
        Ok(DistanceCache {
            owner,
            capacity,
            idle_time,
            entries: HashMap::new(),
            access_seq: 0,
            computations: 0,
            evictions: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distance computations actually performed (cache misses that succeeded or failed).
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// Entries dropped because the cache was full.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Distance from `origin` to `destination`, served from the cache when possible.
    pub fn distance_to(&mut self, env: &dyn Environment, now: SimTime, origin: &Position, destination: &Position, metric: DistanceMetric) -> FieldResult<f64> {
        self.expire_idle(now);
        self.access_seq += 1;
        let key = (destination.cache_key(), metric);

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.origin == *origin {
                entry.last_access = now;
                entry.access_seq = self.access_seq;
                return Ok(entry.distance);
            }
        }

        self.computations += 1;
        let distance = metric.compute(self.owner, env, origin, destination)?;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_least_recent();
        }
        self.entries.insert(
            key,
            CacheEntry {
                origin: *origin,
                distance,
                last_access: now,
                access_seq: self.access_seq,
            },
        );
        Ok(distance)
    }

    fn expire_idle(&mut self, now: SimTime) {
        let idle_time = self.idle_time;
        let before = self.entries.len();
        self.entries.retain(|_, entry| now.since(entry.last_access) <= idle_time);
        let expired = before - self.entries.len();
        if expired > 0 {
            log::debug!("{} distance cache expired {} idle entr(ies) at {}", self.owner, expired, now);
        }
    }

    fn evict_least_recent(&mut self) {
        let oldest = self.entries.iter().min_by_key(|(_, entry)| entry.access_seq).map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions += 1;
            log::debug!("{} distance cache full ({}), evicted least recently used entry", self.owner, self.capacity);
        }
    }
}
