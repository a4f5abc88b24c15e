//! Per-device execution context.
//!
//! A `DeviceExecutionContext` is what an aggregate program sees while one of
//! its devices executes: identity, time, neighbor-relative fields, distance
//! queries, randomness and the outbound staging slot. Everything that must
//! survive across steps and branches lives in the shared `DeviceRuntime`;
//! the context itself only adds the code path of the branch being evaluated
//! and the values exported from it.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rand::Rng;
use rand::rngs::StdRng;

use crate::simulation::environment::{Environment, StoreHandle};
use crate::simulation::types::{Point, Position};

use super::builder::{Field, FieldBuilder};
use super::distance_cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_IDLE_TIME, DistanceCache, DistanceMetric};
use super::error::{FieldError, FieldResult};
use super::message_store::{NeighborMessageStore, NeighborState};
use super::reaction::Reaction;
use super::types::{BranchKey, DeviceId, PayloadMap, SimTime, Value, payload_from};

/// Property opting a device into routed distances.
pub const USE_ROUTES: &str = "use_routes";
/// Property holding the approximate-range tolerance window.
pub const APPROXIMATE_RANGE: &str = "approximate_range";

/// Construction parameters of a device runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSettings {
    /// Message retention window; NaN means topology-bound retention.
    pub retention_time: f64,
    pub cache_capacity: usize,
    pub cache_idle_time: f64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            retention_time: f64::NAN,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_idle_time: DEFAULT_CACHE_IDLE_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ApproximateRange {
    value: f64,
    valid_until: f64,
}

/// State of one device shared by all of its branch contexts.
#[derive(Debug)]
pub struct DeviceRuntime {
    id: DeviceId,
    store: StoreHandle,
    distances: RefCell<DistanceCache>,
    approximate: Cell<ApproximateRange>,
    properties: RefCell<BTreeMap<String, Value>>,
}

impl DeviceRuntime {
    pub fn new(id: DeviceId, settings: DeviceSettings) -> FieldResult<Rc<Self>> {
        let store = NeighborMessageStore::new(id, settings.retention_time)?;
        let distances = DistanceCache::new(id, settings.cache_capacity, settings.cache_idle_time)?;
        Ok(Rc::new(DeviceRuntime {
            id,
            store: Rc::new(RefCell::new(store)),
            distances: RefCell::new(distances),
            approximate: Cell::new(ApproximateRange {
                value: f64::NAN,
                valid_until: f64::NEG_INFINITY,
            }),
            properties: RefCell::new(BTreeMap::new()),
        }))
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Handle to hand to the environment so neighbors can deliver here.
    pub fn store(&self) -> StoreHandle {
        self.store.clone()
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.borrow().get(name).cloned()
    }

    pub fn set_property(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.borrow_mut().insert(name.into(), value.into());
    }

    pub fn uses_routes(&self) -> bool {
        self.property(USE_ROUTES).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Tolerance window of the approximate routed range, if configured.
    ///
    /// Windows that are not finite and non-negative are ignored.
    pub fn approximate_tolerance(&self) -> Option<f64> {
        let window = self.property(APPROXIMATE_RANGE)?.as_f64()?;
        if window.is_finite() && window >= 0.0 {
            Some(window)
        } else {
            log::warn!("{}: ignoring invalid {} window {}", self.id, APPROXIMATE_RANGE, window);
            None
        }
    }

    /// Number of distances computed (not served from the cache).
    pub fn distance_computations(&self) -> u64 {
        self.distances.borrow().computations()
    }
}

/// Destination of a distance query.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Device(DeviceId),
    /// An identity as a program may hold it: unvalidated and possibly negative.
    RawId(i64),
    Coordinates(Vec<f64>),
    Position(Position),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Device(id) => write!(f, "{}", id),
            Target::RawId(raw) => write!(f, "#{}", raw),
            Target::Coordinates(c) => write!(f, "{:?}", c),
            Target::Position(p) => write!(f, "{}", p),
        }
    }
}

impl From<DeviceId> for Target {
    fn from(id: DeviceId) -> Self {
        Target::Device(id)
    }
}

impl From<i64> for Target {
    fn from(raw: i64) -> Self {
        Target::RawId(raw)
    }
}

impl From<Vec<f64>> for Target {
    fn from(coordinates: Vec<f64>) -> Self {
        Target::Coordinates(coordinates)
    }
}

impl From<&[f64]> for Target {
    fn from(coordinates: &[f64]) -> Self {
        Target::Coordinates(coordinates.to_vec())
    }
}

impl From<Position> for Target {
    fn from(position: Position) -> Self {
        Target::Position(position)
    }
}

impl From<Point> for Target {
    fn from(point: Point) -> Self {
        Target::Position(Position::Planar(point))
    }
}

/// One device's view of the world while one branch of its program executes.
pub struct DeviceExecutionContext {
    device: Rc<DeviceRuntime>,
    environment: Rc<dyn Environment>,
    reaction: Rc<Reaction>,
    rng: Rc<RefCell<StdRng>>,
    branch: BranchKey,
    exports: BTreeMap<BranchKey, Value>,
    hash: OnceCell<u64>,
}

impl DeviceExecutionContext {
    /// Root context of `device`, driven by `reaction` inside `environment`.
    pub fn new(device: Rc<DeviceRuntime>, environment: Rc<dyn Environment>, reaction: Rc<Reaction>, rng: Rc<RefCell<StdRng>>) -> FieldResult<Self> {
        if reaction.device() != device.id() {
            return Err(FieldError::Precondition(format!("reaction of {} cannot drive {}", reaction.device(), device.id())));
        }
        Ok(DeviceExecutionContext {
            device,
            environment,
            reaction,
            rng,
            branch: BranchKey::root(),
            exports: BTreeMap::new(),
            hash: OnceCell::new(),
        })
    }

    pub fn identity(&self) -> DeviceId {
        self.device.id()
    }

    pub fn runtime(&self) -> &Rc<DeviceRuntime> {
        &self.device
    }

    pub fn environment(&self) -> &dyn Environment {
        &*self.environment
    }

    pub fn current_time(&self) -> SimTime {
        self.reaction.time()
    }

    pub fn branch(&self) -> &BranchKey {
        &self.branch
    }

    pub fn device_position(&self) -> FieldResult<Position> {
        self.position_of(self.identity())
    }

    fn position_of(&self, device: DeviceId) -> FieldResult<Position> {
        self.environment.position_of(device).ok_or_else(|| FieldError::UnknownDevice {
            device: self.identity(),
            target: device.to_string(),
        })
    }

    /// Retained neighbor messages as of the current time.
    pub fn neighbor_state(&self) -> Rc<NeighborState> {
        self.device.store.borrow_mut().neighbor_state(&*self.environment, self.current_time())
    }

    /// Value a neighbor exported under `branch` in its last retained message.
    pub fn neighbor_value(&self, neighbor: DeviceId, branch: &BranchKey) -> Option<Value> {
        self.neighbor_state().value(neighbor, branch).cloned()
    }

    /// Build a field of positions, skipping neighbors that left the environment.
    fn positional_field<V, F>(&self, mut f: F) -> FieldResult<Field<V>>
    where
        F: FnMut(DeviceId, &Position) -> FieldResult<V>,
    {
        let state = self.neighbor_state();
        let local = self.identity();
        FieldBuilder::new(local, &state).try_build(|device| match self.environment.position_of(device) {
            Some(position) => f(device, &position).map(Some),
            None if device == local => Err(FieldError::UnknownDevice {
                device: local,
                target: local.to_string(),
            }),
            None => {
                log::warn!("{}: skipping {} in positional field, no longer in the environment", local, device);
                Ok(None)
            }
        })
    }

    /// Planar displacement from this device to each neighbor.
    pub fn nbr_vector(&self) -> FieldResult<Field<(f64, f64)>> {
        let own = self.device_position()?;
        let origin = *self.planar(&own)?;
        self.positional_field(|_, position| {
            let p = self.planar(position)?;
            Ok((p.x - origin.x, p.y - origin.y))
        })
    }

    fn planar<'p>(&self, position: &'p Position) -> FieldResult<&'p Point> {
        position.as_planar().ok_or(FieldError::UnsupportedDimension {
            device: self.identity(),
            position: *position,
            dimensions: position.dimensions(),
        })
    }

    /// Distance from this device to each neighbor.
    ///
    /// Straight line unless the device opted into routes and the environment
    /// can route. With an `approximate_range` window the routed value is
    /// refreshed at most once per window and shared by every entry.
    pub fn nbr_range(&self) -> FieldResult<Field<f64>> {
        let origin = self.device_position()?;
        let routed = self.device.uses_routes() && self.environment.router().is_some();
        if !routed {
            return self.positional_field(|_, position| DistanceMetric::Euclidean.compute(self.identity(), &*self.environment, &origin, position));
        }
        match self.device.approximate_tolerance() {
            None => self.positional_field(|_, position| self.cached_distance(&origin, position, DistanceMetric::Routed)),
            Some(window) => self.positional_field(|_, position| self.approximate_distance(&origin, position, window)),
        }
    }

    fn approximate_distance(&self, origin: &Position, destination: &Position, window: f64) -> FieldResult<f64> {
        let now = self.current_time().as_f64();
        let mut state = self.device.approximate.get();
        if now > state.valid_until {
            let value = self.cached_distance(origin, destination, DistanceMetric::Routed)?;
            assert!(!value.is_nan(), "approximate range of {} recomputed to NaN", self.identity());
            state = ApproximateRange {
                value,
                valid_until: now + window,
            };
            self.device.approximate.set(state);
            log::debug!("{}: approximate range refreshed to {} until t={}", self.identity(), value, state.valid_until);
        }
        Ok(state.value)
    }

    fn cached_distance(&self, origin: &Position, destination: &Position, metric: DistanceMetric) -> FieldResult<f64> {
        self.device
            .distances
            .borrow_mut()
            .distance_to(&*self.environment, self.current_time(), origin, destination, metric)
    }

    /// Age of each retained neighbor message; zero for the local entry.
    pub fn nbr_lag(&self) -> FieldResult<Field<f64>> {
        let state = self.neighbor_state();
        let now = self.current_time();
        let local = self.identity();
        FieldBuilder::new(local, &state).build(|device| {
            let recorded = if device == local { Some(now) } else { state.recorded_at(device) };
            let recorded = recorded.ok_or_else(|| FieldError::Precondition(format!("{} has no message from {}", local, device)))?;
            Ok(now.since(recorded))
        })
    }

    /// The driving reaction's forward step interval, for every entry.
    pub fn nbr_delay(&self) -> FieldResult<Field<f64>> {
        let state = self.neighbor_state();
        let delay = self.reaction.step_interval();
        FieldBuilder::new(self.identity(), &state).build(|_| Ok(delay))
    }

    fn resolve(&self, target: Target) -> FieldResult<Position> {
        let device = self.identity();
        match target {
            Target::Device(id) => self.position_of(id),
            Target::RawId(raw) => {
                let id = u32::try_from(raw).map_err(|_| FieldError::UnknownDevice {
                    device,
                    target: format!("#{}", raw),
                })?;
                self.position_of(DeviceId(id))
            }
            Target::Coordinates(c) => match c.as_slice() {
                [x, y] => Ok(Position::planar(*x, *y)),
                _ => Err(FieldError::InvalidArgument {
                    device,
                    reason: format!("expected 2 coordinates, got {}", c.len()),
                }),
            },
            Target::Position(p) => Ok(p),
        }
    }

    /// Distance to a device or a location, routed when this device uses routes.
    pub fn distance_to(&self, target: impl Into<Target>) -> FieldResult<f64> {
        let destination = self.resolve(target.into())?;
        let origin = self.device_position()?;
        if self.device.uses_routes() && self.environment.router().is_some() {
            self.cached_distance(&origin, &destination, DistanceMetric::Routed)
        } else {
            DistanceMetric::Euclidean.compute(self.identity(), &*self.environment, &origin, &destination)
        }
    }

    /// Routed distance to a device or a location; the environment must route.
    pub fn routing_distance_to(&self, target: impl Into<Target>) -> FieldResult<f64> {
        if self.environment.router().is_none() {
            return Err(FieldError::MissingCapability {
                device: self.identity(),
                capability: "route computation",
            });
        }
        let destination = self.resolve(target.into())?;
        let origin = self.device_position()?;
        self.cached_distance(&origin, &destination, DistanceMetric::Routed)
    }

    /// Uniform draw in `[0, 1)` from the simulation-wide generator.
    pub fn random_draw(&self) -> f64 {
        self.rng.borrow_mut().r#gen::<f64>()
    }

    /// Record `value` as this branch's result.
    pub fn export(&mut self, value: impl Into<Value>) {
        self.exports.insert(self.branch.clone(), value.into());
    }

    pub fn exports(&self) -> &BTreeMap<BranchKey, Value> {
        &self.exports
    }

    /// Replace the payload neighbors will receive on the next delivery.
    pub fn stage(&self, payload: impl Into<Option<PayloadMap>>) -> FieldResult<()> {
        self.device.store.borrow_mut().stage(payload)
    }

    /// Stage everything exported by this context (and joined children).
    pub fn stage_exports(&mut self) -> FieldResult<()> {
        let exports = std::mem::take(&mut self.exports);
        self.stage(payload_from(exports))
    }

    /// Push the staged payload to current neighbors; returns the recipient count.
    pub fn deliver(&self) -> usize {
        self.device.store.borrow_mut().deliver(&*self.environment, self.current_time())
    }

    /// Context for sub-branch `branch` of the current code path.
    pub fn fork(&self, branch: u16) -> Self {
        DeviceExecutionContext {
            device: self.device.clone(),
            environment: self.environment.clone(),
            reaction: self.reaction.clone(),
            rng: self.rng.clone(),
            branch: self.branch.child(branch),
            exports: BTreeMap::new(),
            hash: OnceCell::new(),
        }
    }

    /// Fold a forked child's exports back into this context.
    pub fn join(&mut self, child: DeviceExecutionContext) -> FieldResult<()> {
        if child != *self {
            return Err(FieldError::Precondition(format!("cannot join a context of {} into {}", child.identity(), self.identity())));
        }
        self.exports.extend(child.exports);
        Ok(())
    }

    fn cached_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            self.identity().hash(&mut hasher);
            self.environment.id().hash(&mut hasher);
            self.reaction.id().hash(&mut hasher);
            hasher.finish()
        })
    }
}

impl PartialEq for DeviceExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity() && self.environment.id() == other.environment.id() && self.reaction.id() == other.reaction.id()
    }
}

impl Eq for DeviceExecutionContext {}

impl Hash for DeviceExecutionContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.cached_hash());
    }
}

impl fmt::Debug for DeviceExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceExecutionContext")
            .field("device", &self.identity())
            .field("environment", &self.environment.id())
            .field("reaction", &self.reaction.id())
            .field("branch", &self.branch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::environment::ArenaEnvironment;
    use crate::simulation::types::Obstacle;
    use rand::SeedableRng;
    use std::collections::HashSet;

    struct Rig {
        env: Rc<ArenaEnvironment>,
        rng: Rc<RefCell<StdRng>>,
    }

    impl Rig {
        fn new(env: ArenaEnvironment) -> Self {
            Rig {
                env: Rc::new(env),
                rng: Rc::new(RefCell::new(StdRng::seed_from_u64(7))),
            }
        }

        fn device(&self, id: u32, position: Position, settings: DeviceSettings) -> (DeviceExecutionContext, Rc<Reaction>) {
            let runtime = DeviceRuntime::new(DeviceId(id), settings).unwrap();
            self.env.add_device(DeviceId(id), position).unwrap();
            self.env.attach_program(DeviceId(id), runtime.store()).unwrap();
            let reaction = Rc::new(Reaction::new(DeviceId(id), 1.0, SimTime::ZERO).unwrap());
            let env: Rc<dyn Environment> = self.env.clone();
            let ctx = DeviceExecutionContext::new(runtime, env, reaction.clone(), self.rng.clone()).unwrap();
            (ctx, reaction)
        }
    }

    fn step(ctx: &mut DeviceExecutionContext, reaction: &Reaction, t: f64, value: f64) {
        reaction.fire(SimTime::new(t));
        ctx.export(value);
        ctx.stage_exports().unwrap();
        ctx.deliver();
    }

    fn retained() -> DeviceSettings {
        DeviceSettings {
            retention_time: 100.0,
            ..DeviceSettings::default()
        }
    }

    #[test]
    fn fields_include_the_local_device() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (ctx, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        let range = ctx.nbr_range().unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(*range.local_value(), 0.0);
        assert_eq!(*ctx.nbr_vector().unwrap().local_value(), (0.0, 0.0));
        assert_eq!(*ctx.nbr_lag().unwrap().local_value(), 0.0);
        assert_eq!(*ctx.nbr_delay().unwrap().local_value(), 1.0);
    }

    #[test]
    fn neighbor_fields_follow_delivered_messages() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 6.0));
        let (mut a, ra) = rig.device(1, Position::planar(0.0, 0.0), retained());
        let (mut b, rb) = rig.device(2, Position::planar(3.0, 4.0), retained());

        step(&mut b, &rb, 0.5, 2.0);
        step(&mut a, &ra, 2.0, 1.0);

        assert_eq!(a.nbr_range().unwrap().get(DeviceId(2)), Some(&5.0));
        assert_eq!(a.nbr_vector().unwrap().get(DeviceId(2)), Some(&(3.0, 4.0)));
        assert_eq!(a.nbr_lag().unwrap().get(DeviceId(2)), Some(&1.5));
        assert_eq!(a.neighbor_value(DeviceId(2), &BranchKey::root()), Some(Value::Float(2.0)));
        assert_eq!(b.neighbor_value(DeviceId(1), &BranchKey::root()), Some(Value::Float(1.0)));
    }

    #[test]
    fn removed_neighbors_leave_positional_fields_only() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (a, ra) = rig.device(1, Position::planar(0.0, 0.0), retained());
        let (mut b, rb) = rig.device(2, Position::planar(1.0, 0.0), retained());
        step(&mut b, &rb, 0.0, 1.0);
        rig.env.remove_device(DeviceId(2));
        ra.fire(SimTime::new(1.0));

        assert!(!a.nbr_range().unwrap().contains(DeviceId(2)));
        assert!(!a.nbr_vector().unwrap().contains(DeviceId(2)));
        assert_eq!(a.nbr_lag().unwrap().get(DeviceId(2)), Some(&1.0));
        assert!(a.nbr_delay().unwrap().contains(DeviceId(2)));
    }

    #[test]
    fn nbr_vector_rejects_spatial_positions() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (ctx, _) = rig.device(1, Position::spatial(0.0, 0.0, 1.0), DeviceSettings::default());
        assert!(matches!(ctx.nbr_vector(), Err(FieldError::UnsupportedDimension { dimensions: 3, .. })));
        assert!(ctx.nbr_range().is_ok());
    }

    #[test]
    fn routed_range_goes_around_walls() {
        let wall = Obstacle::rectangle(4.0, -5.0, 6.0, 5.0);
        let rig = Rig::new(ArenaEnvironment::with_routing(vec![wall], 20.0));
        let (a, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        rig.device(2, Position::planar(10.0, 0.0), DeviceSettings::default());

        let straight = a.distance_to(DeviceId(2)).unwrap();
        assert_eq!(straight, 10.0);
        a.runtime().set_property(USE_ROUTES, true);
        let routed = a.distance_to(DeviceId(2)).unwrap();
        assert!(routed > straight);
        assert_eq!(a.routing_distance_to(DeviceId(2)).unwrap(), routed);
    }

    #[test]
    fn routing_request_on_plain_arena_fails() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (ctx, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        rig.device(2, Position::planar(1.0, 0.0), DeviceSettings::default());
        assert!(matches!(ctx.routing_distance_to(DeviceId(2)), Err(FieldError::MissingCapability { .. })));
        // Opting into routes without a router falls back to straight lines.
        ctx.runtime().set_property(USE_ROUTES, true);
        assert_eq!(ctx.distance_to(DeviceId(2)).unwrap(), 1.0);
    }

    #[test]
    fn distance_targets_are_validated() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (ctx, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        rig.device(2, Position::planar(0.0, 2.0), DeviceSettings::default());

        assert_eq!(ctx.distance_to(2i64).unwrap(), 2.0);
        assert_eq!(ctx.distance_to(vec![3.0, 4.0]).unwrap(), 5.0);
        assert_eq!(ctx.distance_to(Point::new(0.0, 1.0)).unwrap(), 1.0);
        assert!(matches!(ctx.distance_to(DeviceId(42)), Err(FieldError::UnknownDevice { .. })));
        assert!(matches!(ctx.distance_to(-1i64), Err(FieldError::UnknownDevice { .. })));
        assert!(matches!(ctx.distance_to(vec![1.0, 2.0, 3.0]), Err(FieldError::InvalidArgument { .. })));
        assert!(matches!(ctx.distance_to(Position::spatial(0.0, 0.0, 1.0)), Err(FieldError::TypeMismatch { .. })));
    }

    #[test]
    fn routed_nbr_range_detours_and_hits_the_cache() {
        let wall = Obstacle::rectangle(4.0, -5.0, 6.0, 5.0);
        let rig = Rig::new(ArenaEnvironment::with_routing(vec![wall], 20.0));
        let (a, ra) = rig.device(1, Position::planar(0.0, 0.0), retained());
        let (mut b, rb) = rig.device(2, Position::planar(3.0, 8.0), retained());
        a.runtime().set_property(USE_ROUTES, true);
        step(&mut b, &rb, 0.0, 0.0);
        // Still retained once the wall is between them.
        rig.env.move_device(DeviceId(2), Position::planar(10.0, 0.0)).unwrap();

        ra.fire(SimTime::new(1.0));
        let range = a.nbr_range().unwrap();
        assert!(*range.get(DeviceId(2)).unwrap() > 10.0);
        assert_eq!(*range.local_value(), 0.0);
        let computed = a.runtime().distance_computations();

        ra.fire(SimTime::new(1.5));
        assert_eq!(a.nbr_range().unwrap(), range);
        assert_eq!(a.runtime().distance_computations(), computed);
    }

    #[test]
    fn nbr_range_without_router_stays_straight() {
        let wall = Obstacle::rectangle(4.0, -5.0, 6.0, 5.0);
        let rig = Rig::new(ArenaEnvironment::new(vec![wall], 20.0));
        let (a, ra) = rig.device(1, Position::planar(0.0, 0.0), retained());
        let (mut b, rb) = rig.device(2, Position::planar(3.0, 8.0), retained());
        a.runtime().set_property(USE_ROUTES, true);
        step(&mut b, &rb, 0.0, 0.0);
        rig.env.move_device(DeviceId(2), Position::planar(10.0, 0.0)).unwrap();

        ra.fire(SimTime::new(1.0));
        assert_eq!(a.nbr_range().unwrap().get(DeviceId(2)), Some(&10.0));
        assert_eq!(a.runtime().distance_computations(), 0);
    }

    #[test]
    fn invalid_approximate_window_is_ignored() {
        let rig = Rig::new(ArenaEnvironment::with_routing(Vec::new(), 50.0));
        let (a, ra) = rig.device(1, Position::planar(0.0, 0.0), retained());
        let (mut b, rb) = rig.device(2, Position::planar(3.0, 0.0), retained());
        a.runtime().set_property(USE_ROUTES, true);
        a.runtime().set_property(APPROXIMATE_RANGE, -1.0);
        assert_eq!(a.runtime().approximate_tolerance(), None);
        a.runtime().set_property(APPROXIMATE_RANGE, f64::NAN);
        assert_eq!(a.runtime().approximate_tolerance(), None);
        step(&mut b, &rb, 0.0, 0.0);

        ra.fire(SimTime::new(0.0));
        assert_eq!(a.nbr_range().unwrap().get(DeviceId(2)), Some(&3.0));
        rig.env.move_device(DeviceId(2), Position::planar(7.0, 0.0)).unwrap();
        ra.fire(SimTime::new(0.5));
        // Per-destination routing, not a frozen shared value.
        assert_eq!(a.nbr_range().unwrap().get(DeviceId(2)), Some(&7.0));
        assert_eq!(*a.nbr_range().unwrap().local_value(), 0.0);
    }

    #[test]
    fn approximate_range_is_reused_within_window() {
        let rig = Rig::new(ArenaEnvironment::with_routing(Vec::new(), 50.0));
        let (a, ra) = rig.device(1, Position::planar(0.0, 0.0), retained());
        let (mut b, rb) = rig.device(2, Position::planar(3.0, 0.0), retained());
        a.runtime().set_property(USE_ROUTES, true);
        a.runtime().set_property(APPROXIMATE_RANGE, 10.0);
        step(&mut b, &rb, 0.0, 0.0);

        ra.fire(SimTime::new(0.0));
        assert_eq!(a.nbr_range().unwrap().get(DeviceId(2)), Some(&3.0));

        rig.env.move_device(DeviceId(2), Position::planar(7.0, 0.0)).unwrap();
        ra.fire(SimTime::new(5.0));
        assert_eq!(a.nbr_range().unwrap().get(DeviceId(2)), Some(&3.0));

        ra.fire(SimTime::new(11.0));
        assert_eq!(a.nbr_range().unwrap().get(DeviceId(2)), Some(&7.0));
    }

    #[test]
    fn approximate_range_is_one_value_per_device() {
        let rig = Rig::new(ArenaEnvironment::with_routing(Vec::new(), 50.0));
        let (a, ra) = rig.device(1, Position::planar(0.0, 0.0), retained());
        let (mut b, rb) = rig.device(2, Position::planar(3.0, 0.0), retained());
        let (mut c, rc) = rig.device(3, Position::planar(0.0, 8.0), retained());
        a.runtime().set_property(USE_ROUTES, true);
        a.runtime().set_property(APPROXIMATE_RANGE, 10.0);
        step(&mut b, &rb, 0.0, 0.0);
        step(&mut c, &rc, 0.0, 0.0);

        ra.fire(SimTime::new(1.0));
        let range = a.nbr_range().unwrap();
        // Refreshed on the first neighbor evaluated, then shared by all entries.
        assert_eq!(range.get(DeviceId(2)), Some(&3.0));
        assert_eq!(range.get(DeviceId(3)), Some(&3.0));
        assert_eq!(*range.local_value(), 3.0);
    }

    #[test]
    fn equality_ignores_branch_and_object_identity() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (a, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        let (b, _) = rig.device(2, Position::planar(1.0, 0.0), DeviceSettings::default());
        let child = a.fork(3);
        assert_eq!(child, a);
        assert_ne!(a, b);

        let set: HashSet<&DeviceExecutionContext> = [&a, &child, &b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn forks_keep_their_own_exports() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (mut root, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        let mut left = root.fork(0);
        let mut right = root.fork(1);
        left.export(1i64);
        right.export(2i64);
        assert_eq!(left.exports().len(), 1);
        assert!(root.exports().is_empty());

        root.export(0i64);
        root.join(left).unwrap();
        root.join(right).unwrap();
        assert_eq!(root.exports().get(&BranchKey::from_path(&[1])), Some(&Value::Int(2)));
        assert_eq!(root.exports().len(), 3);
    }

    #[test]
    fn joining_a_foreign_context_fails() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (mut a, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        let (b, _) = rig.device(2, Position::planar(1.0, 0.0), DeviceSettings::default());
        assert!(matches!(a.join(b.fork(0)), Err(FieldError::Precondition(_))));
    }

    #[test]
    fn random_draws_share_one_generator() {
        let rig = Rig::new(ArenaEnvironment::new(Vec::new(), 5.0));
        let (a, _) = rig.device(1, Position::planar(0.0, 0.0), DeviceSettings::default());
        let (b, _) = rig.device(2, Position::planar(1.0, 0.0), DeviceSettings::default());
        let first = a.random_draw();
        let second = b.random_draw();
        assert!((0.0..1.0).contains(&first));
        assert_ne!(first, second);

        let mut replay = StdRng::seed_from_u64(7);
        assert_eq!(first, replay.r#gen::<f64>());
        assert_eq!(second, replay.r#gen::<f64>());
    }

    #[test]
    fn mismatched_reaction_is_rejected() {
        let env: Rc<dyn Environment> = Rc::new(ArenaEnvironment::new(Vec::new(), 1.0));
        let runtime = DeviceRuntime::new(DeviceId(1), DeviceSettings::default()).unwrap();
        let reaction = Rc::new(Reaction::new(DeviceId(2), 1.0, SimTime::ZERO).unwrap());
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(1)));
        assert!(DeviceExecutionContext::new(runtime, env, reaction, rng).is_err());
    }

    #[test]
    fn negative_retention_prevents_runtime_creation() {
        let settings = DeviceSettings {
            retention_time: -1.0,
            ..DeviceSettings::default()
        };
        assert!(matches!(DeviceRuntime::new(DeviceId(1), settings), Err(FieldError::Precondition(_))));
    }
}
