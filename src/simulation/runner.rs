//! Round-robin stepping harness.
//!
//! Stands in for a discrete-event engine: every round, each device fires
//! once in id order at evenly spread sub-times, evaluates its program,
//! stages its exports and delivers them to its current neighbors. Devices
//! can optionally drift with a Gaussian random walk between rounds.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::common::config::SimulatorConfig;
use crate::common::scene::Scene;
use crate::field::context::{APPROXIMATE_RANGE, DeviceExecutionContext, DeviceRuntime, DeviceSettings, USE_ROUTES};
use crate::field::error::{FieldError, FieldResult};
use crate::field::reaction::Reaction;
use crate::field::types::{DeviceId, SimTime, Value};

use super::environment::{ArenaEnvironment, Environment};
use super::geometry::point_in_any;
use super::programs::{AggregateProgram, program_for};
use super::types::{Point, Position};

/// Gaussian displacement applied to every device between rounds.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    step: Normal<f64>,
}

impl RandomWalk {
    pub fn new(sigma: f64) -> FieldResult<Self> {
        let step = Normal::new(0.0, sigma).map_err(|e| FieldError::Precondition(format!("invalid random walk sigma {}: {}", sigma, e)))?;
        Ok(RandomWalk { step })
    }

    fn displace(&self, rng: &mut StdRng, position: &Position) -> Position {
        match *position {
            Position::Planar(p) => Position::Planar(Point::new(p.x + self.step.sample(rng), p.y + self.step.sample(rng))),
            Position::Spatial { x, y, z } => Position::spatial(x + self.step.sample(rng), y + self.step.sample(rng), z + self.step.sample(rng)),
        }
    }
}

struct DeviceSlot {
    context: DeviceExecutionContext,
    reaction: Rc<Reaction>,
    program: Box<dyn AggregateProgram>,
    value: Option<Value>,
}

/// Outcome of one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub time: SimTime,
    pub executed: usize,
    pub deliveries: usize,
}

pub struct Simulator {
    environment: Rc<ArenaEnvironment>,
    rng: Rc<RefCell<StdRng>>,
    devices: BTreeMap<DeviceId, DeviceSlot>,
    settings: DeviceSettings,
    step_interval: f64,
    time: SimTime,
    rounds: u64,
    mobility: Option<RandomWalk>,
}

impl Simulator {
    pub fn new(environment: ArenaEnvironment, config: &SimulatorConfig) -> FieldResult<Self> {
        if !(config.step_interval.is_finite() && config.step_interval > 0.0) {
            return Err(FieldError::Precondition(format!("step interval must be positive, got {}", config.step_interval)));
        }
        let mobility = config.mobility_sigma.map(RandomWalk::new).transpose()?;
        Ok(Simulator {
            environment: Rc::new(environment),
            rng: Rc::new(RefCell::new(StdRng::seed_from_u64(config.seed))),
            devices: BTreeMap::new(),
            settings: config.device_settings(),
            step_interval: config.step_interval,
            time: SimTime::ZERO,
            rounds: 0,
            mobility,
        })
    }

    /// Build the arena and every device of `scene`, each running `config.program`.
    pub fn from_scene(scene: &Scene, config: &SimulatorConfig) -> FieldResult<Self> {
        let environment = if scene.routing {
            ArenaEnvironment::with_routing(scene.obstacles.clone(), scene.communication_range)
        } else {
            ArenaEnvironment::new(scene.obstacles.clone(), scene.communication_range)
        };
        let mut simulator = Simulator::new(environment, config)?;
        for device in &scene.devices {
            let runtime = simulator.add_device(DeviceId(device.device_id), device.position, Some(scene.range_of(device)), program_for(config.program, device.source))?;
            if device.use_routes {
                runtime.set_property(USE_ROUTES, true);
            }
            if let Some(window) = device.approximate_range {
                runtime.set_property(APPROXIMATE_RANGE, window);
            }
        }
        log::info!(
            "Scene ready: {} devices, {} obstacles, routing {}",
            simulator.device_count(),
            scene.obstacles.len(),
            if scene.routing { "on" } else { "off" }
        );
        Ok(simulator)
    }

    /// Place a device and start running `program` on it from the current time.
    pub fn add_device(&mut self, id: DeviceId, position: Position, communication_range: Option<f64>, program: Box<dyn AggregateProgram>) -> FieldResult<Rc<DeviceRuntime>> {
        let runtime = DeviceRuntime::new(id, self.settings)?;
        let range = communication_range.unwrap_or(self.environment.communication_range());
        self.environment.add_device_with_range(id, position, range)?;
        self.environment.attach_program(id, runtime.store())?;

        let reaction = Rc::new(Reaction::new(id, 1.0 / self.step_interval, self.time)?);
        let environment: Rc<dyn Environment> = self.environment.clone();
        let context = DeviceExecutionContext::new(runtime.clone(), environment, reaction.clone(), self.rng.clone())?;
        log::debug!("{} runs {}", id, program.name());
        self.devices.insert(
            id,
            DeviceSlot {
                context,
                reaction,
                program,
                value: None,
            },
        );
        Ok(runtime)
    }

    /// Take a device out of the arena; anything it had staged is dropped.
    pub fn remove_device(&mut self, id: DeviceId) -> bool {
        let removed = self.devices.remove(&id).is_some();
        self.environment.remove_device(id);
        removed
    }

    pub fn environment(&self) -> &ArenaEnvironment {
        &self.environment
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn runtime(&self, id: DeviceId) -> Option<&Rc<DeviceRuntime>> {
        self.devices.get(&id).map(|slot| slot.context.runtime())
    }

    pub fn context(&self, id: DeviceId) -> Option<&DeviceExecutionContext> {
        self.devices.get(&id).map(|slot| &slot.context)
    }

    /// Last value the device's program produced.
    pub fn value_of(&self, id: DeviceId) -> Option<&Value> {
        self.devices.get(&id).and_then(|slot| slot.value.as_ref())
    }

    pub fn values(&self) -> impl Iterator<Item = (DeviceId, Option<&Value>)> + '_ {
        self.devices.iter().map(|(id, slot)| (*id, slot.value.as_ref()))
    }

    /// Run one round: every device fires once, then devices move.
    pub fn step(&mut self) -> FieldResult<StepReport> {
        let count = self.devices.len();
        let interval = self.step_interval;
        let round_start = self.time;
        let mut deliveries = 0;

        for (index, slot) in self.devices.values_mut().enumerate() {
            let now = round_start.plus(interval * index as f64 / count as f64);
            slot.reaction.fire_with_next(now, now.plus(interval));
            let value = slot.program.evaluate(&mut slot.context)?;
            slot.context.export(value.clone());
            slot.context.stage_exports()?;
            deliveries += slot.context.deliver();
            log::trace!("{} at {}: {:?}", slot.context.identity(), now, value);
            slot.value = Some(value);
        }

        if let Some(walk) = &self.mobility {
            let mut rng = self.rng.borrow_mut();
            for id in self.devices.keys() {
                let Some(current) = self.environment.position_of(*id) else {
                    continue;
                };
                let next = walk.displace(&mut rng, &current);
                let blocked = next.as_planar().is_some_and(|p| point_in_any(p, self.environment.obstacles()));
                if !blocked {
                    self.environment.move_device(*id, next)?;
                }
            }
        }

        self.time = round_start.plus(interval);
        self.rounds += 1;
        log::debug!("Round {} done at {}: {} executions, {} deliveries", self.rounds, self.time, count, deliveries);
        Ok(StepReport {
            time: self.time,
            executed: count,
            deliveries,
        })
    }

    /// Run `rounds` rounds; returns the report of the last one.
    pub fn run(&mut self, rounds: u32) -> FieldResult<Option<StepReport>> {
        let mut last = None;
        for _ in 0..rounds {
            last = Some(self.step()?);
        }
        log::info!("Ran {} rounds, simulated time now {}", rounds, self.time);
        Ok(last)
    }
}
