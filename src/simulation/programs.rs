//! Sample aggregate programs driven by the stepping harness.

use crate::common::config::ProgramKind;
use crate::field::context::DeviceExecutionContext;
use crate::field::error::FieldResult;
use crate::field::types::Value;

/// One round of an aggregate program on one device.
///
/// The harness exports the returned value under the context's root branch,
/// together with whatever the program exported from forked branches.
pub trait AggregateProgram {
    fn name(&self) -> &'static str;

    fn evaluate(&mut self, ctx: &mut DeviceExecutionContext) -> FieldResult<Value>;
}

/// Build the program `kind` for one device.
pub fn program_for(kind: ProgramKind, source: bool) -> Box<dyn AggregateProgram> {
    match kind {
        ProgramKind::HopGradient => Box::new(HopGradient::new(source)),
        ProgramKind::MaxGossip => Box::new(MaxGossip::default()),
    }
}

/// Distance to the nearest source, following `nbr_range`.
///
/// Also keeps a hop count in branch 0, aligned only with neighbors'
/// values from the same branch.
#[derive(Debug, Clone)]
pub struct HopGradient {
    source: bool,
}

impl HopGradient {
    pub fn new(source: bool) -> Self {
        HopGradient { source }
    }
}

impl AggregateProgram for HopGradient {
    fn name(&self) -> &'static str {
        "hop-gradient"
    }

    fn evaluate(&mut self, ctx: &mut DeviceExecutionContext) -> FieldResult<Value> {
        let range = ctx.nbr_range()?;
        let state = ctx.neighbor_state();
        let root = ctx.branch().clone();
        let mut hops_branch = ctx.fork(0);
        let hops_key = hops_branch.branch().clone();

        let (distance, hops) = if self.source {
            (0.0, Some(0))
        } else {
            let through = range.map(|id, r| state.value(id, &root).and_then(Value::as_f64).map_or(f64::INFINITY, |d| d + r));
            let distance = through.min_neighbor().map_or(f64::INFINITY, |(_, d)| d);
            let hops = range.neighbors().filter_map(|(id, _)| state.value(id, &hops_key).and_then(Value::as_i64)).min().map(|h| h + 1);
            (distance, hops)
        };

        if let Some(hops) = hops {
            hops_branch.export(hops);
        }
        ctx.join(hops_branch)?;
        Ok(Value::Float(distance))
    }
}

/// Spreads the largest random draw across the network.
#[derive(Debug, Clone, Default)]
pub struct MaxGossip {
    own: Option<f64>,
}

impl AggregateProgram for MaxGossip {
    fn name(&self) -> &'static str {
        "max-gossip"
    }

    fn evaluate(&mut self, ctx: &mut DeviceExecutionContext) -> FieldResult<Value> {
        let own = *self.own.get_or_insert_with(|| ctx.random_draw());
        let state = ctx.neighbor_state();
        let root = ctx.branch().clone();
        let best = state.devices().filter_map(|id| state.value(id, &root).and_then(Value::as_f64)).fold(own, f64::max);
        Ok(Value::Float(best))
    }
}
