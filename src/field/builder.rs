//! Fields: immutable neighbor-indexed values.
//!
//! A `Field<V>` maps every known neighbor (and always the local device) to a
//! value computed locally. `FieldBuilder` applies one per-device function to
//! the local device and to every device in a `NeighborState` snapshot.

use std::collections::BTreeMap;

use super::error::{FieldError, FieldResult};
use super::message_store::NeighborState;
use super::types::DeviceId;

/// Immutable mapping from device to value, always holding the local entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<V> {
    local: DeviceId,
    values: BTreeMap<DeviceId, V>,
}

impl<V> Field<V> {
    pub fn local_id(&self) -> DeviceId {
        self.local
    }

    pub fn local_value(&self) -> &V {
        // Construction guarantees the local entry.
        &self.values[&self.local]
    }

    pub fn get(&self, device: DeviceId) -> Option<&V> {
        self.values.get(&device)
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.values.contains_key(&device)
    }

    /// Number of entries, local one included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &V)> + '_ {
        self.values.iter().map(|(id, v)| (*id, v))
    }

    /// Entries of everyone but the local device.
    pub fn neighbors(&self) -> impl Iterator<Item = (DeviceId, &V)> + '_ {
        let local = self.local;
        self.iter().filter(move |(id, _)| *id != local)
    }

    pub fn map<W, F>(&self, mut f: F) -> Field<W>
    where
        F: FnMut(DeviceId, &V) -> W,
    {
        Field {
            local: self.local,
            values: self.values.iter().map(|(id, v)| (*id, f(*id, v))).collect(),
        }
    }
}

impl Field<f64> {
    /// Smallest neighbor value, ignoring the local entry.
    pub fn min_neighbor(&self) -> Option<(DeviceId, f64)> {
        self.neighbors().map(|(id, v)| (id, *v)).min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Builds fields over the local device and a neighbor snapshot.
pub struct FieldBuilder<'a> {
    local: DeviceId,
    neighbors: &'a NeighborState,
}

impl<'a> FieldBuilder<'a> {
    pub fn new(local: DeviceId, neighbors: &'a NeighborState) -> Self {
        FieldBuilder { local, neighbors }
    }

    /// Apply `f` to every neighbor and then to the local device.
    pub fn build<V, F>(&self, mut f: F) -> FieldResult<Field<V>>
    where
        F: FnMut(DeviceId) -> FieldResult<V>,
    {
        self.try_build(|device| f(device).map(Some))
    }

    /// Like `build`, but `f` may return `None` to leave a neighbor out.
    /// The local device can never be left out.
    ///
    /// Neighbors are evaluated in id order and the local device last.
    pub fn try_build<V, F>(&self, mut f: F) -> FieldResult<Field<V>>
    where
        F: FnMut(DeviceId) -> FieldResult<Option<V>>,
    {
        let mut values = BTreeMap::new();
        for device in self.neighbors.devices().filter(|d| *d != self.local) {
            if let Some(value) = f(device)? {
                values.insert(device, value);
            }
        }
        let local_value = f(self.local)?.ok_or_else(|| FieldError::Precondition(format!("field of {} has no local value", self.local)))?;
        values.insert(self.local, local_value);
        Ok(Field { local: self.local, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::message_store::NeighborMessageStore;
    use crate::field::types::{BranchKey, Message, SimTime, Value, payload_from};
    use crate::simulation::environment::ArenaEnvironment;

    fn state_with(senders: &[u32]) -> std::rc::Rc<NeighborState> {
        let env = ArenaEnvironment::new(Vec::new(), 1.0);
        let mut store = NeighborMessageStore::new(DeviceId(1), 100.0).unwrap();
        for s in senders {
            store.receive(Message::new(DeviceId(*s), SimTime::ZERO, payload_from([(BranchKey::root(), Value::Int(*s as i64))])));
        }
        store.neighbor_state(&env, SimTime::new(1.0))
    }

    #[test]
    fn field_always_contains_local_entry() {
        let state = state_with(&[]);
        let field = FieldBuilder::new(DeviceId(1), &state).build(|d| Ok(d.raw() * 10)).unwrap();
        assert_eq!(field.len(), 1);
        assert_eq!(*field.local_value(), 10);
    }

    #[test]
    fn field_covers_every_retained_neighbor() {
        let state = state_with(&[2, 3]);
        let field = FieldBuilder::new(DeviceId(1), &state).build(|d| Ok(d.raw() as f64)).unwrap();
        assert_eq!(field.len(), 3);
        assert_eq!(field.get(DeviceId(3)), Some(&3.0));
        assert_eq!(field.min_neighbor(), Some((DeviceId(2), 2.0)));
        assert_eq!(field.neighbors().count(), 2);
    }

    #[test]
    fn try_build_can_skip_neighbors_but_not_local() {
        let state = state_with(&[2, 3]);
        let builder = FieldBuilder::new(DeviceId(1), &state);
        let field = builder.try_build(|d| Ok((d != DeviceId(3)).then_some(1.0))).unwrap();
        assert!(!field.contains(DeviceId(3)));
        assert!(field.contains(DeviceId(1)));

        let err = builder.try_build::<f64, _>(|d| Ok((d != DeviceId(1)).then_some(1.0)));
        assert!(matches!(err, Err(FieldError::Precondition(_))));
    }

    #[test]
    fn errors_propagate_from_the_per_device_function() {
        let state = state_with(&[2]);
        let result = FieldBuilder::new(DeviceId(1), &state).build::<f64, _>(|d| {
            Err(FieldError::UnknownDevice {
                device: DeviceId(1),
                target: d.to_string(),
            })
        });
        assert!(result.is_err());
    }

    #[test]
    fn map_keeps_local_identity() {
        let state = state_with(&[2]);
        let field = FieldBuilder::new(DeviceId(1), &state).build(|d| Ok(d.raw())).unwrap();
        let doubled = field.map(|_, v| v * 2);
        assert_eq!(doubled.local_id(), DeviceId(1));
        assert_eq!(doubled.get(DeviceId(2)), Some(&4));
    }
}
