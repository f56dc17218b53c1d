use flowcore::{FlowStateId, Value, ValueHandle};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Slot {
    handle: ValueHandle,
    flow_state: FlowStateId,
}

/// Handles for large arrays and objects reported to the host in `propertyValues`.
///
/// Each property value slot holds at most one live handle. A handle is
/// released when its slot gets a new value, when the owning flow state is
/// destroyed, or when the engine stops.
#[derive(Debug)]
pub struct SharedValues {
    threshold: usize,
    next_handle: ValueHandle,
    slots: HashMap<u32, Slot>,
    released: Vec<ValueHandle>,
}

impl SharedValues {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            next_handle: 1,
            slots: HashMap::new(),
            released: Vec::new(),
        }
    }

    pub fn is_shared(&self, value: &Value) -> bool {
        value
            .element_count()
            .is_some_and(|count| count >= self.threshold)
    }

    /// Record a new value for a property value slot, returning its handle when shared
    pub fn assign(
        &mut self,
        property_value_index: u32,
        flow_state: FlowStateId,
        value: &Value,
    ) -> Option<ValueHandle> {
        if let Some(old) = self.slots.remove(&property_value_index) {
            self.released.push(old.handle);
        }

        if !self.is_shared(value) {
            return None;
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.slots.insert(
            property_value_index,
            Slot {
                handle,
                flow_state,
            },
        );
        Some(handle)
    }

    pub fn release_flow_state(&mut self, flow_state: FlowStateId) {
        let mut dropped: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.flow_state == flow_state)
            .map(|(index, slot)| (*index, slot.handle))
            .collect();
        dropped.sort_by_key(|(_, handle)| *handle);

        for (index, handle) in dropped {
            self.slots.remove(&index);
            self.released.push(handle);
        }
    }

    pub fn release_all(&mut self) {
        let mut handles: Vec<_> = self.slots.drain().map(|(_, slot)| slot.handle).collect();
        handles.sort_unstable();
        self.released.extend(handles);
    }

    pub fn live(&self) -> usize {
        self.slots.len()
    }

    pub fn take_released(&mut self) -> Vec<ValueHandle> {
        std::mem::take(&mut self.released)
    }
}
