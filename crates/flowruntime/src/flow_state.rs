use crate::component::ActivationId;
use crate::debugger::RecordId;
use crate::graph::FlowGraph;
use flowcore::{ComponentIndex, ConnectionLine, FlowIndex, FlowStateId, SlotKind, Value};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Execution status of one component within a flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentStatus {
    Idle,
    Ready,
    Running,
    WaitingAsync,
    Error,
    Finished,
}

/// What made a component ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trigger {
    /// History record of the activation that caused this one
    pub cause: Option<RecordId>,
    pub connection: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEntry {
    pub flow_state: FlowStateId,
    pub component: ComponentIndex,
    pub trigger: Trigger,
}

/// Link from a call-flow child state back to the calling activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub flow_state: FlowStateId,
    pub component: ComponentIndex,
    pub activation: ActivationId,
    pub record: Option<RecordId>,
}

#[derive(Debug, Clone)]
struct PendingEdge {
    connection: usize,
    value: Value,
    cause: Option<RecordId>,
}

/// One edge written by `propagate`
#[derive(Debug, Clone, Copy)]
pub struct Propagation {
    pub connection: ConnectionLine,
    pub became_ready: bool,
}

/// One live instantiation of a flow
#[derive(Debug)]
pub struct FlowState {
    id: FlowStateId,
    flow_index: FlowIndex,
    parent: Option<ParentLink>,
    statuses: Vec<ComponentStatus>,
    inputs: Vec<Vec<Option<Value>>>,
    outputs: Vec<Vec<Option<Value>>>,
    component_states: Vec<Option<Value>>,
    retrigger: Vec<Option<Trigger>>,
    ready: VecDeque<ReadyEntry>,
    pending: VecDeque<PendingEdge>,
    deferred: VecDeque<PendingEdge>,
    locals: HashMap<String, Value>,
    children: Vec<FlowStateId>,
    live: usize,
    error: Option<String>,
}

impl FlowState {
    /// Allocate slot storage for `graph`; entry components start ready.
    pub fn instantiate(id: FlowStateId, graph: &FlowGraph, parent: Option<ParentLink>) -> Self {
        let components = &graph.flow().components;
        let mut state = Self {
            id,
            flow_index: graph.index(),
            parent,
            statuses: vec![ComponentStatus::Idle; components.len()],
            inputs: components.iter().map(|c| vec![None; c.inputs.len()]).collect(),
            outputs: components.iter().map(|c| vec![None; c.outputs.len()]).collect(),
            component_states: vec![None; components.len()],
            retrigger: vec![None; components.len()],
            ready: VecDeque::new(),
            pending: VecDeque::new(),
            deferred: VecDeque::new(),
            locals: graph
                .flow()
                .locals
                .iter()
                .map(|v| (v.name.clone(), v.default.clone()))
                .collect(),
            children: Vec::new(),
            live: 0,
            error: None,
        };

        let trigger = Trigger {
            cause: parent.and_then(|p| p.record),
            connection: None,
        };
        for entry in graph.entries() {
            state.trigger(*entry, trigger);
        }

        state
    }

    pub fn id(&self) -> FlowStateId {
        self.id
    }

    pub fn flow_index(&self) -> FlowIndex {
        self.flow_index
    }

    pub fn parent(&self) -> Option<ParentLink> {
        self.parent
    }

    pub fn children(&self) -> &[FlowStateId] {
        &self.children
    }

    pub fn status(&self, component: ComponentIndex) -> Option<ComponentStatus> {
        self.statuses.get(component as usize).copied()
    }

    pub fn statuses(&self) -> &[ComponentStatus] {
        &self.statuses
    }

    pub fn input(&self, component: ComponentIndex, input: usize) -> Option<&Value> {
        self.inputs
            .get(component as usize)
            .and_then(|slots| slots.get(input))
            .and_then(Option::as_ref)
    }

    pub fn clear_input(&mut self, component: ComponentIndex, input: usize) {
        if let Some(slot) = self
            .inputs
            .get_mut(component as usize)
            .and_then(|slots| slots.get_mut(input))
        {
            *slot = None;
        }
    }

    /// Last value propagated from (component, output)
    pub fn output(&self, component: ComponentIndex, output: usize) -> Option<&Value> {
        self.outputs
            .get(component as usize)
            .and_then(|slots| slots.get(output))
            .and_then(Option::as_ref)
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn component_state(&self, component: ComponentIndex) -> Option<&Value> {
        self.component_states
            .get(component as usize)
            .and_then(Option::as_ref)
    }

    pub fn set_component_state(&mut self, component: ComponentIndex, value: Option<Value>) {
        if let Some(slot) = self.component_states.get_mut(component as usize) {
            *slot = value;
        }
    }

    /// Components that are ready, running or waiting on an async result
    pub fn live(&self) -> usize {
        self.live
    }

    /// First component error raised in this state
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn record_error(&mut self, message: &str) {
        if self.error.is_none() {
            self.error = Some(message.to_string());
        }
    }

    /// Store an output value and queue its edges. Sequence edges wait for the next tick.
    pub fn set_value(
        &mut self,
        graph: &FlowGraph,
        component: ComponentIndex,
        output: usize,
        value: Value,
        cause: Option<RecordId>,
    ) {
        let Some(slot) = self
            .outputs
            .get_mut(component as usize)
            .and_then(|slots| slots.get_mut(output))
        else {
            return;
        };
        *slot = Some(value.clone());

        let deferred = graph.output_kind(component, output) == Some(SlotKind::Sequence);
        for connection in graph.outgoing(component, output) {
            let edge = PendingEdge {
                connection: *connection,
                value: value.clone(),
                cause,
            };
            if deferred {
                self.deferred.push_back(edge);
            } else {
                self.pending.push_back(edge);
            }
        }
    }

    /// Release sequence edges held back from the previous tick
    pub fn begin_tick(&mut self) {
        self.pending.extend(self.deferred.drain(..));
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Write every pending edge into its target input and update readiness
    pub fn propagate(&mut self, graph: &FlowGraph) -> Vec<Propagation> {
        let mut written = Vec::with_capacity(self.pending.len());

        while let Some(edge) = self.pending.pop_front() {
            let Some(line) = graph.connection(edge.connection).copied() else {
                continue;
            };
            let Some(target) = graph.component(line.target) else {
                continue;
            };
            let input = line.input as usize;
            let Some(slot) = self
                .inputs
                .get_mut(line.target as usize)
                .and_then(|slots| slots.get_mut(input))
            else {
                continue;
            };
            *slot = Some(edge.value);

            let fire = match target.inputs[input].kind {
                SlotKind::Sequence => true,
                SlotKind::Data => {
                    !target.is_action() && self.required_inputs_ready(graph, line.target)
                }
            };

            let trigger = Trigger {
                cause: edge.cause,
                connection: Some(edge.connection),
            };
            let became_ready = fire && self.trigger(line.target, trigger);
            written.push(Propagation {
                connection: line,
                became_ready,
            });
        }

        written
    }

    fn required_inputs_ready(&self, graph: &FlowGraph, component: ComponentIndex) -> bool {
        let Some(spec) = graph.component(component) else {
            return false;
        };
        spec.inputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.kind == SlotKind::Data && slot.required)
            .all(|(i, _)| self.input(component, i).is_some())
    }

    /// Mark a component ready. A component that is busy is re-triggered when it completes.
    pub fn trigger(&mut self, component: ComponentIndex, trigger: Trigger) -> bool {
        let Some(status) = self.statuses.get(component as usize).copied() else {
            return false;
        };

        match status {
            ComponentStatus::Idle | ComponentStatus::Finished | ComponentStatus::Error => {
                self.statuses[component as usize] = ComponentStatus::Ready;
                self.ready.push_back(ReadyEntry {
                    flow_state: self.id,
                    component,
                    trigger,
                });
                self.live += 1;
                true
            }
            ComponentStatus::Ready => false,
            ComponentStatus::Running | ComponentStatus::WaitingAsync => {
                self.retrigger[component as usize] = Some(trigger);
                false
            }
        }
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn take_ready(&mut self) -> Option<ReadyEntry> {
        self.ready.pop_front()
    }

    /// Put back an entry that was taken but not executed
    pub fn requeue_front(&mut self, entry: ReadyEntry) {
        self.ready.push_front(entry);
    }

    pub fn begin(&mut self, component: ComponentIndex) {
        if let Some(status) = self.statuses.get_mut(component as usize) {
            *status = ComponentStatus::Running;
        }
    }

    /// Record the end state of an activation: finished, error or waiting.
    pub fn complete(&mut self, component: ComponentIndex, status: ComponentStatus) {
        let Some(slot) = self.statuses.get_mut(component as usize) else {
            return;
        };
        *slot = status;

        if status != ComponentStatus::WaitingAsync {
            self.live = self.live.saturating_sub(1);
            if let Some(trigger) = self.retrigger[component as usize].take() {
                self.trigger(component, trigger);
            }
        }
    }

    /// Nothing ready, running, waiting or in flight
    pub fn is_quiescent(&self) -> bool {
        self.live == 0 && self.pending.is_empty() && self.deferred.is_empty()
    }
}

/// Arena of flow states. Parents own their children: destroying a state
/// destroys its whole subtree first.
#[derive(Debug, Default)]
pub struct FlowStates {
    states: BTreeMap<FlowStateId, FlowState>,
    next_id: FlowStateId,
}

impl FlowStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, graph: &FlowGraph, parent: Option<ParentLink>) -> FlowStateId {
        let id = self.next_id;
        self.next_id += 1;

        if let Some(link) = parent {
            if let Some(parent_state) = self.states.get_mut(&link.flow_state) {
                parent_state.children.push(id);
            }
        }

        self.states
            .insert(id, FlowState::instantiate(id, graph, parent));
        id
    }

    pub fn get(&self, id: FlowStateId) -> Option<&FlowState> {
        self.states.get(&id)
    }

    pub fn get_mut(&mut self, id: FlowStateId) -> Option<&mut FlowState> {
        self.states.get_mut(&id)
    }

    pub fn contains(&self, id: FlowStateId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// All ids in creation order
    pub fn ids(&self) -> Vec<FlowStateId> {
        self.states.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowState> {
        self.states.values()
    }

    pub fn roots(&self) -> Vec<FlowStateId> {
        self.states
            .values()
            .filter(|s| s.parent.is_none())
            .map(|s| s.id)
            .collect()
    }

    /// `id` followed by its ancestors up to the root
    pub fn ancestry(&self, id: FlowStateId) -> Vec<FlowStateId> {
        let mut chain = Vec::new();
        let mut current = self.states.get(&id);
        while let Some(state) = current {
            chain.push(state.id);
            current = state
                .parent
                .and_then(|link| self.states.get(&link.flow_state));
        }
        chain
    }

    /// Destroy a state and its subtree. Returns the removed states, children first.
    pub fn destroy(&mut self, id: FlowStateId) -> Vec<FlowState> {
        let parent = self
            .states
            .get(&id)
            .and_then(|s| s.parent)
            .map(|link| link.flow_state);

        let mut removed = Vec::new();
        self.destroy_subtree(id, &mut removed);

        if let Some(parent_state) = parent.and_then(|p| self.states.get_mut(&p)) {
            parent_state.children.retain(|child| *child != id);
        }

        removed
    }

    fn destroy_subtree(&mut self, id: FlowStateId, removed: &mut Vec<FlowState>) {
        let children = self
            .states
            .get(&id)
            .map(|s| s.children.clone())
            .unwrap_or_default();
        for child in children {
            self.destroy_subtree(child, removed);
        }
        if let Some(state) = self.states.remove(&id) {
            removed.push(state);
        }
    }

    /// Destroy every state, bottom-up
    pub fn destroy_all(&mut self) -> Vec<FlowState> {
        let mut removed = Vec::new();
        for root in self.roots() {
            removed.extend(self.destroy(root));
        }
        // Orphans whose parent was already gone
        let rest: Vec<_> = self.states.keys().copied().collect();
        for id in rest {
            removed.extend(self.destroy(id));
        }
        removed
    }
}
