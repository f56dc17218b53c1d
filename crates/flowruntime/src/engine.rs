//! The execution engine: flow states, tick loop, async suspension and the
//! engine side of the host message protocol.
//!
//! An `Engine` is strictly single-threaded. Host messages go in through
//! `handle_message`, time advances through `tick_at`, and everything for the
//! host is collected until `drain_messages`. `FlowRuntime` wraps it in a
//! tokio task for the isolated-unit deployment; tests drive it directly.

use crate::bridge::CorrelationTable;
use crate::component::{ActivationId, AsyncResult, Component};
use crate::context::{Activation, ExecutionContext, Outcome};
use crate::debugger::{Debugger, DebuggerCommand, DebuggerEvent, RecordId};
use crate::display::{Display, NullDisplay};
use crate::error::EngineError;
use crate::expression::{self, Scope};
use crate::flow_state::{ComponentStatus, FlowStates, ParentLink, ReadyEntry};
use crate::graph::FlowGraph;
use crate::registry::ComponentRegistry;
use crate::runtime::EngineConfig;
use crate::shared::SharedValues;
use flowcore::protocol::{
    AssignProperty, ComponentMessage, DisplayGeometry, EvalProperty, ExecuteAction,
    HardwareResult, InitReply, InitRequest, MessageKind, PropertyValue,
    ResultToWorker, ScreenUpdate,
};
use flowcore::{
    Assets, ComponentError, ComponentIndex, CorrelationId, EngineMessage, FlowError, FlowIndex,
    FlowStateId, HostMessage, ProtocolError, Value, ASSET_VERSION,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Compiled program: graph indexes plus the resolved execution function of every component
pub(crate) struct Program {
    graphs: Vec<FlowGraph>,
    functions: Vec<Vec<Arc<dyn Component>>>,
    start_flows: Vec<FlowIndex>,
}

impl Program {
    fn compile(assets: Assets, registry: &ComponentRegistry) -> Result<Self, EngineError> {
        let mut graphs = Vec::with_capacity(assets.flows.len());
        let mut functions = Vec::with_capacity(assets.flows.len());

        for (flow_index, flow) in assets.flows.into_iter().enumerate() {
            let flow_index = flow_index as FlowIndex;
            let mut resolved = Vec::with_capacity(flow.components.len());

            for (component_index, spec) in flow.components.iter().enumerate() {
                let component = component_index as ComponentIndex;
                let factory = registry.resolve(spec.type_id).ok_or(
                    EngineError::UnknownComponentType {
                        type_id: spec.type_id,
                        flow: flow_index,
                        component,
                    },
                )?;
                let function =
                    factory
                        .create(spec)
                        .map_err(|source| EngineError::ComponentCreation {
                            flow: flow_index,
                            component,
                            source,
                        })?;
                resolved.push(function);
            }

            functions.push(resolved);
            graphs.push(FlowGraph::new(flow_index, flow));
        }

        Ok(Self {
            graphs,
            functions,
            start_flows: assets.start_flows,
        })
    }

    pub(crate) fn graph(&self, flow: FlowIndex) -> Option<&FlowGraph> {
        self.graphs.get(flow as usize)
    }

    fn function(&self, flow: FlowIndex, component: ComponentIndex) -> Option<&Arc<dyn Component>> {
        self.functions
            .get(flow as usize)
            .and_then(|components| components.get(component as usize))
    }

    fn flow_count(&self) -> usize {
        self.graphs.len()
    }
}

/// An activation parked in its async window
#[derive(Debug, Clone, Copy)]
pub(crate) struct Suspended {
    flow_state: FlowStateId,
    component: ComponentIndex,
    record: RecordId,
}

/// Messages waiting for the next `drain_messages`
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    messages: Vec<EngineMessage>,
    component_messages: Vec<ComponentMessage>,
}

impl Outbox {
    pub(crate) fn push(&mut self, message: EngineMessage) {
        self.messages.push(message);
    }

    /// Component messages are batched into one `componentMessages` per flush
    pub(crate) fn component_message(&mut self, message: ComponentMessage) {
        self.component_messages.push(message);
    }
}

/// Mutable engine state. Kept apart from `Program` so an execution context
/// can borrow both at once.
pub(crate) struct EngineCore {
    pub(crate) states: FlowStates,
    pub(crate) globals: HashMap<String, Value>,
    pub(crate) debugger: Debugger,
    pub(crate) correlations: CorrelationTable,
    pub(crate) outbox: Outbox,
    pub(crate) now: Instant,
    suspended: HashMap<ActivationId, Suspended>,
    shared: SharedValues,
    /// Last value reported per property value slot, with the flow state it was evaluated in
    last_property_values: HashMap<u32, (FlowStateId, Value)>,
    next_activation: ActivationId,
    stopped: bool,
}

impl EngineCore {
    fn new(config: &EngineConfig) -> Self {
        Self {
            states: FlowStates::new(),
            globals: HashMap::new(),
            debugger: Debugger::new(config.emit_debugger_events),
            correlations: CorrelationTable::new(config.request_timeout),
            outbox: Outbox::default(),
            now: Instant::now(),
            suspended: HashMap::new(),
            shared: SharedValues::new(config.shared_value_threshold),
            last_property_values: HashMap::new(),
            next_activation: 1,
            stopped: false,
        }
    }

    fn create_flow_state(
        &mut self,
        program: &Program,
        flow: FlowIndex,
        parent: Option<ParentLink>,
    ) -> Option<FlowStateId> {
        let graph = program.graph(flow)?;
        let id = self.states.create(graph, parent);
        tracing::info!(
            "Created flow state {} for flow '{}'{}",
            id,
            graph.name(),
            parent
                .map(|link| format!(" (called from flow state {})", link.flow_state))
                .unwrap_or_default()
        );

        self.debugger.emit(DebuggerEvent::FlowStateCreated {
            flow_state: id,
            flow_index: flow,
            parent: parent.map(|link| link.flow_state),
            parent_component: parent.map(|link| link.component),
        });
        for local in &graph.flow().locals {
            self.debugger.emit(DebuggerEvent::LocalVariableInit {
                flow_state: id,
                name: local.name.clone(),
                value: local.default.clone(),
            });
        }
        Some(id)
    }

    fn destroy_flow_state(&mut self, id: FlowStateId) {
        let removed = self.states.destroy(id);
        for state in removed {
            self.forget_flow_state(state.id());
        }
    }

    fn destroy_all(&mut self) {
        let removed = self.states.destroy_all();
        for state in removed {
            self.forget_flow_state(state.id());
        }
        self.suspended.clear();
    }

    fn forget_flow_state(&mut self, id: FlowStateId) {
        let orphaned: Vec<_> = self
            .suspended
            .iter()
            .filter(|(_, s)| s.flow_state == id)
            .map(|(activation, _)| *activation)
            .collect();
        for activation in orphaned {
            self.suspended.remove(&activation);
            self.correlations.forget_activation(activation);
        }

        self.shared.release_flow_state(id);
        self.last_property_values
            .retain(|_, (flow_state, _)| *flow_state != id);
        self.debugger
            .emit(DebuggerEvent::FlowStateDestroyed { flow_state: id });
        tracing::info!("Destroyed flow state {}", id);
    }

    fn next_activation(&mut self) -> ActivationId {
        let id = self.next_activation;
        self.next_activation += 1;
        id
    }

    fn begin_tick(&mut self) {
        for id in self.states.ids() {
            if let Some(state) = self.states.get_mut(id) {
                state.begin_tick();
            }
        }
    }

    fn propagate_all(&mut self, program: &Program) {
        for id in self.states.ids() {
            let Some(state) = self.states.get_mut(id) else {
                continue;
            };
            if !state.has_pending() {
                continue;
            }
            let Some(graph) = program.graph(state.flow_index()) else {
                continue;
            };

            for written in state.propagate(graph) {
                let line = written.connection;
                if let Some(value) = state.input(line.target, line.input as usize) {
                    self.debugger.emit(DebuggerEvent::ComponentInputInit {
                        flow_state: id,
                        component: line.target,
                        input: line.input,
                        value: value.clone(),
                    });
                }
                if written.became_ready {
                    self.debugger.emit(DebuggerEvent::AddToQueue {
                        flow_state: id,
                        connection: line,
                    });
                }
            }
        }
    }

    fn take_all_ready(&mut self) -> VecDeque<ReadyEntry> {
        let mut batch = VecDeque::new();
        for id in self.states.ids() {
            if let Some(state) = self.states.get_mut(id) {
                while let Some(entry) = state.take_ready() {
                    batch.push_back(entry);
                }
            }
        }
        batch
    }

    /// Put entries back at the front of their ready queues, keeping their order
    fn requeue(&mut self, entries: VecDeque<ReadyEntry>) {
        for entry in entries.into_iter().rev() {
            if let Some(state) = self.states.get_mut(entry.flow_state) {
                state.requeue_front(entry);
            }
        }
    }

    fn any_ready(&self) -> bool {
        self.states.iter().any(|state| state.has_ready())
    }

    /// Execute ready components and propagate until nothing changes within this tick
    fn run_passes(&mut self, program: &Program, max_passes: usize) {
        for _ in 0..max_passes {
            self.propagate_all(program);

            let mut batch = self.take_all_ready();
            if batch.is_empty() {
                if !self.reap_children(program) {
                    return;
                }
                continue;
            }

            while let Some(entry) = batch.pop_front() {
                if self.stopped {
                    return;
                }
                let flow = self
                    .states
                    .get(entry.flow_state)
                    .map(|state| state.flow_index());
                let hit = flow.is_some_and(|flow| {
                    self.debugger
                        .should_break(entry.flow_state, flow, entry.component)
                });
                if self.debugger.is_paused() || hit {
                    if hit {
                        tracing::info!(
                            "Breakpoint hit at flow {:?} component {}",
                            flow,
                            entry.component
                        );
                    }
                    batch.push_front(entry);
                    self.requeue(batch);
                    return;
                }
                self.execute_entry(program, entry);
            }

            self.reap_children(program);
        }

        tracing::warn!(
            "Tick did not converge after {} passes; continuing next tick",
            max_passes
        );
    }

    fn execute_entry(&mut self, program: &Program, entry: ReadyEntry) {
        let Some(state) = self.states.get_mut(entry.flow_state) else {
            return;
        };
        if state.status(entry.component) != Some(ComponentStatus::Ready) {
            return;
        }
        let flow_index = state.flow_index();
        let (Some(graph), Some(function)) = (
            program.graph(flow_index),
            program.function(flow_index, entry.component),
        ) else {
            return;
        };
        let Some(spec) = graph.component(entry.component) else {
            return;
        };
        state.begin(entry.component);

        let connection = entry
            .trigger
            .connection
            .and_then(|index| graph.connection(index))
            .copied();
        let record = self.debugger.record_activation(
            entry.flow_state,
            flow_index,
            entry.component,
            connection,
            entry.trigger.cause,
        );
        self.debugger.emit(DebuggerEvent::RemoveFromQueue);

        let activation = Activation {
            flow_state: entry.flow_state,
            component: entry.component,
            activation: self.next_activation(),
            record,
        };
        tracing::debug!(
            "Executing {} ({}) in flow state {}",
            spec.display_name(),
            function.type_name(),
            entry.flow_state
        );

        let mut ctx = ExecutionContext::new(self, program, graph, spec, activation, false);
        let result = function.execute(&mut ctx);
        let outcome = ctx.finish();
        self.settle(program, graph, activation, outcome, result);
    }

    fn resume(&mut self, program: &Program, activation: ActivationId, result: AsyncResult) -> bool {
        let Some(suspended) = self.suspended.remove(&activation) else {
            tracing::warn!("No suspended activation {} to resume", activation);
            return false;
        };
        let Some(state) = self.states.get_mut(suspended.flow_state) else {
            self.correlations.forget_activation(activation);
            return false;
        };
        if state.status(suspended.component) != Some(ComponentStatus::WaitingAsync) {
            return false;
        }
        let flow_index = state.flow_index();
        let (Some(graph), Some(function)) = (
            program.graph(flow_index),
            program.function(flow_index, suspended.component),
        ) else {
            return false;
        };
        let Some(spec) = graph.component(suspended.component) else {
            return false;
        };
        state.begin(suspended.component);

        let activation = Activation {
            flow_state: suspended.flow_state,
            component: suspended.component,
            activation,
            record: suspended.record,
        };
        tracing::debug!(
            "Resuming activation {} of {} with {:?}",
            activation.activation,
            spec.display_name(),
            result
        );

        let mut ctx = ExecutionContext::new(self, program, graph, spec, activation, true);
        let outcome_result = function.resume(&mut ctx, result);
        let outcome = ctx.finish();
        self.settle(program, graph, activation, outcome, outcome_result);
        true
    }

    /// Apply what an activation produced: error, wait, or finish with outputs
    fn settle(
        &mut self,
        program: &Program,
        graph: &FlowGraph,
        activation: Activation,
        outcome: Outcome,
        result: Result<(), ComponentError>,
    ) {
        let Activation {
            flow_state,
            component,
            activation: id,
            record,
        } = activation;

        let error = match result {
            Err(e) => Some(e.to_string()),
            Ok(()) => outcome.error,
        };

        if let Some(message) = error {
            self.suspended.remove(&id);
            self.correlations.forget_activation(id);
            if let Some(state) = self.states.get_mut(flow_state) {
                state.complete(component, ComponentStatus::Error);
                state.record_error(&message);
            }

            tracing::warn!(
                "Component {} in flow state {} failed: {}",
                component,
                flow_state,
                message
            );
            self.debugger.mark_error(record, &message);
            self.debugger.emit(DebuggerEvent::FlowStateError {
                flow_state,
                component,
                message: message.clone(),
            });
            self.outbox.component_message(ComponentMessage {
                id: None,
                flow_state: Some(flow_state),
                component: Some(component),
                kind: MessageKind::Error,
                message: Value::String(message),
                expects_reply: false,
            });
            return;
        }

        let Some(state) = self.states.get_mut(flow_state) else {
            return;
        };
        for (output, value) in outcome.emitted {
            state.set_value(graph, component, output, value, Some(record));
        }
        let parent = state.parent();

        if outcome.waiting {
            state.complete(component, ComponentStatus::WaitingAsync);
            self.suspended.insert(
                id,
                Suspended {
                    flow_state,
                    component,
                    record,
                },
            );
        } else {
            state.complete(component, ComponentStatus::Finished);
            self.suspended.remove(&id);
            self.correlations.forget_activation(id);
        }

        if let (Some(link), false) = (parent, outcome.to_parent.is_empty()) {
            let parent_graph = self
                .states
                .get(link.flow_state)
                .and_then(|p| program.graph(p.flow_index()));
            if let (Some(parent_graph), Some(parent_state)) =
                (parent_graph, self.states.get_mut(link.flow_state))
            {
                for (output, value) in outcome.to_parent {
                    parent_state.set_value(parent_graph, link.component, output, value, Some(record));
                }
            }
        }

        for flow in outcome.calls {
            self.create_flow_state(
                program,
                flow,
                Some(ParentLink {
                    flow_state,
                    component,
                    activation: id,
                    record: Some(record),
                }),
            );
        }
    }

    /// Destroy finished call-flow states and resume their callers
    fn reap_children(&mut self, program: &Program) -> bool {
        let finished: Vec<_> = self
            .states
            .iter()
            .filter(|state| state.is_quiescent() && state.children().is_empty())
            .filter_map(|state| {
                state
                    .parent()
                    .map(|link| (state.id(), link, state.error().map(str::to_string)))
            })
            .collect();

        if finished.is_empty() {
            return false;
        }

        for (id, link, error) in finished {
            if !self.states.contains(id) {
                continue;
            }
            self.destroy_flow_state(id);
            self.resume(program, link.activation, AsyncResult::FlowFinished { error });
        }
        true
    }

    fn expire_requests(&mut self, program: &Program, now: Instant) {
        for (correlation_id, request) in self.correlations.expire(now) {
            tracing::warn!(
                "Request {} ({:?}) timed out",
                correlation_id,
                request.kind
            );
            self.resume(program, request.activation, AsyncResult::TimedOut);
        }
    }

    fn single_step(&mut self, program: &Program) {
        if !self.debugger.begin_step() {
            tracing::debug!("Single step ignored: debugger is not paused");
            return;
        }

        self.propagate_all(program);
        if !self.any_ready() {
            self.begin_tick();
            self.propagate_all(program);
        }
        // A finished call flow resumes its caller, which may make the caller's successors ready
        while !self.any_ready() && self.reap_children(program) {
            self.begin_tick();
            self.propagate_all(program);
        }

        let next = self.states.ids().into_iter().find_map(|id| {
            self.states
                .get_mut(id)
                .and_then(|state| state.take_ready())
        });
        if let Some(entry) = next {
            self.execute_entry(program, entry);
        }

        self.debugger.end_step();
    }

    fn cancel_all(&mut self, program: &Program) {
        let mut waiting: Vec<_> = self.suspended.drain().collect();
        waiting.sort_by_key(|(activation, _)| *activation);

        for (id, suspended) in waiting {
            let Some(flow_index) = self
                .states
                .get(suspended.flow_state)
                .map(|state| state.flow_index())
            else {
                continue;
            };
            let (Some(graph), Some(function)) = (
                program.graph(flow_index),
                program.function(flow_index, suspended.component),
            ) else {
                continue;
            };
            let Some(spec) = graph.component(suspended.component) else {
                continue;
            };

            tracing::debug!("Cancelling activation {} of {}", id, spec.display_name());
            let activation = Activation {
                flow_state: suspended.flow_state,
                component: suspended.component,
                activation: id,
                record: suspended.record,
            };
            let mut ctx = ExecutionContext::new(self, program, graph, spec, activation, true);
            function.cancel(&mut ctx);
            drop(ctx.finish());
        }
    }

    fn correlation_error(&mut self, id: CorrelationId) {
        tracing::warn!("Reply for unknown or settled correlation id {}", id);
        self.outbox.component_message(ComponentMessage {
            id: Some(id),
            flow_state: None,
            component: None,
            kind: MessageKind::Warning,
            message: Value::String(format!("unknown or settled correlation id {}", id)),
            expects_reply: false,
        });
    }

    fn hardware_result(&mut self, program: &Program, reply: HardwareResult) {
        let Some(request) = self.correlations.take(reply.correlation_id) else {
            self.correlation_error(reply.correlation_id);
            return;
        };
        let result = match reply.error_message {
            Some(message) => Err(message),
            None => Ok(reply.result),
        };
        self.resume(program, request.activation, AsyncResult::Hardware(result));
    }

    fn result_to_worker(&mut self, program: &Program, reply: ResultToWorker) {
        let request = if reply.final_result {
            self.correlations.take(reply.message_id)
        } else {
            self.correlations.touch(reply.message_id, self.now)
        };
        let Some(request) = request else {
            self.correlation_error(reply.message_id);
            return;
        };
        self.resume(
            program,
            request.activation,
            AsyncResult::HostReply {
                result: reply.result,
                final_result: reply.final_result,
            },
        );
    }

    fn locate<'p>(
        &self,
        program: &'p Program,
        flow_state: FlowStateId,
        component: ComponentIndex,
    ) -> Result<(&'p FlowGraph, &'p flowcore::Component), ProtocolError> {
        let state = self
            .states
            .get(flow_state)
            .ok_or(ProtocolError::UnknownFlowState(flow_state))?;
        let graph = program
            .graph(state.flow_index())
            .ok_or(ProtocolError::UnknownFlowState(flow_state))?;
        let spec = graph
            .component(component)
            .ok_or(ProtocolError::UnknownComponent {
                flow_state,
                component,
            })?;
        Ok((graph, spec))
    }

    fn execute_action(&mut self, program: &Program, action: ExecuteAction) -> Result<(), ProtocolError> {
        let (graph, spec) = self.locate(program, action.flow_state, action.component)?;
        if action.output as usize >= spec.outputs.len() {
            return Err(ProtocolError::UnknownOutput {
                component: action.component,
                output: action.output,
            });
        }

        tracing::debug!(
            "Host action on {} output {} in flow state {}",
            spec.display_name(),
            action.output,
            action.flow_state
        );
        if let Some(state) = self.states.get_mut(action.flow_state) {
            state.set_value(graph, action.component, action.output as usize, action.value, None);
        }
        Ok(())
    }

    fn update_globals(&mut self, values: Vec<flowcore::protocol::GlobalValue>) {
        for global in values {
            self.debugger.emit(DebuggerEvent::ValueChanged {
                name: global.name.clone(),
                value: global.value.clone(),
            });
            self.globals.insert(global.name, global.value);
        }
    }

    fn assign_property(&mut self, program: &Program, assign: AssignProperty) -> Result<(), ProtocolError> {
        let (_, spec) = self.locate(program, assign.flow_state, assign.component)?;
        let property =
            spec.properties
                .get(assign.property as usize)
                .ok_or(ProtocolError::UnknownProperty {
                    component: assign.component,
                    property: assign.property,
                })?;
        let not_assignable = ProtocolError::NotAssignable {
            component: assign.component,
            property: assign.property,
        };
        let Some(name) = property.expression.assignable_name() else {
            return Err(not_assignable);
        };

        expression::assign_variable(
            &mut self.states,
            &mut self.globals,
            assign.flow_state,
            name,
            assign.value.clone(),
        )
        .map_err(|_| not_assignable)?;

        self.debugger.emit(DebuggerEvent::ValueChanged {
            name: name.to_string(),
            value: assign.value,
        });
        Ok(())
    }

    fn eval_property(&self, program: &Program, eval: &EvalProperty) -> Result<Value, FlowError> {
        let (_, spec) = self.locate(program, eval.flow_state, eval.component)?;
        let property =
            spec.properties
                .get(eval.property as usize)
                .ok_or(ProtocolError::UnknownProperty {
                    component: eval.component,
                    property: eval.property,
                })?;

        let scope = Scope {
            states: &self.states,
            globals: &self.globals,
            flow_state: eval.flow_state,
            component: eval.component,
        };
        Ok(scope.evaluate(&property.expression)?)
    }

    fn eval_properties(&mut self, program: &Program, requests: Vec<EvalProperty>) {
        let mut changed = Vec::new();

        for request in requests {
            let value = match self.eval_property(program, &request) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        "Cannot evaluate property {} of component {}: {}",
                        request.property,
                        request.component,
                        e
                    );
                    continue;
                }
            };

            let index = request.property_value_index;
            let cached = (request.flow_state, value);
            if self.last_property_values.get(&index) == Some(&cached) {
                continue;
            }
            let (flow_state, value) = cached;
            let handle = self.shared.assign(index, flow_state, &value);
            self.last_property_values
                .insert(index, (flow_state, value.clone()));
            changed.push(PropertyValue {
                property_value_index: index,
                value,
                handle,
            });
        }

        if !changed.is_empty() {
            self.outbox.push(EngineMessage::property_values(changed));
        }
    }

    /// Move batched debugger events, component messages and released handles into the outbox
    fn flush(&mut self) {
        let events = self.debugger.take_events();
        if !events.is_empty() {
            let text: String = events.iter().map(DebuggerEvent::encode).collect();
            self.outbox.push(EngineMessage::debugger(text.into_bytes()));
        }

        let messages = std::mem::take(&mut self.outbox.component_messages);
        if !messages.is_empty() {
            self.outbox.push(EngineMessage::component_messages(messages));
        }

        let released = self.shared.take_released();
        if !released.is_empty() {
            self.outbox.push(EngineMessage::release(released));
        }
    }
}

/// The flow execution engine
pub struct Engine {
    registry: Arc<ComponentRegistry>,
    config: EngineConfig,
    program: Option<Program>,
    core: EngineCore,
    display: Box<dyn Display>,
    geometry: DisplayGeometry,
    /// Execution-affecting host messages received while paused
    held: VecDeque<HostMessage>,
}

impl Engine {
    pub fn new(registry: Arc<ComponentRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            core: EngineCore::new(&config),
            config,
            program: None,
            display: Box::new(NullDisplay),
            geometry: DisplayGeometry::default(),
            held: VecDeque::new(),
        }
    }

    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = display;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decode and handle one JSON-encoded host message. Malformed messages are dropped.
    pub fn handle_bytes(&mut self, bytes: &[u8]) {
        match HostMessage::decode(bytes) {
            Ok(message) => self.handle_message(message),
            Err(e) => tracing::warn!("Dropping host message: {}", e),
        }
    }

    pub fn handle_message(&mut self, message: HostMessage) {
        if message.stop == Some(true) {
            self.stop();
            return;
        }

        let HostMessage {
            init,
            input_event,
            update_globals,
            assign_properties,
            eval_properties,
            hardware_result,
            debugger_message,
            execute_action,
            result_to_worker,
            ..
        } = message;

        if let Some(request) = init {
            self.init(request);
        }

        let execution = HostMessage {
            input_event,
            update_globals,
            assign_properties,
            hardware_result,
            execute_action,
            result_to_worker,
            ..Default::default()
        };
        let has_other = debugger_message.is_some() || eval_properties.is_some() || !execution.is_empty();
        if !has_other {
            return;
        }

        if self.core.stopped {
            tracing::warn!("Dropping host message: {}", EngineError::Stopped);
            return;
        }
        if self.program.is_none() {
            tracing::warn!("Dropping host message: {}", ProtocolError::NotInitialized);
            return;
        }

        if let Some(bytes) = debugger_message {
            self.handle_debugger(&bytes);
        }

        if !execution.is_empty() {
            if self.core.debugger.is_paused() {
                tracing::debug!("Debugger paused; holding host message");
                self.held.push_back(execution);
            } else {
                self.apply_execution(execution);
            }
        }

        if let (Some(requests), Some(program)) = (eval_properties, self.program.as_ref()) {
            self.core.eval_properties(program, requests);
        }
    }

    fn init(&mut self, request: InitRequest) {
        let failure = |error: String| {
            EngineMessage::init(InitReply {
                ok: false,
                error: Some(error),
                version: ASSET_VERSION,
                flow_count: 0,
            })
        };

        if self.core.stopped {
            self.core.outbox.push(failure(EngineError::Stopped.to_string()));
            return;
        }
        if self.program.is_some() {
            tracing::warn!("Ignoring second init");
            self.core
                .outbox
                .push(failure(EngineError::AlreadyInitialized.to_string()));
            return;
        }

        let loaded = Assets::from_bytes(&request.assets)
            .map_err(EngineError::from)
            .and_then(|assets| {
                let globals = assets.globals.clone();
                Program::compile(assets, &self.registry).map(|program| (program, globals))
            });
        let (program, globals) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!("Engine init failed: {}", e);
                self.core.outbox.push(failure(e.to_string()));
                return;
            }
        };

        self.core.now = Instant::now();
        for global in globals {
            self.core.globals.insert(global.name, global.default);
        }
        for global in request.global_values {
            self.core.globals.insert(global.name, global.value);
        }
        let mut names: Vec<_> = self.core.globals.keys().cloned().collect();
        names.sort();
        for name in names {
            if let Some(value) = self.core.globals.get(&name).cloned() {
                self.core
                    .debugger
                    .emit(DebuggerEvent::GlobalVariableInit { name, value });
            }
        }

        self.geometry = request.display;
        self.display.resize(request.display);

        tracing::info!(
            "Engine initialized: {} flows, {} start flows",
            program.flow_count(),
            program.start_flows.len()
        );
        self.core.outbox.push(EngineMessage::init(InitReply {
            ok: true,
            error: None,
            version: ASSET_VERSION,
            flow_count: program.flow_count() as u32,
        }));

        for flow in program.start_flows.clone() {
            self.core.create_flow_state(&program, flow, None);
        }
        self.program = Some(program);
    }

    fn handle_debugger(&mut self, bytes: &[u8]) {
        for command in DebuggerCommand::parse_all(bytes) {
            let command = match command {
                Ok(command) => command,
                Err(e) => {
                    tracing::warn!("Dropping debugger command: {}", e);
                    continue;
                }
            };

            let was_paused = self.core.debugger.is_paused();
            if self.core.debugger.apply(command) {
                self.replay_held();
                if let Some(program) = self.program.as_ref() {
                    self.core.single_step(program);
                }
            } else if was_paused && !self.core.debugger.is_paused() {
                self.replay_held();
            }
        }
    }

    fn replay_held(&mut self) {
        while let Some(message) = self.held.pop_front() {
            self.apply_execution(message);
        }
    }

    fn apply_execution(&mut self, message: HostMessage) {
        let Some(program) = self.program.as_ref() else {
            return;
        };

        if let Some(reply) = message.hardware_result {
            self.core.hardware_result(program, reply);
        }
        if let Some(reply) = message.result_to_worker {
            self.core.result_to_worker(program, reply);
        }
        if let Some(action) = message.execute_action {
            if let Err(e) = self.core.execute_action(program, action) {
                tracing::warn!("Dropping executeAction: {}", e);
            }
        }
        if let Some(event) = message.input_event {
            for sample in event.pointer {
                self.display.pointer(sample);
            }
            if let Some(wheel) = event.wheel {
                self.display.wheel(wheel);
            }
        }
        if let Some(values) = message.update_globals {
            self.core.update_globals(values);
        }
        if let Some(assignments) = message.assign_properties {
            for assign in assignments {
                if let Err(e) = self.core.assign_property(program, assign) {
                    tracing::warn!("Dropping assignProperties entry: {}", e);
                }
            }
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Advance the engine by one tick. Does nothing while paused or stopped.
    pub fn tick_at(&mut self, now: Instant) {
        let Some(program) = self.program.as_ref() else {
            return;
        };
        if self.core.stopped || self.core.debugger.is_paused() {
            return;
        }

        self.core.now = now;
        self.core.expire_requests(program, now);
        self.core.begin_tick();
        self.core
            .run_passes(program, self.config.max_passes_per_tick);

        if let Some(pixels) = self.display.render() {
            self.core.outbox.push(EngineMessage::screen(ScreenUpdate {
                width: self.geometry.width,
                height: self.geometry.height,
                pixels,
            }));
        }
    }

    /// Resume a suspended activation. Returns false when there is nothing to resume.
    pub fn resume(&mut self, activation: ActivationId, result: AsyncResult) -> bool {
        if self.core.stopped {
            return false;
        }
        let Some(program) = self.program.as_ref() else {
            return false;
        };
        self.core.resume(program, activation, result)
    }

    /// Cancel waiting activations, destroy every flow state and acknowledge with `stopped`
    pub fn stop(&mut self) {
        if self.core.stopped {
            return;
        }
        tracing::info!("Stopping engine");
        self.core.stopped = true;

        if let Some(program) = self.program.as_ref() {
            self.core.cancel_all(program);
        }
        self.core.correlations.clear();
        self.core.destroy_all();
        self.core.shared.release_all();
        self.core.last_property_values.clear();
        self.held.clear();

        self.core.flush();
        self.core.outbox.push(EngineMessage::stopped());
    }

    /// Everything produced for the host since the last call
    pub fn drain_messages(&mut self) -> Vec<EngineMessage> {
        self.core.flush();
        std::mem::take(&mut self.core.outbox.messages)
    }

    pub fn is_initialized(&self) -> bool {
        self.program.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.core.stopped
    }

    pub fn flow_count(&self) -> usize {
        self.program.as_ref().map_or(0, Program::flow_count)
    }

    pub fn graph(&self, flow: FlowIndex) -> Option<&FlowGraph> {
        self.program.as_ref().and_then(|p| p.graph(flow))
    }

    pub fn debugger(&self) -> &Debugger {
        &self.core.debugger
    }

    pub fn flow_states(&self) -> &FlowStates {
        &self.core.states
    }

    pub fn root_flow_states(&self) -> Vec<FlowStateId> {
        self.core.states.roots()
    }

    pub fn status(&self, flow_state: FlowStateId, component: ComponentIndex) -> Option<ComponentStatus> {
        self.core
            .states
            .get(flow_state)
            .and_then(|state| state.status(component))
    }

    pub fn input_value(
        &self,
        flow_state: FlowStateId,
        component: ComponentIndex,
        input: usize,
    ) -> Option<&Value> {
        self.core
            .states
            .get(flow_state)
            .and_then(|state| state.input(component, input))
    }

    pub fn output_value(
        &self,
        flow_state: FlowStateId,
        component: ComponentIndex,
        output: usize,
    ) -> Option<&Value> {
        self.core
            .states
            .get(flow_state)
            .and_then(|state| state.output(component, output))
    }

    pub fn component_state(&self, flow_state: FlowStateId, component: ComponentIndex) -> Option<&Value> {
        self.core
            .states
            .get(flow_state)
            .and_then(|state| state.component_state(component))
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.core.globals.get(name)
    }

    pub fn local(&self, flow_state: FlowStateId, name: &str) -> Option<&Value> {
        self.core
            .states
            .get(flow_state)
            .and_then(|state| state.local(name))
    }

    /// Activations currently parked in their async window, lowest id first
    pub fn suspended_activations(&self) -> Vec<ActivationId> {
        let mut ids: Vec<_> = self.core.suspended.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn waiting_activation(
        &self,
        flow_state: FlowStateId,
        component: ComponentIndex,
    ) -> Option<ActivationId> {
        self.core
            .suspended
            .iter()
            .filter(|(_, s)| s.flow_state == flow_state && s.component == component)
            .map(|(activation, _)| *activation)
            .min()
    }

    pub fn pending_requests(&self) -> usize {
        self.core.correlations.len()
    }

    pub fn shared_values(&self) -> usize {
        self.core.shared.live()
    }
}
