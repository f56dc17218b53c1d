//! The unit of work handed to a component.
//!
//! A context is rebuilt for every activation (and every resumption) from the
//! flow state and component index. Values a component propagates are
//! collected here and applied by the engine once the execution function
//! returns, so an activation that ends in error propagates nothing.

use crate::bridge::RequestKind;
use crate::component::ActivationId;
use crate::debugger::{DebuggerEvent, LogLevel, RecordId};
use crate::engine::{EngineCore, Program};
use crate::expression::{self, Scope};
use crate::graph::FlowGraph;
use flowcore::protocol::{ComponentMessage, ConnectRequest, HardwareCommand, MessageKind};
use flowcore::{
    ComponentError, ComponentIndex, CorrelationId, EngineMessage, FlowIndex, FlowStateId, Value,
};

/// Identity of one activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Activation {
    pub flow_state: FlowStateId,
    pub component: ComponentIndex,
    pub activation: ActivationId,
    pub record: RecordId,
}

/// What an activation asked the engine to do once it returns
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub emitted: Vec<(usize, Value)>,
    pub to_parent: Vec<(usize, Value)>,
    pub calls: Vec<FlowIndex>,
    pub error: Option<String>,
    pub waiting: bool,
}

pub struct ExecutionContext<'a> {
    core: &'a mut EngineCore,
    program: &'a Program,
    graph: &'a FlowGraph,
    spec: &'a flowcore::Component,
    activation: Activation,
    emitted: Vec<(usize, Value)>,
    to_parent: Vec<(usize, Value)>,
    calls: Vec<FlowIndex>,
    error: Option<String>,
    async_started: bool,
    async_ended: bool,
}

impl<'a> ExecutionContext<'a> {
    /// `resuming` is set when the activation is already inside its async window.
    pub(crate) fn new(
        core: &'a mut EngineCore,
        program: &'a Program,
        graph: &'a FlowGraph,
        spec: &'a flowcore::Component,
        activation: Activation,
        resuming: bool,
    ) -> Self {
        Self {
            core,
            program,
            graph,
            spec,
            activation,
            emitted: Vec::new(),
            to_parent: Vec::new(),
            calls: Vec::new(),
            error: None,
            async_started: resuming,
            async_ended: false,
        }
    }

    pub fn flow_state_id(&self) -> FlowStateId {
        self.activation.flow_state
    }

    pub fn flow_index(&self) -> FlowIndex {
        self.graph.index()
    }

    pub fn component_index(&self) -> ComponentIndex {
        self.activation.component
    }

    pub fn activation_id(&self) -> ActivationId {
        self.activation.activation
    }

    pub fn component_spec(&self) -> &flowcore::Component {
        self.spec
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.spec.property_index(name).is_some()
    }

    /// Evaluate a named property against the current flow state
    pub fn eval_property(&self, name: &str) -> Result<Value, ComponentError> {
        let index = self
            .spec
            .property_index(name)
            .ok_or_else(|| ComponentError::UnknownProperty(name.to_string()))?;
        self.eval_property_at(index)
    }

    pub fn eval_property_at(&self, index: usize) -> Result<Value, ComponentError> {
        let property = self
            .spec
            .properties
            .get(index)
            .ok_or_else(|| ComponentError::UnknownProperty(format!("#{}", index)))?;

        let scope = Scope {
            states: &self.core.states,
            globals: &self.core.globals,
            flow_state: self.activation.flow_state,
            component: self.activation.component,
        };
        scope.evaluate(&property.expression)
    }

    pub fn input_value(&self, index: usize) -> Option<Value> {
        self.core
            .states
            .get(self.activation.flow_state)
            .and_then(|state| state.input(self.activation.component, index))
            .cloned()
    }

    pub fn input_by_name(&self, name: &str) -> Option<Value> {
        self.spec
            .input_index(name)
            .and_then(|index| self.input_value(index))
    }

    pub fn require_input(&self, name: &str) -> Result<Value, ComponentError> {
        self.input_by_name(name)
            .ok_or_else(|| ComponentError::MissingInput(name.to_string()))
    }

    /// Forget the value held in an input slot, e.g. after consuming it
    pub fn clear_input(&mut self, index: usize) {
        if let Some(state) = self.core.states.get_mut(self.activation.flow_state) {
            state.clear_input(self.activation.component, index);
        }
    }

    pub fn propagate_value(&mut self, output: &str, value: Value) -> Result<(), ComponentError> {
        let index = self
            .spec
            .output_index(output)
            .ok_or_else(|| ComponentError::UnknownOutput(output.to_string()))?;
        self.propagate_value_at(index, value)
    }

    pub fn propagate_value_at(&mut self, output: usize, value: Value) -> Result<(), ComponentError> {
        if output >= self.spec.outputs.len() {
            return Err(ComponentError::UnknownOutput(format!("#{}", output)));
        }
        self.emitted.push((output, value));
        Ok(())
    }

    /// Fire the first sequence output, if the component has one
    pub fn propagate_value_through_seqout(&mut self) {
        if let Some(index) = self.spec.seqout_index() {
            self.emitted.push((index, Value::Null));
        }
    }

    /// Mark this activation as failed. Nothing it propagated is applied.
    pub fn throw_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Open the async window. The returned id stays valid until `end_async_execution`.
    pub fn start_async_execution(&mut self) -> ActivationId {
        if !self.async_started {
            tracing::debug!(
                "Activation {} of component {} going async",
                self.activation.activation,
                self.activation.component
            );
        }
        self.async_started = true;
        self.async_ended = false;
        self.activation.activation
    }

    pub fn end_async_execution(&mut self) {
        self.async_ended = true;
    }

    pub fn is_async(&self) -> bool {
        self.async_started && !self.async_ended
    }

    /// How long a request may wait for its reply before `AsyncResult::TimedOut`
    pub fn request_timeout(&self) -> std::time::Duration {
        self.core.correlations.timeout()
    }

    /// Send a command to an instrument through the host. The reply resumes this activation.
    pub fn request_hardware(
        &mut self,
        instrument_id: impl Into<String>,
        command: impl Into<Vec<u8>>,
        is_query: bool,
    ) -> CorrelationId {
        self.start_async_execution();
        let correlation_id = self.core.correlations.register(
            self.activation.activation,
            RequestKind::Hardware,
            self.core.now,
        );

        let command = command.into();
        self.core.debugger.emit(DebuggerEvent::Log {
            level: LogLevel::Scpi,
            flow_state: self.activation.flow_state,
            component: self.activation.component,
            message: String::from_utf8_lossy(&command).into_owned(),
        });
        self.core
            .outbox
            .push(EngineMessage::hardware_command(HardwareCommand {
                correlation_id,
                instrument_id: instrument_id.into(),
                command,
                is_query,
            }));
        correlation_id
    }

    pub fn request_connect(&mut self, device_id: impl Into<String>) -> CorrelationId {
        self.start_async_execution();
        let correlation_id = self.core.correlations.register(
            self.activation.activation,
            RequestKind::Connect,
            self.core.now,
        );
        self.core
            .outbox
            .push(EngineMessage::connect_request(ConnectRequest {
                correlation_id,
                device_id: device_id.into(),
            }));
        correlation_id
    }

    /// Post a component-defined message to the host. With `expects_reply` the
    /// activation waits for `resultToWorker` replies carrying the returned id.
    pub fn send_to_host(&mut self, message: Value, expects_reply: bool) -> Option<CorrelationId> {
        let id = if expects_reply {
            self.start_async_execution();
            Some(self.core.correlations.register(
                self.activation.activation,
                RequestKind::HostMessage,
                self.core.now,
            ))
        } else {
            None
        };

        self.core.outbox.component_message(ComponentMessage {
            id,
            flow_state: Some(self.activation.flow_state),
            component: Some(self.activation.component),
            kind: MessageKind::Host,
            message,
            expects_reply,
        });
        id
    }

    pub fn log(&mut self, kind: MessageKind, message: impl Into<String>) {
        let message = message.into();
        let level = match kind {
            MessageKind::Error => LogLevel::Error,
            MessageKind::Warning => LogLevel::Warning,
            MessageKind::Debug => LogLevel::Debug,
            MessageKind::Info | MessageKind::Host => LogLevel::Info,
        };
        tracing::debug!(
            "[fs {} / {}] {}",
            self.activation.flow_state,
            self.spec.display_name(),
            message
        );

        self.core.debugger.emit(DebuggerEvent::Log {
            level,
            flow_state: self.activation.flow_state,
            component: self.activation.component,
            message: message.clone(),
        });
        self.core.outbox.component_message(ComponentMessage {
            id: None,
            flow_state: Some(self.activation.flow_state),
            component: Some(self.activation.component),
            kind,
            message: Value::String(message),
            expects_reply: false,
        });
    }

    /// Run `flow` as a child of the current flow state. The activation
    /// waits until the child finishes and is resumed with `FlowFinished`.
    pub fn call_flow(&mut self, flow: FlowIndex) -> Result<(), ComponentError> {
        if self.program.graph(flow).is_none() {
            return Err(ComponentError::Configuration(format!(
                "flow {} does not exist",
                flow
            )));
        }
        self.start_async_execution();
        self.calls.push(flow);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        expression::lookup_variable(
            &self.core.states,
            &self.core.globals,
            self.activation.flow_state,
            name,
        )
    }

    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<(), ComponentError> {
        expression::assign_variable(
            &mut self.core.states,
            &mut self.core.globals,
            self.activation.flow_state,
            name,
            value.clone(),
        )?;
        self.core.debugger.emit(DebuggerEvent::ValueChanged {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    /// Input slot of the call component that started this flow state
    pub fn parent_input(&self, index: usize) -> Option<Value> {
        let link = self
            .core
            .states
            .get(self.activation.flow_state)
            .and_then(|state| state.parent())?;
        self.core
            .states
            .get(link.flow_state)
            .and_then(|parent| parent.input(link.component, index))
            .cloned()
    }

    /// Write an output of the call component that started this flow state
    pub fn propagate_to_parent(&mut self, output: usize, value: Value) -> Result<(), ComponentError> {
        let has_parent = self
            .core
            .states
            .get(self.activation.flow_state)
            .and_then(|state| state.parent())
            .is_some();
        if !has_parent {
            return Err(ComponentError::Configuration(
                "flow state has no calling component".to_string(),
            ));
        }
        self.to_parent.push((output, value));
        Ok(())
    }

    pub fn component_state(&self) -> Option<Value> {
        self.core
            .states
            .get(self.activation.flow_state)
            .and_then(|state| state.component_state(self.activation.component))
            .cloned()
    }

    pub fn set_component_state(&mut self, value: Option<Value>) {
        if let Some(state) = self.core.states.get_mut(self.activation.flow_state) {
            state.set_component_state(self.activation.component, value);
        }
    }

    pub(crate) fn finish(self) -> Outcome {
        Outcome {
            emitted: self.emitted,
            to_parent: self.to_parent,
            calls: self.calls,
            waiting: self.async_started && !self.async_ended,
            error: self.error,
        }
    }
}
