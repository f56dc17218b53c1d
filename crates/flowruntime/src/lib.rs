//! Flow execution runtime
//!
//! This crate provides the engine that runs compiled flows: flow state
//! instantiation, the tick loop, async suspension and resumption, the
//! debugger, and the message-passing boundary to the host.

mod bridge;
mod component;
mod context;
mod debugger;
mod display;
mod engine;
mod error;
mod expression;
mod flow_state;
mod graph;
pub mod host;
mod registry;
mod runtime;
mod shared;

pub use bridge::{CorrelationTable, PendingRequest, RequestKind};
pub use component::{
    ActivationId, AsyncResult, Component, ComponentFactory, ComponentMetadata, PortDefinition,
};
pub use context::ExecutionContext;
pub use debugger::{
    Breakpoint, Debugger, DebuggerCommand, DebuggerEvent, DebuggerState, HistoryRecord, LogLevel,
    RecordId,
};
pub use display::{Display, NullDisplay};
pub use engine::Engine;
pub use error::EngineError;
pub use expression::{assign_variable, lookup_variable, Scope};
pub use flow_state::{ComponentStatus, FlowState, FlowStates, ParentLink, Propagation, ReadyEntry, Trigger};
pub use graph::FlowGraph;
pub use host::{HostBridge, InstrumentHost};
pub use registry::ComponentRegistry;
pub use runtime::{EngineConfig, FlowRuntime, RuntimeHandle};
pub use shared::SharedValues;
