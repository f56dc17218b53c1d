//! Core abstractions for the flow engine
//!
//! This crate provides the fundamental types that all other components
//! depend on: values, the compiled flow graph model, the asset blob codec
//! and the host/engine message schemas. It has no runtime dependencies.

mod assets;
mod error;
mod expression;
mod flow;
pub mod protocol;
mod value;

pub use assets::{AssetBuilder, AssetHeader, Assets, FlowBuilder, ASSET_MAGIC, ASSET_VERSION, HEADER_LEN};
pub use error::{AssetError, ComponentError, FlowError, ProtocolError};
pub use expression::{BinaryOp, Expression, UnaryOp};
pub use flow::{
    Component, ComponentGroup, ComponentIndex, ComponentTypeId, ConnectionLine, Flow, FlowIndex,
    InputSlot, OutputSlot, Property, SlotKind, Variable,
};
pub use protocol::{CorrelationId, EngineMessage, FlowStateId, HostMessage, ValueHandle};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
