//! Standard component library
//!
//! Built-in components for common flow operations. Each module also exports
//! shape constructors that produce the compiled `flowcore::Component` record
//! the matching factory expects.

pub mod flow;
pub mod host;
pub mod instrument;
pub mod log;
pub mod logic;
pub mod variable;

use flowcore::{ComponentError, SlotKind};
use flowruntime::{ComponentRegistry, EngineError};
use std::sync::Arc;

/// Stable component type ids baked into compiled assets
pub mod types {
    use flowcore::ComponentTypeId;

    pub const START: ComponentTypeId = 1;
    pub const CONSTANT: ComponentTypeId = 2;
    pub const ADD: ComponentTypeId = 3;
    pub const SUBTRACT: ComponentTypeId = 4;
    pub const MULTIPLY: ComponentTypeId = 5;
    pub const DIVIDE: ComponentTypeId = 6;
    pub const EVALUATE: ComponentTypeId = 7;
    pub const COMPARE: ComponentTypeId = 8;
    pub const SET_VARIABLE: ComponentTypeId = 9;
    pub const LOG: ComponentTypeId = 10;
    pub const INPUT: ComponentTypeId = 11;
    pub const OUTPUT: ComponentTypeId = 12;
    pub const CALL_ACTION: ComponentTypeId = 13;
    pub const SCPI: ComponentTypeId = 14;
    pub const CONNECT: ComponentTypeId = 15;
    pub const HOST_MESSAGE: ComponentTypeId = 16;
}

/// Register all standard components with a registry
pub fn register_all(registry: &mut ComponentRegistry) -> Result<(), EngineError> {
    registry.register(Arc::new(flow::StartFactory))?;
    registry.register(Arc::new(flow::InputFactory))?;
    registry.register(Arc::new(flow::OutputFactory))?;
    registry.register(Arc::new(flow::CallActionFactory))?;
    registry.register(Arc::new(logic::ConstantFactory))?;
    for op in logic::MathOp::ALL {
        registry.register(Arc::new(logic::MathFactory::new(op)))?;
    }
    registry.register(Arc::new(logic::EvaluateFactory))?;
    registry.register(Arc::new(logic::CompareFactory))?;
    registry.register(Arc::new(variable::SetVariableFactory))?;
    registry.register(Arc::new(log::LogFactory))?;
    registry.register(Arc::new(instrument::ScpiFactory))?;
    registry.register(Arc::new(instrument::ConnectFactory))?;
    registry.register(Arc::new(host::HostMessageFactory))?;
    Ok(())
}

/// Registry with every standard component, frozen for sharing with engines
pub fn standard_registry() -> Result<Arc<ComponentRegistry>, EngineError> {
    let mut registry = ComponentRegistry::new();
    register_all(&mut registry)?;
    Ok(Arc::new(registry))
}

fn require_property(spec: &flowcore::Component, name: &str) -> Result<(), ComponentError> {
    spec.property_index(name)
        .map(|_| ())
        .ok_or_else(|| ComponentError::Configuration(format!("missing property '{}'", name)))
}

fn require_output(spec: &flowcore::Component, name: &str, kind: SlotKind) -> Result<(), ComponentError> {
    match spec.outputs.iter().find(|slot| slot.name == name) {
        Some(slot) if slot.kind == kind => Ok(()),
        Some(_) => Err(ComponentError::Configuration(format!(
            "output '{}' has the wrong kind",
            name
        ))),
        None => Err(ComponentError::Configuration(format!(
            "missing output '{}'",
            name
        ))),
    }
}

/// Read a literal numeric property at creation time
fn literal_index(spec: &flowcore::Component, name: &str) -> Result<usize, ComponentError> {
    let index = spec
        .property_index(name)
        .ok_or_else(|| ComponentError::Configuration(format!("missing property '{}'", name)))?;
    match &spec.properties[index].expression {
        flowcore::Expression::Literal {
            value: flowcore::Value::Number(n),
        } if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        _ => Err(ComponentError::Configuration(format!(
            "property '{}' must be a literal index",
            name
        ))),
    }
}
