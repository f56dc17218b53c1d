use crate::context::ExecutionContext;
use flowcore::{ComponentError, ComponentTypeId, Value};
use std::sync::Arc;

pub type ActivationId = u64;

/// Result delivered to a suspended activation
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncResult {
    /// Reply to a hardware command or connect request: result or host error message
    Hardware(Result<Option<Value>, String>),
    /// Reply to a component message sent to the host; may arrive in several parts
    HostReply { result: Value, final_result: bool },
    /// A called sub-flow has finished, with the first error it raised if any
    FlowFinished { error: Option<String> },
    /// The correlated reply did not arrive within the request timeout
    TimedOut,
    /// Resumption driven directly by the embedding code
    Custom(Value),
}

/// Execution function of one compiled component.
///
/// `execute` must not block. Work that waits on the outside world starts an
/// async window with `ExecutionContext::start_async_execution` and finishes
/// in `resume`, which must end the window exactly once, even on error.
pub trait Component: Send + Sync {
    fn type_name(&self) -> &str;

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError>;

    fn resume(
        &self,
        ctx: &mut ExecutionContext<'_>,
        result: AsyncResult,
    ) -> Result<(), ComponentError> {
        let _ = result;
        ctx.end_async_execution();
        Ok(())
    }

    /// Called on stop for activations still waiting; abort the underlying operation here
    fn cancel(&self, _ctx: &mut ExecutionContext<'_>) {}
}

/// Factory trait for creating component instances, resolved once per compiled component
pub trait ComponentFactory: Send + Sync {
    /// Stable type id baked into the compiled asset
    fn component_type(&self) -> ComponentTypeId;

    fn type_name(&self) -> &str;

    /// Create the execution function for one compiled component record
    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError>;

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata::default()
    }
}

/// Metadata about a component type
#[derive(Debug, Clone)]
pub struct ComponentMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for ComponentMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
        }
    }
}
