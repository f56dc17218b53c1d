use crate::{literal_index, require_output, require_property, types};
use flowcore::{ComponentError, ComponentTypeId, Expression, FlowIndex, SlotKind, Value};
use flowruntime::{
    AsyncResult, Component, ComponentFactory, ComponentMetadata, ExecutionContext, PortDefinition,
};
use std::sync::Arc;

/// Entry point: fires its sequence output once when the flow state starts
pub fn start() -> flowcore::Component {
    flowcore::Component::new(types::START)
        .with_name("start")
        .with_seq_output("seqout")
}

/// Reads input slot `index` of the calling component
pub fn input(index: u32) -> flowcore::Component {
    flowcore::Component::new(types::INPUT)
        .with_name("input")
        .with_data_output("value")
        .with_property("input", Expression::literal(index as f64))
}

/// Writes its `value` input to output `index` of the calling component.
/// In a root flow state the value is kept as the component's state.
pub fn output(index: u32) -> flowcore::Component {
    flowcore::Component::new(types::OUTPUT)
        .with_name("output")
        .with_data_input("value", true)
        .with_property("output", Expression::literal(index as f64))
}

/// Sequence-triggered variant of `output`, for firing sequence outputs of the caller
pub fn output_seq(index: u32) -> flowcore::Component {
    flowcore::Component::new(types::OUTPUT)
        .with_name("output")
        .with_seq_input("seqin")
        .with_property("output", Expression::literal(index as f64))
}

/// Runs `flow` as a sub-flow. `inputs` become data inputs readable by the
/// sub-flow's `input` components; `outputs` are written by its `output` components.
pub fn call_action(flow: FlowIndex, inputs: &[&str], outputs: &[&str]) -> flowcore::Component {
    let mut component = flowcore::Component::new(types::CALL_ACTION)
        .with_name("call_action")
        .with_seq_input("seqin");
    for name in inputs {
        component = component.with_data_input(*name, false);
    }
    component = component.with_seq_output("seqout");
    for name in outputs {
        component = component.with_data_output(*name);
    }
    component.with_property("flow", Expression::literal(flow as f64))
}

pub struct StartComponent;

impl Component for StartComponent {
    fn type_name(&self) -> &str {
        "flow.start"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        ctx.propagate_value_through_seqout();
        Ok(())
    }
}

pub struct StartFactory;

impl ComponentFactory for StartFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::START
    }

    fn type_name(&self) -> &str {
        "flow.start"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_output(spec, "seqout", SlotKind::Sequence)?;
        Ok(Arc::new(StartComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Starts a flow".to_string(),
            category: "flow".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("seqout", "Fired on start", false)],
        }
    }
}

pub struct InputComponent {
    input: usize,
}

impl Component for InputComponent {
    fn type_name(&self) -> &str {
        "flow.input"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let value = ctx.parent_input(self.input).unwrap_or(Value::Null);
        ctx.propagate_value("value", value)
    }
}

pub struct InputFactory;

impl ComponentFactory for InputFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::INPUT
    }

    fn type_name(&self) -> &str {
        "flow.input"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_output(spec, "value", SlotKind::Data)?;
        Ok(Arc::new(InputComponent {
            input: literal_index(spec, "input")?,
        }))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Input of a sub-flow".to_string(),
            category: "flow".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("value", "Caller's input value", false)],
        }
    }
}

pub struct OutputComponent {
    output: usize,
}

impl Component for OutputComponent {
    fn type_name(&self) -> &str {
        "flow.output"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let value = ctx.input_by_name("value").unwrap_or(Value::Null);

        if ctx.propagate_to_parent(self.output, value.clone()).is_err() {
            // Root flow state: nobody to hand the value to
            ctx.set_component_state(Some(value));
        }
        Ok(())
    }
}

pub struct OutputFactory;

impl ComponentFactory for OutputFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::OUTPUT
    }

    fn type_name(&self) -> &str {
        "flow.output"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        Ok(Arc::new(OutputComponent {
            output: literal_index(spec, "output")?,
        }))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Output of a sub-flow".to_string(),
            category: "flow".to_string(),
            inputs: vec![PortDefinition::new("value", "Value handed to the caller", true)],
            outputs: vec![],
        }
    }
}

pub struct CallActionComponent;

impl Component for CallActionComponent {
    fn type_name(&self) -> &str {
        "flow.call_action"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let flow = ctx.eval_property("flow")?;
        let index = match flow.as_f64() {
            Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= FlowIndex::MAX as f64 => n as FlowIndex,
            _ => {
                return Err(ComponentError::InvalidType {
                    field: "flow".to_string(),
                    expected: "flow index".to_string(),
                    actual: flow.to_string(),
                })
            }
        };
        ctx.call_flow(index)
    }

    fn resume(&self, ctx: &mut ExecutionContext<'_>, result: AsyncResult) -> Result<(), ComponentError> {
        ctx.end_async_execution();
        match result {
            AsyncResult::FlowFinished { error: None } => {
                ctx.propagate_value_through_seqout();
                Ok(())
            }
            AsyncResult::FlowFinished { error: Some(message) } => Err(
                ComponentError::ExecutionFailed(format!("called flow failed: {}", message)),
            ),
            other => Err(ComponentError::ExecutionFailed(format!(
                "unexpected resumption {:?}",
                other
            ))),
        }
    }
}

pub struct CallActionFactory;

impl ComponentFactory for CallActionFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::CALL_ACTION
    }

    fn type_name(&self) -> &str {
        "flow.call_action"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "flow")?;
        Ok(Arc::new(CallActionComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Runs another flow and waits for it to finish".to_string(),
            category: "flow".to_string(),
            inputs: vec![PortDefinition::new("seqin", "Run", true)],
            outputs: vec![PortDefinition::new("seqout", "Called flow finished", false)],
        }
    }
}
