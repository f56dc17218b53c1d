use crate::{require_property, types};
use flowcore::{ComponentError, ComponentTypeId, Expression};
use flowruntime::{Component, ComponentFactory, ComponentMetadata, ExecutionContext, PortDefinition};
use std::sync::Arc;

/// Assigns `value` to the local or global variable `name`
pub fn set_variable(name: &str, value: Expression) -> flowcore::Component {
    flowcore::Component::new(types::SET_VARIABLE)
        .with_name("set_variable")
        .with_seq_input("seqin")
        .with_seq_output("seqout")
        .with_property("variable", Expression::variable(name))
        .with_property("value", value)
}

pub struct SetVariableComponent {
    variable: String,
}

impl Component for SetVariableComponent {
    fn type_name(&self) -> &str {
        "flow.set_variable"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let value = ctx.eval_property("value")?;
        ctx.set_variable(&self.variable, value)?;
        ctx.propagate_value_through_seqout();
        Ok(())
    }
}

pub struct SetVariableFactory;

impl ComponentFactory for SetVariableFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::SET_VARIABLE
    }

    fn type_name(&self) -> &str {
        "flow.set_variable"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "value")?;
        let variable = spec
            .property_index("variable")
            .and_then(|index| spec.properties[index].expression.assignable_name())
            .ok_or_else(|| {
                ComponentError::Configuration("'variable' must name a variable".to_string())
            })?;

        Ok(Arc::new(SetVariableComponent {
            variable: variable.to_string(),
        }))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Assigns a value to a variable".to_string(),
            category: "variables".to_string(),
            inputs: vec![PortDefinition::new("seqin", "Run", true)],
            outputs: vec![PortDefinition::new("seqout", "Assigned", false)],
        }
    }
}
