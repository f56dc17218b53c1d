use crate::{require_output, require_property, types};
use flowcore::{ComponentError, ComponentTypeId, Expression, SlotKind, Value};
use flowruntime::{
    Component, ComponentFactory, ComponentMetadata, ExecutionContext, PortDefinition,
};
use std::sync::Arc;

/// Data source emitting the value of its `value` property
pub fn constant(value: impl Into<Value>) -> flowcore::Component {
    flowcore::Component::new(types::CONSTANT)
        .with_name("constant")
        .with_data_output("value")
        .with_property("value", Expression::literal(value.into()))
}

/// Binary math component fed by data inputs `a` and `b`
pub fn math(op: MathOp) -> flowcore::Component {
    flowcore::Component::new(op.type_id())
        .with_name(op.name())
        .with_data_input("a", true)
        .with_data_input("b", true)
        .with_data_output("result")
        .with_property("a", Expression::input(0))
        .with_property("b", Expression::input(1))
}

/// Binary math component with a literal right operand
pub fn math_with(op: MathOp, operand: impl Into<Value>) -> flowcore::Component {
    flowcore::Component::new(op.type_id())
        .with_name(op.name())
        .with_data_input("a", true)
        .with_data_output("result")
        .with_property("a", Expression::input(0))
        .with_property("b", Expression::literal(operand.into()))
}

/// Evaluates `expression` whenever all of its data inputs are present
pub fn evaluate(expression: Expression, inputs: &[&str]) -> flowcore::Component {
    let mut component = flowcore::Component::new(types::EVALUATE).with_name("evaluate");
    for input in inputs {
        component = component.with_data_input(*input, true);
    }
    component
        .with_data_output("result")
        .with_property("expression", expression)
}

/// Branches on `condition` through the `true` or `false` sequence output
pub fn compare(condition: Expression) -> flowcore::Component {
    flowcore::Component::new(types::COMPARE)
        .with_name("compare")
        .with_seq_input("seqin")
        .with_seq_output("true")
        .with_seq_output("false")
        .with_property("condition", condition)
}

pub struct ConstantComponent;

impl Component for ConstantComponent {
    fn type_name(&self) -> &str {
        "flow.constant"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let value = ctx.eval_property("value")?;
        ctx.propagate_value("value", value)
    }
}

pub struct ConstantFactory;

impl ComponentFactory for ConstantFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::CONSTANT
    }

    fn type_name(&self) -> &str {
        "flow.constant"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "value")?;
        require_output(spec, "value", SlotKind::Data)?;
        Ok(Arc::new(ConstantComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Emits a constant value".to_string(),
            category: "logic".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("value", "The constant", false)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl MathOp {
    pub const ALL: [MathOp; 4] = [
        MathOp::Add,
        MathOp::Subtract,
        MathOp::Multiply,
        MathOp::Divide,
    ];

    pub fn type_id(self) -> ComponentTypeId {
        match self {
            MathOp::Add => types::ADD,
            MathOp::Subtract => types::SUBTRACT,
            MathOp::Multiply => types::MULTIPLY,
            MathOp::Divide => types::DIVIDE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MathOp::Add => "math.add",
            MathOp::Subtract => "math.subtract",
            MathOp::Multiply => "math.multiply",
            MathOp::Divide => "math.divide",
        }
    }

    fn apply(self, a: f64, b: f64) -> Result<f64, ComponentError> {
        match self {
            MathOp::Add => Ok(a + b),
            MathOp::Subtract => Ok(a - b),
            MathOp::Multiply => Ok(a * b),
            MathOp::Divide if b == 0.0 => {
                Err(ComponentError::ExecutionFailed("division by zero".to_string()))
            }
            MathOp::Divide => Ok(a / b),
        }
    }
}

pub struct MathComponent {
    op: MathOp,
}

fn operand(ctx: &ExecutionContext<'_>, name: &str) -> Result<f64, ComponentError> {
    let value = ctx.eval_property(name)?;
    value.as_f64().ok_or_else(|| ComponentError::InvalidType {
        field: name.to_string(),
        expected: "number".to_string(),
        actual: value.type_name().to_string(),
    })
}

impl Component for MathComponent {
    fn type_name(&self) -> &str {
        self.op.name()
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let a = operand(ctx, "a")?;
        let b = operand(ctx, "b")?;
        let result = self.op.apply(a, b)?;
        ctx.propagate_value("result", Value::Number(result))
    }
}

pub struct MathFactory {
    op: MathOp,
}

impl MathFactory {
    pub fn new(op: MathOp) -> Self {
        Self { op }
    }
}

impl ComponentFactory for MathFactory {
    fn component_type(&self) -> ComponentTypeId {
        self.op.type_id()
    }

    fn type_name(&self) -> &str {
        self.op.name()
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "a")?;
        require_property(spec, "b")?;
        require_output(spec, "result", SlotKind::Data)?;
        Ok(Arc::new(MathComponent { op: self.op }))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: format!("Numeric operation {}", self.op.name()),
            category: "math".to_string(),
            inputs: vec![
                PortDefinition::new("a", "Left operand", true),
                PortDefinition::new("b", "Right operand", false),
            ],
            outputs: vec![PortDefinition::new("result", "Result", false)],
        }
    }
}

pub struct EvaluateComponent;

impl Component for EvaluateComponent {
    fn type_name(&self) -> &str {
        "flow.evaluate"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let result = ctx.eval_property("expression")?;
        ctx.propagate_value("result", result)
    }
}

pub struct EvaluateFactory;

impl ComponentFactory for EvaluateFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::EVALUATE
    }

    fn type_name(&self) -> &str {
        "flow.evaluate"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "expression")?;
        require_output(spec, "result", SlotKind::Data)?;
        Ok(Arc::new(EvaluateComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Evaluates an expression over its inputs".to_string(),
            category: "logic".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("result", "Expression value", false)],
        }
    }
}

pub struct CompareComponent;

impl Component for CompareComponent {
    fn type_name(&self) -> &str {
        "flow.compare"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let branch = if ctx.eval_property("condition")?.is_truthy() {
            "true"
        } else {
            "false"
        };
        ctx.propagate_value(branch, Value::Null)
    }
}

pub struct CompareFactory;

impl ComponentFactory for CompareFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::COMPARE
    }

    fn type_name(&self) -> &str {
        "flow.compare"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "condition")?;
        require_output(spec, "true", SlotKind::Sequence)?;
        require_output(spec, "false", SlotKind::Sequence)?;
        Ok(Arc::new(CompareComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Continues through 'true' or 'false' depending on a condition"
                .to_string(),
            category: "logic".to_string(),
            inputs: vec![PortDefinition::new("seqin", "Run", true)],
            outputs: vec![
                PortDefinition::new("true", "Condition held", false),
                PortDefinition::new("false", "Condition failed", false),
            ],
        }
    }
}
