//! Property expression evaluation against flow state.
//!
//! Variables resolve lexically: the evaluating flow state, then its
//! ancestors, then globals. Descendant states are never consulted.

use crate::flow_state::FlowStates;
use flowcore::{BinaryOp, ComponentError, ComponentIndex, Expression, FlowStateId, UnaryOp, Value};
use std::collections::HashMap;

/// Where an expression is evaluated
pub struct Scope<'a> {
    pub states: &'a FlowStates,
    pub globals: &'a HashMap<String, Value>,
    pub flow_state: FlowStateId,
    pub component: ComponentIndex,
}

impl Scope<'_> {
    pub fn evaluate(&self, expression: &Expression) -> Result<Value, ComponentError> {
        match expression {
            Expression::Literal { value } => Ok(value.clone()),
            Expression::Input { index } => self
                .states
                .get(self.flow_state)
                .and_then(|state| state.input(self.component, *index as usize))
                .cloned()
                .ok_or_else(|| ComponentError::MissingInput(format!("#{}", index))),
            Expression::Variable { name } => lookup_variable(self.states, self.globals, self.flow_state, name)
                .ok_or_else(|| ComponentError::Evaluation(format!("unknown variable '{}'", name))),
            Expression::Unary { op, operand } => unary(*op, self.evaluate(operand)?),
            Expression::Binary { op, lhs, rhs } => match op {
                // short-circuit
                BinaryOp::And => {
                    let left = self.evaluate(lhs)?;
                    if !left.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(self.evaluate(rhs)?.is_truthy()))
                }
                BinaryOp::Or => {
                    let left = self.evaluate(lhs)?;
                    if left.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(self.evaluate(rhs)?.is_truthy()))
                }
                _ => binary(*op, self.evaluate(lhs)?, self.evaluate(rhs)?),
            },
        }
    }
}

pub fn lookup_variable(
    states: &FlowStates,
    globals: &HashMap<String, Value>,
    flow_state: FlowStateId,
    name: &str,
) -> Option<Value> {
    states
        .ancestry(flow_state)
        .into_iter()
        .filter_map(|id| states.get(id))
        .find_map(|state| state.local(name).cloned())
        .or_else(|| globals.get(name).cloned())
}

/// Assign to the nearest declaration of `name` visible from `flow_state`
pub fn assign_variable(
    states: &mut FlowStates,
    globals: &mut HashMap<String, Value>,
    flow_state: FlowStateId,
    name: &str,
    value: Value,
) -> Result<(), ComponentError> {
    let owner = states
        .ancestry(flow_state)
        .into_iter()
        .find(|id| states.get(*id).is_some_and(|s| s.has_local(name)));

    if let Some(state) = owner.and_then(|id| states.get_mut(id)) {
        state.set_local(name, value);
        return Ok(());
    }

    match globals.get_mut(name) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(ComponentError::Evaluation(format!(
            "unknown variable '{}'",
            name
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, ComponentError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Neg => match value {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(type_error("operand of '-'", "number", &other)),
        },
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ComponentError> {
    use BinaryOp::*;

    match op {
        Add => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", lhs, rhs)))
            }
            (Value::Bytes(a), Value::Bytes(b)) => {
                let mut joined = a.clone();
                joined.extend_from_slice(b);
                Ok(Value::Bytes(joined))
            }
            _ => Err(type_error("operands of '+'", "number or string", &lhs)),
        },
        Sub | Mul | Div | Rem => {
            let a = number(&lhs, op)?;
            let b = number(&rhs, op)?;
            Ok(Value::Number(match op {
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                _ => a % b,
            }))
        }
        Eq => Ok(Value::Bool(lhs == rhs)),
        Ne => Ok(Value::Bool(lhs != rhs)),
        Lt | Le | Gt | Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => {
                    return Err(type_error("comparison operands", "numbers or strings", &lhs))
                }
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        And => Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
        Or => Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
    }
}

fn number(value: &Value, op: BinaryOp) -> Result<f64, ComponentError> {
    value
        .as_f64()
        .ok_or_else(|| type_error(&format!("operand of {:?}", op), "number", value))
}

fn type_error(field: &str, expected: &str, actual: &Value) -> ComponentError {
    ComponentError::InvalidType {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}
