use crate::{require_property, types};
use flowcore::protocol::MessageKind;
use flowcore::{ComponentError, ComponentTypeId, Expression, Value};
use flowruntime::{Component, ComponentFactory, ComponentMetadata, ExecutionContext, PortDefinition};
use std::sync::Arc;

/// Logs the value of `message` at info level
pub fn log(message: Expression) -> flowcore::Component {
    flowcore::Component::new(types::LOG)
        .with_name("log")
        .with_seq_input("seqin")
        .with_seq_output("seqout")
        .with_property("message", message)
}

/// Log with an explicit level ("debug", "info", "warning" or "error")
pub fn log_at(level: &str, message: Expression) -> flowcore::Component {
    log(message).with_property("level", Expression::literal(level))
}

pub struct LogComponent;

fn kind(level: &Value) -> MessageKind {
    match level.as_str() {
        Some("debug") => MessageKind::Debug,
        Some("warning") => MessageKind::Warning,
        Some("error") => MessageKind::Error,
        _ => MessageKind::Info,
    }
}

impl Component for LogComponent {
    fn type_name(&self) -> &str {
        "flow.log"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let message = ctx.eval_property("message")?;
        let level = if ctx.has_property("level") {
            ctx.eval_property("level")?
        } else {
            Value::Null
        };

        let text = match message {
            Value::String(s) => s,
            other => other.to_string(),
        };
        ctx.log(kind(&level), text);
        ctx.propagate_value_through_seqout();
        Ok(())
    }
}

pub struct LogFactory;

impl ComponentFactory for LogFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::LOG
    }

    fn type_name(&self) -> &str {
        "flow.log"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "message")?;
        Ok(Arc::new(LogComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Sends a log message to the host".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::new("seqin", "Run", true)],
            outputs: vec![PortDefinition::new("seqout", "Logged", false)],
        }
    }
}
