use crate::{require_output, require_property, types};
use flowcore::{ComponentError, ComponentTypeId, Expression, SlotKind, Value};
use flowruntime::{
    AsyncResult, Component, ComponentFactory, ComponentMetadata, ExecutionContext, PortDefinition,
};
use std::sync::Arc;

/// Sends an SCPI command to `instrument`. Queries put the answer on `result`.
pub fn scpi(instrument: &str, command: Expression, query: bool) -> flowcore::Component {
    flowcore::Component::new(types::SCPI)
        .with_name("scpi")
        .with_seq_input("seqin")
        .with_seq_output("seqout")
        .with_data_output("result")
        .with_property("instrument", Expression::literal(instrument))
        .with_property("command", command)
        .with_property("query", Expression::literal(query))
}

/// Connects to a device; the host's answer goes to `instrument`
pub fn connect(device: &str) -> flowcore::Component {
    flowcore::Component::new(types::CONNECT)
        .with_name("connect")
        .with_seq_input("seqin")
        .with_seq_output("seqout")
        .with_data_output("instrument")
        .with_property("device", Expression::literal(device))
}

fn string_property(ctx: &ExecutionContext<'_>, name: &str) -> Result<String, ComponentError> {
    match ctx.eval_property(name)? {
        Value::String(s) => Ok(s),
        other => Err(ComponentError::InvalidType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

fn timed_out(ctx: &ExecutionContext<'_>) -> ComponentError {
    ComponentError::Timeout {
        millis: ctx.request_timeout().as_millis() as u64,
    }
}

pub struct ScpiComponent;

impl Component for ScpiComponent {
    fn type_name(&self) -> &str {
        "instrument.scpi"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let instrument = string_property(ctx, "instrument")?;
        let command = string_property(ctx, "command")?;
        let query = ctx.eval_property("query")?.is_truthy();

        ctx.request_hardware(instrument, command.into_bytes(), query);
        Ok(())
    }

    fn resume(&self, ctx: &mut ExecutionContext<'_>, result: AsyncResult) -> Result<(), ComponentError> {
        ctx.end_async_execution();
        match result {
            AsyncResult::Hardware(Ok(answer)) => {
                if let Some(answer) = answer {
                    ctx.propagate_value("result", answer)?;
                }
                ctx.propagate_value_through_seqout();
                Ok(())
            }
            AsyncResult::Hardware(Err(message)) => Err(ComponentError::ExecutionFailed(message)),
            AsyncResult::TimedOut => Err(timed_out(ctx)),
            other => Err(ComponentError::ExecutionFailed(format!(
                "unexpected resumption {:?}",
                other
            ))),
        }
    }

    /// Nothing to undo on the engine side. The correlation entry is gone once
    /// the engine stops, so a reply the host still sends is dropped as unknown.
    fn cancel(&self, ctx: &mut ExecutionContext<'_>) {
        tracing::debug!(
            "SCPI request of component {} abandoned",
            ctx.component_index()
        );
    }
}

pub struct ScpiFactory;

impl ComponentFactory for ScpiFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::SCPI
    }

    fn type_name(&self) -> &str {
        "instrument.scpi"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "instrument")?;
        require_property(spec, "command")?;
        require_property(spec, "query")?;
        require_output(spec, "result", SlotKind::Data)?;
        Ok(Arc::new(ScpiComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Sends an SCPI command or query to an instrument".to_string(),
            category: "instrument".to_string(),
            inputs: vec![PortDefinition::new("seqin", "Run", true)],
            outputs: vec![
                PortDefinition::new("seqout", "Command completed", false),
                PortDefinition::new("result", "Query answer", false),
            ],
        }
    }
}

pub struct ConnectComponent;

impl Component for ConnectComponent {
    fn type_name(&self) -> &str {
        "instrument.connect"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let device = string_property(ctx, "device")?;
        ctx.set_component_state(Some(Value::String(device.clone())));
        ctx.request_connect(device);
        Ok(())
    }

    fn resume(&self, ctx: &mut ExecutionContext<'_>, result: AsyncResult) -> Result<(), ComponentError> {
        ctx.end_async_execution();
        match result {
            AsyncResult::Hardware(Ok(answer)) => {
                let instrument = answer
                    .or_else(|| ctx.component_state())
                    .unwrap_or(Value::Null);
                ctx.propagate_value("instrument", instrument)?;
                ctx.propagate_value_through_seqout();
                Ok(())
            }
            AsyncResult::Hardware(Err(message)) => Err(ComponentError::ExecutionFailed(format!(
                "connect failed: {}",
                message
            ))),
            AsyncResult::TimedOut => Err(timed_out(ctx)),
            other => Err(ComponentError::ExecutionFailed(format!(
                "unexpected resumption {:?}",
                other
            ))),
        }
    }
}

pub struct ConnectFactory;

impl ComponentFactory for ConnectFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::CONNECT
    }

    fn type_name(&self) -> &str {
        "instrument.connect"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "device")?;
        require_output(spec, "instrument", SlotKind::Data)?;
        Ok(Arc::new(ConnectComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Connects to an instrument through the host".to_string(),
            category: "instrument".to_string(),
            inputs: vec![PortDefinition::new("seqin", "Run", true)],
            outputs: vec![
                PortDefinition::new("seqout", "Connected", false),
                PortDefinition::new("instrument", "Connected instrument", false),
            ],
        }
    }
}
