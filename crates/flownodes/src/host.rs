use crate::{require_output, require_property, types};
use flowcore::{ComponentError, ComponentTypeId, Expression, SlotKind};
use flowruntime::{
    AsyncResult, Component, ComponentFactory, ComponentMetadata, ExecutionContext, PortDefinition,
};
use std::sync::Arc;

/// Posts `message` to the host. With `expects_reply` every reply part is put
/// on `reply` and the sequence continues after the final part.
pub fn host_message(message: Expression, expects_reply: bool) -> flowcore::Component {
    flowcore::Component::new(types::HOST_MESSAGE)
        .with_name("host_message")
        .with_seq_input("seqin")
        .with_seq_output("seqout")
        .with_data_output("reply")
        .with_property("message", message)
        .with_property("expectsReply", Expression::literal(expects_reply))
}

pub struct HostMessageComponent;

impl Component for HostMessageComponent {
    fn type_name(&self) -> &str {
        "host.message"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let message = ctx.eval_property("message")?;
        let expects_reply = ctx.eval_property("expectsReply")?.is_truthy();

        if ctx.send_to_host(message, expects_reply).is_none() {
            ctx.propagate_value_through_seqout();
        }
        Ok(())
    }

    fn resume(&self, ctx: &mut ExecutionContext<'_>, result: AsyncResult) -> Result<(), ComponentError> {
        match result {
            AsyncResult::HostReply {
                result,
                final_result,
            } => {
                ctx.propagate_value("reply", result)?;
                if final_result {
                    ctx.end_async_execution();
                    ctx.propagate_value_through_seqout();
                }
                Ok(())
            }
            AsyncResult::TimedOut => {
                ctx.end_async_execution();
                Err(ComponentError::Timeout {
                    millis: ctx.request_timeout().as_millis() as u64,
                })
            }
            other => {
                ctx.end_async_execution();
                Err(ComponentError::ExecutionFailed(format!(
                    "unexpected resumption {:?}",
                    other
                )))
            }
        }
    }
}

pub struct HostMessageFactory;

impl ComponentFactory for HostMessageFactory {
    fn component_type(&self) -> ComponentTypeId {
        types::HOST_MESSAGE
    }

    fn type_name(&self) -> &str {
        "host.message"
    }

    fn create(&self, spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        require_property(spec, "message")?;
        require_property(spec, "expectsReply")?;
        require_output(spec, "reply", SlotKind::Data)?;
        Ok(Arc::new(HostMessageComponent))
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Sends a message to the host and optionally waits for replies"
                .to_string(),
            category: "host".to_string(),
            inputs: vec![PortDefinition::new("seqin", "Run", true)],
            outputs: vec![
                PortDefinition::new("seqout", "Sent, or final reply received", false),
                PortDefinition::new("reply", "Reply part", false),
            ],
        }
    }
}
