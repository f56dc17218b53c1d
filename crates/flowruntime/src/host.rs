//! Host side of the external action bridge.
//!
//! The engine cannot touch instruments or host services itself. `HostBridge`
//! watches engine messages on the host side, performs the requested work
//! through an `InstrumentHost` on separate tasks and posts the correlated
//! replies back into the engine's inbox. Replies may therefore arrive in any
//! order.

use async_trait::async_trait;
use flowcore::protocol::{
    ComponentMessage, ConnectRequest, HardwareCommand, HardwareResult, MessageKind, ResultToWorker,
};
use flowcore::{EngineMessage, HostMessage, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Privileged operations performed by the host on behalf of the engine
#[async_trait]
pub trait InstrumentHost: Send + Sync + 'static {
    async fn connect(&self, device_id: &str) -> Result<Option<Value>, String>;

    /// Send a command to an instrument; queries return the instrument's answer
    async fn execute(
        &self,
        instrument_id: &str,
        command: &[u8],
        is_query: bool,
    ) -> Result<Option<Value>, String>;

    /// Answer a host-bound component message. `None` sends no reply.
    async fn on_component_message(&self, _message: &ComponentMessage) -> Option<Value> {
        None
    }
}

pub struct HostBridge<H: InstrumentHost> {
    host: Arc<H>,
    sender: mpsc::UnboundedSender<HostMessage>,
}

impl<H: InstrumentHost> Clone for HostBridge<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            sender: self.sender.clone(),
        }
    }
}

impl<H: InstrumentHost> HostBridge<H> {
    pub fn new(host: Arc<H>, sender: mpsc::UnboundedSender<HostMessage>) -> Self {
        Self { host, sender }
    }

    /// Serve every request carried by `message`. Returns true if anything was dispatched.
    pub fn dispatch(&self, message: &EngineMessage) -> bool {
        let mut dispatched = false;

        if let Some(command) = &message.hardware_command {
            self.spawn_command(command.clone());
            dispatched = true;
        }
        if let Some(request) = &message.connect_request {
            self.spawn_connect(request.clone());
            dispatched = true;
        }
        if let Some(messages) = &message.component_messages {
            for component_message in messages {
                log_component_message(component_message);
                if component_message.expects_reply {
                    self.spawn_reply(component_message.clone());
                    dispatched = true;
                }
            }
        }

        dispatched
    }

    fn spawn_command(&self, command: HardwareCommand) {
        let host = Arc::clone(&self.host);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tracing::debug!(
                "-> {} {}",
                command.instrument_id,
                String::from_utf8_lossy(&command.command)
            );
            let outcome = host
                .execute(&command.instrument_id, &command.command, command.is_query)
                .await;
            post(&sender, hardware_reply(command.correlation_id, outcome));
        });
    }

    fn spawn_connect(&self, request: ConnectRequest) {
        let host = Arc::clone(&self.host);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tracing::info!("Connecting to device {}", request.device_id);
            let outcome = host.connect(&request.device_id).await;
            post(&sender, hardware_reply(request.correlation_id, outcome));
        });
    }

    fn spawn_reply(&self, message: ComponentMessage) {
        let Some(message_id) = message.id else {
            tracing::warn!("Component message expects a reply but carries no id");
            return;
        };
        let host = Arc::clone(&self.host);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if let Some(result) = host.on_component_message(&message).await {
                post(
                    &sender,
                    HostMessage::result_to_worker(ResultToWorker {
                        message_id,
                        result,
                        final_result: true,
                    }),
                );
            }
        });
    }
}

fn hardware_reply(correlation_id: u64, outcome: Result<Option<Value>, String>) -> HostMessage {
    let (result, error_message) = match outcome {
        Ok(result) => (result, None),
        Err(message) => (None, Some(message)),
    };
    HostMessage::hardware_result(HardwareResult {
        correlation_id,
        error_message,
        result,
    })
}

fn post(sender: &mpsc::UnboundedSender<HostMessage>, message: HostMessage) {
    if sender.send(message).is_err() {
        tracing::debug!("Engine gone; dropping reply");
    }
}

fn log_component_message(message: &ComponentMessage) {
    let origin = match (message.flow_state, message.component) {
        (Some(flow_state), Some(component)) => format!("[fs {} / #{}]", flow_state, component),
        _ => "[engine]".to_string(),
    };
    match message.kind {
        MessageKind::Error => tracing::error!("{} {}", origin, message.message),
        MessageKind::Warning => tracing::warn!("{} {}", origin, message.message),
        MessageKind::Debug => tracing::debug!("{} {}", origin, message.message),
        MessageKind::Info | MessageKind::Host => tracing::info!("{} {}", origin, message.message),
    }
}
