use crate::engine::Engine;
use crate::error::EngineError;
use crate::registry::ComponentRegistry;
use flowcore::{EngineMessage, HostMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Configuration for the engine and its worker
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval of the worker's tick loop
    pub tick_interval: Duration,
    /// How long a hardware, connect or host request may stay unanswered
    pub request_timeout: Duration,
    /// Upper bound on same-tick execute/propagate passes
    pub max_passes_per_tick: usize,
    /// Arrays and objects with at least this many elements are shared by handle
    pub shared_value_threshold: usize,
    pub emit_debugger_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(10),
            max_passes_per_tick: 1024,
            shared_value_threshold: 64,
            emit_debugger_events: true,
        }
    }
}

/// Runs an `Engine` inside its own tokio task. The host talks to it only
/// through the two message channels of the returned `RuntimeHandle`.
pub struct FlowRuntime;

impl FlowRuntime {
    pub fn spawn(registry: Arc<ComponentRegistry>, config: EngineConfig) -> RuntimeHandle {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let engine = Engine::new(registry, config);
        let task = tokio::spawn(run_worker(engine, host_rx, engine_tx, cancel.clone()));

        RuntimeHandle {
            sender: host_tx,
            receiver: engine_rx,
            cancel,
            task,
        }
    }
}

async fn run_worker(
    mut engine: Engine,
    mut inbox: mpsc::UnboundedReceiver<HostMessage>,
    outbox: mpsc::UnboundedSender<EngineMessage>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(engine.config().tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!("Engine worker started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                engine.stop();
            }
            message = inbox.recv() => match message {
                Some(message) => {
                    engine.handle_message(message);
                    engine.tick();
                }
                None => {
                    tracing::debug!("Host channel closed");
                    engine.stop();
                }
            },
            _ = interval.tick() => engine.tick(),
        }

        for message in engine.drain_messages() {
            if outbox.send(message).is_err() {
                tracing::debug!("Host receiver dropped; stopping engine");
                engine.stop();
                break;
            }
        }

        if engine.is_stopped() {
            // Flush whatever stop produced after a send failure
            for message in engine.drain_messages() {
                let _ = outbox.send(message);
            }
            break;
        }
    }

    tracing::info!("Engine worker exited");
}

/// Host side of a running engine
pub struct RuntimeHandle {
    sender: mpsc::UnboundedSender<HostMessage>,
    receiver: mpsc::UnboundedReceiver<EngineMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    pub fn send(&self, message: HostMessage) -> Result<(), EngineError> {
        self.sender.send(message).map_err(|_| EngineError::Stopped)
    }

    /// A second sender for bridges posting replies from other tasks
    pub fn sender(&self) -> mpsc::UnboundedSender<HostMessage> {
        self.sender.clone()
    }

    pub async fn recv(&mut self) -> Option<EngineMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EngineMessage> {
        self.receiver.try_recv().ok()
    }

    /// Stop the engine and wait for the worker to exit. Messages produced
    /// on the way out, including the `stopped` acknowledgment, are returned.
    pub async fn shutdown(mut self) -> Vec<EngineMessage> {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            tracing::error!("Engine worker panicked: {}", e);
        }

        let mut remaining = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            remaining.push(message);
        }
        remaining
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
