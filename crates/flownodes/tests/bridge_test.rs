use async_trait::async_trait;
use flowcore::protocol::{ComponentMessage, InitRequest, MessageKind};
use flowcore::{AssetBuilder, Expression, FlowBuilder, HostMessage, Value};
use flownodes::flow::start;
use flownodes::host::host_message;
use flownodes::instrument::{connect, scpi};
use flownodes::log::log;
use flownodes::standard_registry;
use flowruntime::{EngineConfig, FlowRuntime, HostBridge, InstrumentHost};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockHost {
    commands: AtomicUsize,
}

#[async_trait]
impl InstrumentHost for MockHost {
    async fn connect(&self, device_id: &str) -> Result<Option<Value>, String> {
        Ok(Some(Value::from(format!("{}#0", device_id))))
    }

    async fn execute(
        &self,
        _instrument_id: &str,
        command: &[u8],
        is_query: bool,
    ) -> Result<Option<Value>, String> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        // answer the second query before the first
        if command == b"SLOW?" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if is_query {
            Ok(Some(Value::from(String::from_utf8_lossy(command).into_owned())))
        } else {
            Ok(None)
        }
    }

    async fn on_component_message(&self, message: &ComponentMessage) -> Option<Value> {
        Some(Value::from(format!("ack {}", message.message)))
    }
}

/// Logs the value on input 1 after the preceding action completes
fn log_input() -> flowcore::Component {
    log(Expression::input(1)).with_data_input("value", false)
}

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Runs the flow against `host` until `expected` info logs were seen
async fn run_until_logged(flow: flowcore::Flow, host: Arc<MockHost>, expected: usize) -> Vec<String> {
    init_tracing();
    let registry = standard_registry().unwrap();
    let mut handle = FlowRuntime::spawn(registry, EngineConfig::default());
    let bridge = HostBridge::new(host, handle.sender());

    let mut builder = AssetBuilder::new();
    builder.add_start_flow(flow);
    handle
        .send(HostMessage::init(InitRequest {
            assets: builder.build().unwrap().to_bytes().unwrap(),
            global_values: vec![],
            display: Default::default(),
        }))
        .unwrap();

    let mut logged = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while logged.len() < expected {
            let message = handle.recv().await.expect("worker alive");
            bridge.dispatch(&message);
            for component_message in message.component_messages.unwrap_or_default() {
                if component_message.kind == MessageKind::Info {
                    logged.push(component_message.message.to_string());
                }
            }
        }
    })
    .await
    .expect("flow completes");

    let remaining = handle.shutdown().await;
    assert_eq!(remaining.last().and_then(|m| m.stopped), Some(true));
    logged
}

#[tokio::test]
async fn test_bridge_answers_queries() {
    let mut flow = FlowBuilder::new("measure");
    let s = flow.add_entry(start());
    let slow = flow.add(scpi("dmm", Expression::literal("SLOW?"), true));
    let fast = flow.add(scpi("dmm", Expression::literal("FAST?"), true));
    let log_slow = flow.add(log_input());
    let log_fast = flow.add(log_input());
    flow.connect(s, 0, slow, 0)
        .connect(s, 0, fast, 0)
        .connect(slow, 0, log_slow, 0)
        .connect(slow, 1, log_slow, 1)
        .connect(fast, 0, log_fast, 0)
        .connect(fast, 1, log_fast, 1);

    let host = Arc::new(MockHost::default());
    let logged = run_until_logged(flow.build(), host.clone(), 2).await;

    assert_eq!(logged, vec!["FAST?".to_string(), "SLOW?".to_string()]);
    assert_eq!(host.commands.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_bridge_connects_and_replies_to_component_messages() {
    let mut flow = FlowBuilder::new("session");
    let s = flow.add_entry(start());
    let dev = flow.add(connect("usb0"));
    let ask = flow.add(host_message(Expression::literal("ready?"), true));
    let log_dev = flow.add(log_input());
    let log_ask = flow.add(log_input());
    flow.connect(s, 0, dev, 0)
        .connect(dev, 0, log_dev, 0)
        .connect(dev, 1, log_dev, 1)
        .connect(log_dev, 0, ask, 0)
        .connect(ask, 0, log_ask, 0)
        .connect(ask, 1, log_ask, 1);

    let logged = run_until_logged(flow.build(), Arc::new(MockHost::default()), 2).await;

    assert_eq!(logged, vec!["usb0#0".to_string(), "ack ready?".to_string()]);
}
