//! Small component set used by the runtime tests

#![allow(dead_code)]

use flowcore::{AssetBuilder, ComponentError, ComponentTypeId, Expression, Flow, HostMessage, Value};
use flowcore::protocol::InitRequest;
use flowruntime::{
    AsyncResult, Component, ComponentFactory, ComponentRegistry, ExecutionContext,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SOURCE: ComponentTypeId = 100;
pub const STORE: ComponentTypeId = 101;
pub const WAIT: ComponentTypeId = 102;
pub const FAIL: ComponentTypeId = 103;
pub const TRIGGER: ComponentTypeId = 104;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Entry component putting its `value` property on output 0
pub fn source(value: impl Into<Value>) -> flowcore::Component {
    flowcore::Component::new(SOURCE)
        .with_name("source")
        .with_data_output("value")
        .with_property("value", Expression::literal(value))
}

/// Keeps the last value it received in its component state
pub fn store() -> flowcore::Component {
    flowcore::Component::new(STORE)
        .with_name("store")
        .with_data_input("value", true)
}

/// Waits until resumed with `AsyncResult::Custom`, then emits the value on `result`
pub fn wait() -> flowcore::Component {
    flowcore::Component::new(WAIT)
        .with_name("wait")
        .with_seq_input("seqin")
        .with_seq_output("seqout")
        .with_data_output("result")
}

pub fn fail() -> flowcore::Component {
    flowcore::Component::new(FAIL)
        .with_name("fail")
        .with_seq_input("seqin")
        .with_seq_output("seqout")
}

pub fn trigger() -> flowcore::Component {
    flowcore::Component::new(TRIGGER)
        .with_name("trigger")
        .with_seq_output("seqout")
}

struct Source;

impl Component for Source {
    fn type_name(&self) -> &str {
        "test.source"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let value = ctx.eval_property("value")?;
        ctx.propagate_value("value", value)
    }
}

struct Store;

impl Component for Store {
    fn type_name(&self) -> &str {
        "test.store"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        let value = ctx.require_input("value")?;
        ctx.set_component_state(Some(value));
        Ok(())
    }
}

struct Wait {
    cancelled: Arc<AtomicUsize>,
}

impl Component for Wait {
    fn type_name(&self) -> &str {
        "test.wait"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        ctx.start_async_execution();
        Ok(())
    }

    fn resume(&self, ctx: &mut ExecutionContext<'_>, result: AsyncResult) -> Result<(), ComponentError> {
        ctx.end_async_execution();
        match result {
            AsyncResult::Custom(value) => {
                ctx.propagate_value("result", value)?;
                ctx.propagate_value_through_seqout();
                Ok(())
            }
            AsyncResult::TimedOut => Err(ComponentError::Timeout { millis: 0 }),
            other => Err(ComponentError::ExecutionFailed(format!("{:?}", other))),
        }
    }

    fn cancel(&self, _ctx: &mut ExecutionContext<'_>) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fail;

impl Component for Fail {
    fn type_name(&self) -> &str {
        "test.fail"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        // dropped because the activation fails
        ctx.propagate_value_through_seqout();
        Err(ComponentError::ExecutionFailed("boom".to_string()))
    }
}

struct Trigger;

impl Component for Trigger {
    fn type_name(&self) -> &str {
        "test.trigger"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComponentError> {
        ctx.propagate_value_through_seqout();
        Ok(())
    }
}

struct Factory {
    type_id: ComponentTypeId,
    name: &'static str,
    cancelled: Arc<AtomicUsize>,
}

impl ComponentFactory for Factory {
    fn component_type(&self) -> ComponentTypeId {
        self.type_id
    }

    fn type_name(&self) -> &str {
        self.name
    }

    fn create(&self, _spec: &flowcore::Component) -> Result<Arc<dyn Component>, ComponentError> {
        let component: Arc<dyn Component> = match self.type_id {
            SOURCE => Arc::new(Source),
            STORE => Arc::new(Store),
            WAIT => Arc::new(Wait {
                cancelled: self.cancelled.clone(),
            }),
            FAIL => Arc::new(Fail),
            _ => Arc::new(Trigger),
        };
        Ok(component)
    }
}

/// Registry with the test components. The counter records `cancel` calls on `wait`.
pub fn registry() -> (Arc<ComponentRegistry>, Arc<AtomicUsize>) {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let mut registry = ComponentRegistry::new();
    for (type_id, name) in [
        (SOURCE, "test.source"),
        (STORE, "test.store"),
        (WAIT, "test.wait"),
        (FAIL, "test.fail"),
        (TRIGGER, "test.trigger"),
    ] {
        registry
            .register(Arc::new(Factory {
                type_id,
                name,
                cancelled: cancelled.clone(),
            }))
            .unwrap();
    }
    (Arc::new(registry), cancelled)
}

pub fn init_message(flow: Flow) -> HostMessage {
    let mut builder = AssetBuilder::new();
    builder.add_start_flow(flow);
    builder.global("limit", 10.0);
    let assets = builder.build().unwrap();

    HostMessage::init(InitRequest {
        assets: assets.to_bytes().unwrap(),
        global_values: vec![],
        display: Default::default(),
    })
}
