use flowcore::protocol::{
    AssignProperty, EvalProperty, HardwareResult, InitRequest, MessageKind, ResultToWorker,
};
use flowcore::{
    AssetBuilder, BinaryOp, EngineMessage, Expression, Flow, FlowBuilder, HostMessage, Value,
};
use flownodes::flow::{call_action, input, output, start};
use flownodes::host::host_message;
use flownodes::instrument::scpi;
use flownodes::log::log;
use flownodes::logic::{compare, constant, math, math_with, MathOp};
use flownodes::standard_registry;
use flownodes::variable::set_variable;
use flowruntime::{
    Breakpoint, ComponentStatus, DebuggerCommand, DebuggerState, Engine, EngineConfig,
};
use std::time::{Duration, Instant};

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

fn create_engine(flows: Vec<Flow>) -> Engine {
    create_engine_with(flows, EngineConfig::default())
}

fn create_engine_with(flows: Vec<Flow>, config: EngineConfig) -> Engine {
    init_tracing();
    let registry = standard_registry().expect("standard components register");
    let mut engine = Engine::new(registry, config);

    let mut builder = AssetBuilder::new();
    let mut flows = flows.into_iter();
    if let Some(main) = flows.next() {
        builder.add_start_flow(main);
    }
    for flow in flows {
        builder.add_flow(flow);
    }
    let assets = builder.build().expect("valid assets");

    engine.handle_message(HostMessage::init(InitRequest {
        assets: assets.to_bytes().unwrap(),
        global_values: vec![],
        display: Default::default(),
    }));
    let messages = engine.drain_messages();
    let reply = messages.iter().find_map(|m| m.init.clone()).unwrap();
    assert!(reply.ok, "init failed: {:?}", reply.error);
    engine
}

fn ticks(engine: &mut Engine, count: usize) {
    for _ in 0..count {
        engine.tick();
    }
}

fn hardware_commands(messages: &[EngineMessage]) -> Vec<flowcore::protocol::HardwareCommand> {
    messages
        .iter()
        .filter_map(|m| m.hardware_command.clone())
        .collect()
}

fn component_messages(messages: &[EngineMessage]) -> Vec<flowcore::protocol::ComponentMessage> {
    messages
        .iter()
        .filter_map(|m| m.component_messages.clone())
        .flatten()
        .collect()
}

fn activations_of(engine: &Engine, component: u32) -> usize {
    engine
        .debugger()
        .history()
        .iter()
        .filter(|r| r.component == component)
        .count()
}

fn property_values(messages: Vec<EngineMessage>) -> Vec<flowcore::protocol::PropertyValue> {
    messages
        .into_iter()
        .filter_map(|m| m.property_values)
        .flatten()
        .collect()
}

fn eval_request(flow_state: u32, component: u32, property_value_index: u32) -> HostMessage {
    HostMessage {
        eval_properties: Some(vec![EvalProperty {
            flow_state,
            component,
            property: 0,
            property_value_index,
        }]),
        ..Default::default()
    }
}

fn assign_request(flow_state: u32, component: u32, value: Value) -> HostMessage {
    HostMessage {
        assign_properties: Some(vec![AssignProperty {
            flow_state,
            component,
            property: 0,
            value,
        }]),
        ..Default::default()
    }
}

fn reply(correlation_id: u64, result: &str) -> HostMessage {
    HostMessage::hardware_result(HardwareResult {
        correlation_id,
        error_message: None,
        result: Some(Value::from(result)),
    })
}

#[test]
fn test_constant_add_output() {
    let mut flow = FlowBuilder::new("main");
    let c = flow.add_entry(constant(5.0));
    let add = flow.add(math_with(MathOp::Add, 3.0));
    let out = flow.add(output(0));
    flow.connect(c, 0, add, 0).connect(add, 0, out, 0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 5);

    assert_eq!(engine.component_state(0, out), Some(&Value::Number(8.0)));
    assert_eq!(activations_of(&engine, out), 1, "output runs exactly once");
    assert!(engine.debugger().history().iter().all(|r| !r.is_error));
}

#[test]
fn test_fan_out_reaches_every_target() {
    let mut flow = FlowBuilder::new("fan-out");
    let c = flow.add_entry(constant(4.0));
    let double = flow.add(math_with(MathOp::Multiply, 2.0));
    let half = flow.add(math_with(MathOp::Divide, 2.0));
    let a = flow.add(output(0));
    let b = flow.add(output(1));
    flow.connect(c, 0, double, 0)
        .connect(c, 0, half, 0)
        .connect(double, 0, a, 0)
        .connect(half, 0, b, 0);

    let mut engine = create_engine(vec![flow.build()]);
    engine.tick();

    assert_eq!(engine.component_state(0, a), Some(&Value::Number(8.0)));
    assert_eq!(engine.component_state(0, b), Some(&Value::Number(2.0)));
}

#[test]
fn test_math_waits_for_both_inputs() {
    let mut flow = FlowBuilder::new("join");
    let x = flow.add_entry(constant(6.0));
    let y = flow.add(constant(7.0));
    let mul = flow.add(math(MathOp::Multiply));
    let out = flow.add(output(0));
    flow.connect(x, 0, mul, 0)
        .connect(y, 0, mul, 1)
        .connect(mul, 0, out, 0);

    let mut engine = create_engine(vec![flow.build()]);
    engine.tick();
    assert_eq!(engine.status(0, mul), Some(ComponentStatus::Idle));
    assert_eq!(engine.input_value(0, mul, 0), Some(&Value::Number(6.0)));

    // feed the second operand from the host
    engine.handle_message(HostMessage::execute_action(flowcore::protocol::ExecuteAction {
        flow_state: 0,
        component: y,
        output: 0,
        value: Value::Number(7.0),
    }));
    engine.tick();
    assert_eq!(engine.component_state(0, out), Some(&Value::Number(42.0)));
}

#[test]
fn test_leaked_async_window_does_not_block_stop() {
    let mut flow = FlowBuilder::new("leak");
    let s = flow.add_entry(start());
    let q = flow.add(scpi("dmm", Expression::literal("READ?"), true));
    flow.connect(s, 0, q, 0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 2);
    assert_eq!(engine.status(0, q), Some(ComponentStatus::WaitingAsync));
    assert_eq!(engine.pending_requests(), 1);

    engine.handle_message(HostMessage::stop());

    assert!(engine.flow_states().is_empty());
    assert_eq!(engine.pending_requests(), 0);
    let messages = engine.drain_messages();
    assert_eq!(messages.last().and_then(|m| m.stopped), Some(true));

    // the reply arrives after stop and is dropped
    engine.handle_message(reply(1, "0.5"));
    assert!(engine.drain_messages().is_empty());
}

#[test]
fn test_out_of_order_hardware_replies() {
    let mut flow = FlowBuilder::new("parallel");
    let s = flow.add_entry(start());
    let first = flow.add(scpi("psu", Expression::literal("MEAS:VOLT?"), true));
    let second = flow.add(scpi("psu", Expression::literal("MEAS:CURR?"), true));
    flow.connect(s, 0, first, 0).connect(s, 0, second, 0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 2);

    let commands = hardware_commands(&engine.drain_messages());
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].correlation_id, 1);
    assert_eq!(commands[0].command, b"MEAS:VOLT?".to_vec());
    assert_eq!(commands[1].correlation_id, 2);
    assert!(commands.iter().all(|c| c.is_query && c.instrument_id == "psu"));

    engine.handle_message(reply(2, "0.25"));
    assert_eq!(engine.status(0, second), Some(ComponentStatus::Finished));
    assert_eq!(engine.status(0, first), Some(ComponentStatus::WaitingAsync));

    engine.handle_message(reply(1, "12.0"));
    assert_eq!(engine.status(0, first), Some(ComponentStatus::Finished));

    assert_eq!(engine.output_value(0, first, 1), Some(&Value::from("12.0")));
    assert_eq!(engine.output_value(0, second, 1), Some(&Value::from("0.25")));
}

#[test]
fn test_duplicate_reply_is_ignored() {
    let mut flow = FlowBuilder::new("single");
    let s = flow.add_entry(start());
    let q = flow.add(scpi("dmm", Expression::literal("READ?"), true));
    flow.connect(s, 0, q, 0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 2);
    engine.drain_messages();

    engine.handle_message(reply(1, "1.0"));
    engine.handle_message(reply(1, "2.0"));

    assert_eq!(engine.output_value(0, q, 1), Some(&Value::from("1.0")));
    let warnings: Vec<_> = component_messages(&engine.drain_messages())
        .into_iter()
        .filter(|m| m.kind == MessageKind::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].id, Some(1));
}

#[test]
fn test_error_in_async_window_spares_siblings() {
    let mut flow = FlowBuilder::new("siblings");
    let s = flow.add_entry(start());
    let q = flow.add(scpi("dmm", Expression::literal("READ?"), true));
    let after = flow.add(log(Expression::literal("measured")));
    let c = flow.add_entry(constant(1.0));
    let inc = flow.add(math_with(MathOp::Add, 1.0));
    let out = flow.add(output(0));
    flow.connect(s, 0, q, 0)
        .connect(q, 0, after, 0)
        .connect(c, 0, inc, 0)
        .connect(inc, 0, out, 0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 2);

    engine.handle_message(HostMessage::hardware_result(HardwareResult {
        correlation_id: 1,
        error_message: Some("instrument unplugged".to_string()),
        result: None,
    }));
    ticks(&mut engine, 3);

    assert_eq!(engine.status(0, q), Some(ComponentStatus::Error));
    assert_eq!(engine.output_value(0, q, 1), None);
    assert_eq!(engine.status(0, after), Some(ComponentStatus::Idle));
    assert_eq!(engine.component_state(0, out), Some(&Value::Number(2.0)));

    let errors: Vec<_> = component_messages(&engine.drain_messages())
        .into_iter()
        .filter(|m| m.kind == MessageKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.to_string().contains("instrument unplugged"));
}

#[test]
fn test_single_step_advances_one_component() {
    let mut flow = FlowBuilder::new("steps");
    let s = flow.add_entry(start());
    let a = flow.add(log(Expression::literal("a")));
    let b = flow.add(log(Expression::literal("b")));
    let c = flow.add(log(Expression::literal("c")));
    flow.connect(s, 0, a, 0).connect(s, 0, b, 0).connect(s, 0, c, 0);

    let mut engine = create_engine(vec![flow.build()]);
    engine.handle_message(HostMessage::debugger(
        DebuggerCommand::AddBreakpoint(Breakpoint {
            flow: 0,
            component: a,
        })
        .encode(),
    ));
    ticks(&mut engine, 2);

    assert_eq!(engine.debugger().state(), DebuggerState::Paused);
    for component in [a, b, c] {
        assert_eq!(engine.status(0, component), Some(ComponentStatus::Ready));
    }

    engine.handle_message(HostMessage::debugger(DebuggerCommand::SingleStep.encode()));

    assert_eq!(engine.status(0, a), Some(ComponentStatus::Finished));
    assert_eq!(engine.status(0, b), Some(ComponentStatus::Ready));
    assert_eq!(engine.status(0, c), Some(ComponentStatus::Ready));
    assert_eq!(engine.debugger().state(), DebuggerState::Paused);

    engine.handle_message(HostMessage::debugger(DebuggerCommand::Resume.encode()));
    engine.tick();
    assert_eq!(engine.status(0, b), Some(ComponentStatus::Finished));
    assert_eq!(engine.status(0, c), Some(ComponentStatus::Finished));
}

#[test]
fn test_sequence_loop_advances_once_per_tick() {
    let mut flow = FlowBuilder::new("loop");
    let s = flow.add_entry(start());
    let inc = flow.add(set_variable(
        "n",
        Expression::binary(BinaryOp::Add, Expression::variable("n"), Expression::literal(1.0)),
    ));
    let check = flow.add(compare(Expression::binary(
        BinaryOp::Lt,
        Expression::variable("n"),
        Expression::literal(3.0),
    )));
    let done = flow.add(log(Expression::variable("n")));
    flow.connect(s, 0, inc, 0)
        .connect(inc, 0, check, 0)
        .connect(check, 0, inc, 0)
        .connect(check, 1, done, 0);
    flow.local("n", 0.0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 2);
    assert_eq!(engine.local(0, "n"), Some(&Value::Number(1.0)));

    ticks(&mut engine, 20);
    assert_eq!(engine.local(0, "n"), Some(&Value::Number(3.0)));
    assert_eq!(engine.status(0, done), Some(ComponentStatus::Finished));

    let logged: Vec<_> = component_messages(&engine.drain_messages())
        .into_iter()
        .filter(|m| m.kind == MessageKind::Info)
        .collect();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].message, Value::from("3"));
}

#[test]
fn test_call_action_passes_inputs_and_outputs() {
    // main: start -> call(flow 1) -> log; constant -> call.x; call.y -> output
    let mut main = FlowBuilder::new("main");
    let s = main.add_entry(start());
    let c = main.add_entry(constant(5.0));
    let call = main.add(call_action(1, &["x"], &["y"]));
    let out = main.add(output(0));
    let after = main.add(log(Expression::literal("called")));
    main.connect(s, 0, call, 0)
        .connect(c, 0, call, 1)
        .connect(call, 1, out, 0)
        .connect(call, 0, after, 0);

    // sub-flow: input(x) + 3 -> output(y)
    let mut sub = FlowBuilder::new("add_three");
    let x = sub.add_entry(input(1));
    let add = sub.add(math_with(MathOp::Add, 3.0));
    let y = sub.add(output(1));
    sub.connect(x, 0, add, 0).connect(add, 0, y, 0);

    let mut engine = create_engine(vec![main.build(), sub.build()]);
    ticks(&mut engine, 2);

    assert_eq!(engine.component_state(0, out), Some(&Value::Number(8.0)));
    assert_eq!(engine.status(0, call), Some(ComponentStatus::Finished));
    assert_eq!(engine.flow_states().len(), 1, "child state is reaped");

    engine.tick();
    assert_eq!(engine.status(0, after), Some(ComponentStatus::Finished));

    let text: String = engine
        .drain_messages()
        .iter()
        .filter_map(|m| m.debugger_event.as_ref())
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .collect();
    assert!(text.contains(&format!("7\t1\t1\t0\t{}\n", call)), "child creation in {:?}", text);
    assert!(text.contains("8\t1\n"));
}

#[test]
fn test_request_times_out() {
    let mut flow = FlowBuilder::new("timeout");
    let s = flow.add_entry(start());
    let q = flow.add(scpi("dmm", Expression::literal("READ?"), true));
    flow.connect(s, 0, q, 0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 2);
    assert_eq!(engine.status(0, q), Some(ComponentStatus::WaitingAsync));

    engine.tick_at(Instant::now() + Duration::from_secs(11));

    assert_eq!(engine.status(0, q), Some(ComponentStatus::Error));
    assert_eq!(engine.pending_requests(), 0);
    let state = engine.flow_states().get(0).unwrap();
    assert!(state.error().unwrap().contains("Timeout"));

    // a reply after the timeout is unknown
    engine.drain_messages();
    engine.handle_message(reply(1, "late"));
    let warnings = component_messages(&engine.drain_messages());
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, MessageKind::Warning);
}

#[test]
fn test_host_reply_in_several_parts() {
    let mut flow = FlowBuilder::new("dialog");
    let s = flow.add_entry(start());
    let ask = flow.add(host_message(Expression::literal("confirm?"), true));
    let done = flow.add(log(Expression::literal("confirmed")));
    flow.connect(s, 0, ask, 0).connect(ask, 0, done, 0);

    let mut engine = create_engine(vec![flow.build()]);
    ticks(&mut engine, 2);

    let sent: Vec<_> = component_messages(&engine.drain_messages())
        .into_iter()
        .filter(|m| m.kind == MessageKind::Host)
        .collect();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].expects_reply);
    let id = sent[0].id.unwrap();

    engine.handle_message(HostMessage::result_to_worker(ResultToWorker {
        message_id: id,
        result: Value::from("part 1"),
        final_result: false,
    }));
    assert_eq!(engine.status(0, ask), Some(ComponentStatus::WaitingAsync));
    assert_eq!(engine.output_value(0, ask, 1), Some(&Value::from("part 1")));
    assert_eq!(engine.pending_requests(), 1);

    engine.handle_message(HostMessage::result_to_worker(ResultToWorker {
        message_id: id,
        result: Value::from("part 2"),
        final_result: true,
    }));
    assert_eq!(engine.status(0, ask), Some(ComponentStatus::Finished));
    assert_eq!(engine.output_value(0, ask, 1), Some(&Value::from("part 2")));

    engine.tick();
    assert_eq!(engine.status(0, done), Some(ComponentStatus::Finished));
}

#[test]
fn test_assign_then_eval_property() {
    let mut flow = FlowBuilder::new("vars");
    flow.add_entry(start());
    let setter = flow.add(set_variable("counter", Expression::literal(1.0)));
    flow.local("counter", 0.0);

    let mut engine = create_engine(vec![flow.build()]);
    engine.handle_message(HostMessage {
        assign_properties: Some(vec![
            AssignProperty {
                flow_state: 0,
                component: setter,
                property: 0,
                value: Value::Number(9.0),
            },
            // literal, not assignable
            AssignProperty {
                flow_state: 0,
                component: setter,
                property: 1,
                value: Value::Number(100.0),
            },
        ]),
        ..Default::default()
    });
    assert_eq!(engine.local(0, "counter"), Some(&Value::Number(9.0)));

    engine.handle_message(HostMessage {
        eval_properties: Some(vec![EvalProperty {
            flow_state: 0,
            component: setter,
            property: 0,
            property_value_index: 0,
        }]),
        ..Default::default()
    });
    let values: Vec<_> = engine
        .drain_messages()
        .into_iter()
        .filter_map(|m| m.property_values)
        .flatten()
        .collect();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value, Value::Number(9.0));
}

#[test]
fn test_division_by_zero_is_a_component_error() {
    let mut flow = FlowBuilder::new("div");
    let c = flow.add_entry(constant(1.0));
    let div = flow.add(math_with(MathOp::Divide, 0.0));
    let out = flow.add(output(0));
    flow.connect(c, 0, div, 0).connect(div, 0, out, 0);

    let mut engine = create_engine(vec![flow.build()]);
    engine.tick();

    assert_eq!(engine.status(0, div), Some(ComponentStatus::Error));
    assert_eq!(engine.status(0, out), Some(ComponentStatus::Idle));
}

#[test]
fn test_single_step_continues_after_called_flow_returns() {
    let mut main = FlowBuilder::new("main");
    let s = main.add_entry(start());
    let call = main.add(call_action(1, &[], &[]));
    let after = main.add(log(Expression::literal("returned")));
    main.connect(s, 0, call, 0).connect(call, 0, after, 0);

    let mut sub = FlowBuilder::new("inner");
    sub.add_entry(log(Expression::literal("inside")));

    let mut engine = create_engine(vec![main.build(), sub.build()]);
    engine.handle_message(HostMessage::debugger(
        DebuggerCommand::AddBreakpoint(Breakpoint {
            flow: 0,
            component: call,
        })
        .encode(),
    ));
    ticks(&mut engine, 3);
    assert_eq!(engine.debugger().state(), DebuggerState::Paused);
    assert_eq!(engine.status(0, call), Some(ComponentStatus::Ready));

    // call, inner log, then the return into `after`
    for _ in 0..3 {
        engine.handle_message(HostMessage::debugger(DebuggerCommand::SingleStep.encode()));
    }

    assert_eq!(engine.status(0, call), Some(ComponentStatus::Finished));
    assert_eq!(engine.status(0, after), Some(ComponentStatus::Finished));
    assert_eq!(engine.flow_states().len(), 1);
    assert_eq!(engine.debugger().state(), DebuggerState::Paused);
}

#[test]
fn test_property_cache_is_dropped_with_its_flow_state() {
    let config = EngineConfig {
        shared_value_threshold: 2,
        ..Default::default()
    };
    let big = Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);

    let mut main = FlowBuilder::new("main");
    let s = main.add_entry(start());
    let call = main.add(call_action(1, &[], &[]));
    let outer = main.add(constant(big.clone()));
    main.connect(s, 0, call, 0);

    let mut sub = FlowBuilder::new("measure");
    let go = sub.add_entry(start());
    let inner = sub.add_entry(constant(big.clone()));
    let q = sub.add(scpi("dmm", Expression::literal("READ?"), true));
    sub.connect(go, 0, q, 0);

    let mut engine = create_engine_with(vec![main.build(), sub.build()], config);
    ticks(&mut engine, 4);
    assert_eq!(engine.flow_states().len(), 2);
    engine.drain_messages();

    engine.handle_message(eval_request(1, inner, 7));
    let values = property_values(engine.drain_messages());
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].handle, Some(1));

    // the called flow finishes and is destroyed with its handle
    engine.handle_message(reply(1, "0.5"));
    ticks(&mut engine, 2);
    assert_eq!(engine.flow_states().len(), 1);
    let released: Vec<_> = engine
        .drain_messages()
        .into_iter()
        .filter_map(|m| m.release_value)
        .flatten()
        .collect();
    assert_eq!(released, vec![1]);

    // an equal value for the same slot needs a fresh handle
    engine.handle_message(eval_request(0, outer, 7));
    let values = property_values(engine.drain_messages());
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value, big);
    assert_eq!(values[0].handle, Some(2));
}

#[test]
fn test_called_flow_sees_caller_locals_but_not_the_reverse() {
    // main: start -> call(1) -> seen = m
    let mut main = FlowBuilder::new("main");
    let s = main.add_entry(start());
    let call = main.add(call_action(1, &[], &[]));
    let peek = main.add(set_variable("seen", Expression::variable("m")));
    main.connect(s, 0, call, 0).connect(call, 0, peek, 0);
    main.local("n", 5.0).local("seen", 0.0);

    // sub-flow: m = n + 1, then n = m * 2 writes back into the caller
    let mut sub = FlowBuilder::new("inner");
    let go = sub.add_entry(start());
    let read = sub.add(set_variable(
        "m",
        Expression::binary(BinaryOp::Add, Expression::variable("n"), Expression::literal(1.0)),
    ));
    let write = sub.add(set_variable(
        "n",
        Expression::binary(BinaryOp::Mul, Expression::variable("m"), Expression::literal(2.0)),
    ));
    sub.connect(go, 0, read, 0).connect(read, 0, write, 0);
    sub.local("m", 0.0);

    let mut engine = create_engine(vec![main.build(), sub.build()]);
    let mut child_saw = None;
    for _ in 0..10 {
        engine.tick();
        if let Some(m) = engine.local(1, "m") {
            child_saw = Some(m.clone());
        }
    }

    assert_eq!(child_saw, Some(Value::Number(6.0)));
    assert_eq!(engine.local(0, "n"), Some(&Value::Number(12.0)));
    assert_eq!(engine.local(0, "m"), None);

    assert_eq!(engine.status(0, call), Some(ComponentStatus::Finished));
    assert_eq!(engine.status(0, peek), Some(ComponentStatus::Error));
    assert_eq!(engine.local(0, "seen"), Some(&Value::Number(0.0)));
    let state = engine.flow_states().get(0).unwrap();
    assert!(state.error().unwrap().contains("unknown variable 'm'"));
}

#[test]
fn test_property_values_assign_back_unchanged() {
    let mut flow = FlowBuilder::new("vars");
    flow.add_entry(start());
    let setter = flow.add(set_variable("v", Expression::literal(0.0)));
    flow.local("v", Value::Null);

    let mut engine = create_engine(vec![flow.build()]);
    engine.drain_messages();

    let samples = vec![
        Value::Null,
        Value::Bool(true),
        Value::Bool(false),
        Value::Number(-0.0),
        Value::Number(0.1 + 0.2),
        Value::Number(f64::MIN_POSITIVE),
        Value::Number(-1e300),
        Value::from("tab\t\"quoted\"\nline"),
        Value::Bytes(vec![0, 255, 10, 13]),
    ];

    for (i, sample) in samples.into_iter().enumerate() {
        let index = i as u32 * 2;
        engine.handle_message(assign_request(0, setter, sample.clone()));
        engine.handle_message(eval_request(0, setter, index));

        // the reported value goes over the wire and is assigned back
        let message = engine
            .drain_messages()
            .into_iter()
            .find(|m| m.property_values.is_some())
            .expect("value reported");
        let decoded = EngineMessage::decode(&message.encode().unwrap()).unwrap();
        let reported = decoded.property_values.unwrap().remove(0).value;

        engine.handle_message(assign_request(0, setter, reported));
        engine.handle_message(eval_request(0, setter, index + 1));
        let values = property_values(engine.drain_messages());
        assert_eq!(values.len(), 1, "sample {}", i);

        match (&values[0].value, &sample) {
            (Value::Number(a), Value::Number(b)) => {
                assert_eq!(a.to_bits(), b.to_bits(), "sample {}", i)
            }
            (a, b) => assert_eq!(a, b, "sample {}", i),
        }
    }
}

#[test]
fn test_call_action_rejects_bad_flow_index() {
    for bad in [-1.0, 1.5, f64::NAN] {
        let mut call = call_action(0, &[], &[]);
        let index = call.property_index("flow").unwrap();
        call.properties[index].expression = Expression::literal(bad);

        let mut flow = FlowBuilder::new("main");
        let s = flow.add_entry(start());
        let c = flow.add(call);
        flow.connect(s, 0, c, 0);

        let mut engine = create_engine(vec![flow.build()]);
        ticks(&mut engine, 2);

        assert_eq!(engine.status(0, c), Some(ComponentStatus::Error), "flow {}", bad);
        assert_eq!(engine.flow_states().len(), 1);
        let state = engine.flow_states().get(0).unwrap();
        assert!(state.error().unwrap().contains("flow index"), "flow {}", bad);
    }
}
