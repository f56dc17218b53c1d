mod common;

use common::*;
use flowcore::{EngineMessage, FlowBuilder, HostMessage};
use flowruntime::{EngineConfig, FlowRuntime, RuntimeHandle};
use std::time::Duration;

async fn next_matching(
    handle: &mut RuntimeHandle,
    predicate: impl Fn(&EngineMessage) -> bool,
) -> EngineMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = handle.recv().await.expect("worker alive");
            if predicate(&message) {
                return message;
            }
        }
    })
    .await
    .expect("message within timeout")
}

#[tokio::test]
async fn test_worker_initializes_and_stops() {
    init_tracing();
    let (registry, cancelled) = registry();
    let mut handle = FlowRuntime::spawn(registry, EngineConfig::default());

    let mut flow = FlowBuilder::new("waiting");
    let t = flow.add_entry(trigger());
    let w = flow.add(wait());
    flow.connect(t, 0, w, 0);
    handle.send(init_message(flow.build())).unwrap();

    let reply = next_matching(&mut handle, |m| m.init.is_some()).await;
    assert!(reply.init.unwrap().ok);

    // let the interval tick bring `wait` into its async window
    tokio::time::sleep(Duration::from_millis(100)).await;

    let remaining = handle.shutdown().await;
    assert_eq!(remaining.last().and_then(|m| m.stopped), Some(true));
    assert_eq!(cancelled.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_message_ends_worker() {
    let (registry, _) = registry();
    let mut handle = FlowRuntime::spawn(registry, EngineConfig::default());

    let mut flow = FlowBuilder::new("main");
    let a = flow.add_entry(source(1.0));
    let b = flow.add(store());
    flow.connect(a, 0, b, 0);
    handle.send(init_message(flow.build())).unwrap();
    handle.send(HostMessage::stop()).unwrap();

    next_matching(&mut handle, |m| m.stopped == Some(true)).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker exits after stop");
    assert!(handle.send(HostMessage::stop()).is_err());
}
