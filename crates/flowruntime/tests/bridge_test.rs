use flowcore::Value;
use flowruntime::{CorrelationTable, RequestKind, SharedValues};
use std::time::{Duration, Instant};

#[test]
fn test_correlation_ids_are_unique_and_settle_once() {
    let now = Instant::now();
    let mut table = CorrelationTable::new(Duration::from_secs(10));

    let first = table.register(1, RequestKind::Hardware, now);
    let second = table.register(1, RequestKind::HostMessage, now);
    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(table.len(), 2);

    let request = table.take(first).unwrap();
    assert_eq!(request.kind, RequestKind::Hardware);
    assert!(table.take(first).is_none(), "duplicate reply");
    assert!(table.take(99).is_none(), "unknown id");
}

#[test]
fn test_expiry_is_ordered_and_touch_extends_deadline() {
    let start = Instant::now();
    let mut table = CorrelationTable::new(Duration::from_secs(10));

    let a = table.register(10, RequestKind::Connect, start);
    let b = table.register(11, RequestKind::Hardware, start + Duration::from_secs(1));
    let c = table.register(12, RequestKind::HostMessage, start + Duration::from_secs(2));

    // a multi-part reply keeps `c` alive
    assert!(table.touch(c, start + Duration::from_secs(9)).is_some());
    assert!(table.expire(start + Duration::from_secs(5)).is_empty());

    let expired: Vec<_> = table
        .expire(start + Duration::from_secs(12))
        .into_iter()
        .map(|(id, request)| (id, request.activation))
        .collect();
    assert_eq!(expired, vec![(a, 10), (b, 11)]);
    assert_eq!(table.len(), 1);

    table.forget_activation(12);
    assert!(table.is_empty());
}

#[test]
fn test_shared_handles_are_released() {
    let mut shared = SharedValues::new(2);
    let small = Value::Array(vec![Value::Null]);
    let big = Value::Array(vec![Value::Null, Value::Null]);

    assert_eq!(shared.assign(0, 0, &small), None);
    assert_eq!(shared.assign(0, 0, &big), Some(1));
    assert_eq!(shared.assign(1, 1, &big), Some(2));
    assert_eq!(shared.live(), 2);

    // a new value for the slot releases the old handle
    assert_eq!(shared.assign(0, 0, &Value::Number(1.0)), None);
    assert_eq!(shared.take_released(), vec![1]);

    shared.release_flow_state(1);
    assert_eq!(shared.take_released(), vec![2]);
    assert_eq!(shared.live(), 0);

    shared.assign(5, 3, &big);
    shared.release_all();
    assert_eq!(shared.take_released(), vec![3]);
    assert!(shared.take_released().is_empty());
}
