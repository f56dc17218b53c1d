use flowcore::protocol::{
    ExecuteAction, HardwareCommand, HardwareResult, InitRequest, PropertyValue, ResultToWorker,
};
use flowcore::{EngineMessage, HostMessage, ProtocolError, Value};

#[test]
fn test_host_message_uses_camel_case_and_omits_absent_fields() {
    let message = HostMessage::hardware_result(HardwareResult {
        correlation_id: 7,
        error_message: None,
        result: Some(Value::from("1.25")),
    });

    let json: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
    let object = json.as_object().unwrap();

    assert_eq!(object.len(), 1, "only the populated field is written");
    assert_eq!(json["hardwareResult"]["correlationId"], 7);
    assert!(json["hardwareResult"].get("errorMessage").is_none());
}

#[test]
fn test_unknown_fields_are_ignored() {
    let bytes = br#"{"stop": true, "someFutureField": {"x": 1}}"#;
    let message = HostMessage::decode(bytes).unwrap();

    assert_eq!(message.stop, Some(true));
}

#[test]
fn test_empty_message_is_a_protocol_error() {
    assert!(matches!(HostMessage::decode(b"{}"), Err(ProtocolError::Empty)));
    assert!(matches!(
        HostMessage::decode(b"not json"),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn test_result_to_worker_defaults_to_final() {
    let bytes = br#"{"resultToWorker": {"messageId": 3, "result": {"type": "Number", "value": 1.0}}}"#;
    let message = HostMessage::decode(bytes).unwrap();

    assert_eq!(
        message.result_to_worker,
        Some(ResultToWorker {
            message_id: 3,
            result: Value::Number(1.0),
            final_result: true,
        })
    );
}

#[test]
fn test_init_request_defaults_display_geometry() {
    let message = HostMessage::init(InitRequest {
        assets: vec![1, 2, 3],
        global_values: vec![],
        display: Default::default(),
    });
    let decoded = HostMessage::decode(&message.encode().unwrap()).unwrap();

    let init = decoded.init.unwrap();
    assert_eq!(init.display.width, 480);
    assert_eq!(init.display.height, 272);
}

#[test]
fn test_values_survive_the_wire_exactly() {
    let values = vec![
        Value::Null,
        Value::Bool(true),
        Value::Number(0.1 + 0.2),
        Value::Number(-1.0e-300),
        Value::String("tab\tand\nnewline".to_string()),
        Value::Bytes(vec![0, 255, 10]),
    ];

    for value in values {
        let message = HostMessage::execute_action(ExecuteAction {
            flow_state: 0,
            component: 0,
            output: 0,
            value: value.clone(),
        });
        let decoded = HostMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.execute_action.unwrap().value, value);
    }
}

#[test]
fn test_engine_message_roundtrip() {
    let message = EngineMessage::hardware_command(HardwareCommand {
        correlation_id: 1,
        instrument_id: "psu".to_string(),
        command: b"MEAS:VOLT?".to_vec(),
        is_query: true,
    });
    let decoded = EngineMessage::decode(&message.encode().unwrap()).unwrap();
    assert_eq!(decoded, message);

    let values = EngineMessage::property_values(vec![PropertyValue {
        property_value_index: 4,
        value: Value::Bool(false),
        handle: None,
    }]);
    let json: serde_json::Value = serde_json::from_slice(&values.encode().unwrap()).unwrap();
    assert_eq!(json["propertyValues"][0]["propertyValueIndex"], 4);
}
