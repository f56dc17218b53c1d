//! Wire schemas exchanged between the engine and its host.
//!
//! Both directions use a struct of optional fields. In practice one field is
//! populated per message. Unknown fields are ignored on decode so older peers
//! keep working when a field is added.

use crate::{ComponentIndex, ProtocolError, Value};
use serde::{Deserialize, Serialize};

pub type FlowStateId = u32;
pub type CorrelationId = u64;
pub type ValueHandle = u64;

/// Host → engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_event: Option<InputEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_globals: Option<Vec<GlobalValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_properties: Option<Vec<AssignProperty>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_properties: Option<Vec<EvalProperty>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_result: Option<HardwareResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debugger_message: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_action: Option<ExecuteAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_to_worker: Option<ResultToWorker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub assets: Vec<u8>,
    #[serde(default)]
    pub global_values: Vec<GlobalValue>,
    #[serde(default)]
    pub display: DisplayGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width: 480,
            height: 272,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalValue {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    #[serde(default)]
    pub pointer: Vec<PointerSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wheel: Option<WheelSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: i32,
    pub y: i32,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelSample {
    pub delta_y: i32,
    pub clicked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignProperty {
    pub flow_state: FlowStateId,
    pub component: ComponentIndex,
    pub property: u32,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalProperty {
    pub flow_state: FlowStateId,
    pub component: ComponentIndex,
    pub property: u32,
    /// Host-chosen slot the result is reported under
    pub property_value_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareResult {
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteAction {
    pub flow_state: FlowStateId,
    pub component: ComponentIndex,
    pub output: u32,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultToWorker {
    pub message_id: CorrelationId,
    #[serde(default)]
    pub result: Value,
    #[serde(default = "default_final")]
    pub final_result: bool,
}

fn default_final() -> bool {
    true
}

/// Engine → host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_update: Option<ScreenUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debugger_event: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_command: Option<HardwareCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_request: Option<ConnectRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_values: Option<Vec<PropertyValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_messages: Option<Vec<ComponentMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_value: Option<Vec<ValueHandle>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub version: u32,
    pub flow_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenUpdate {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareCommand {
    pub correlation_id: CorrelationId,
    pub instrument_id: String,
    pub command: Vec<u8>,
    pub is_query: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub correlation_id: CorrelationId,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyValue {
    pub property_value_index: u32,
    pub value: Value,
    /// Set for large arrays and objects; released with `releaseValue`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ValueHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Info,
    Warning,
    Error,
    Debug,
    /// Component-defined payload for the host; may expect a `resultToWorker` reply
    Host,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_state: Option<FlowStateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentIndex>,
    pub kind: MessageKind,
    pub message: Value,
    #[serde(default)]
    pub expects_reply: bool,
}

impl HostMessage {
    pub fn init(request: InitRequest) -> Self {
        Self {
            init: Some(request),
            ..Default::default()
        }
    }

    pub fn hardware_result(result: HardwareResult) -> Self {
        Self {
            hardware_result: Some(result),
            ..Default::default()
        }
    }

    pub fn debugger(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            debugger_message: Some(bytes.into()),
            ..Default::default()
        }
    }

    pub fn execute_action(action: ExecuteAction) -> Self {
        Self {
            execute_action: Some(action),
            ..Default::default()
        }
    }

    pub fn result_to_worker(result: ResultToWorker) -> Self {
        Self {
            result_to_worker: Some(result),
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            stop: Some(true),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let message: Self = serde_json::from_slice(bytes)?;
        if message.is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(message)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl EngineMessage {
    pub fn init(reply: InitReply) -> Self {
        Self {
            init: Some(reply),
            ..Default::default()
        }
    }

    pub fn screen(update: ScreenUpdate) -> Self {
        Self {
            screen_update: Some(update),
            ..Default::default()
        }
    }

    pub fn debugger(bytes: Vec<u8>) -> Self {
        Self {
            debugger_event: Some(bytes),
            ..Default::default()
        }
    }

    pub fn hardware_command(command: HardwareCommand) -> Self {
        Self {
            hardware_command: Some(command),
            ..Default::default()
        }
    }

    pub fn connect_request(request: ConnectRequest) -> Self {
        Self {
            connect_request: Some(request),
            ..Default::default()
        }
    }

    pub fn property_values(values: Vec<PropertyValue>) -> Self {
        Self {
            property_values: Some(values),
            ..Default::default()
        }
    }

    pub fn component_messages(messages: Vec<ComponentMessage>) -> Self {
        Self {
            component_messages: Some(messages),
            ..Default::default()
        }
    }

    pub fn release(handles: Vec<ValueHandle>) -> Self {
        Self {
            release_value: Some(handles),
            ..Default::default()
        }
    }

    pub fn stopped() -> Self {
        Self {
            stopped: Some(true),
            ..Default::default()
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}
