use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised by one component activation. Local to that activation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid value type for '{field}': expected {expected}, got {actual}")]
    InvalidType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Property \"{0}\" not found")]
    UnknownProperty(String),

    #[error("Output \"{0}\" not found")]
    UnknownOutput(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Fatal problems with a compiled asset blob
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Invalid asset magic")]
    BadMagic,

    #[error("Asset version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Asset blob truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Asset header mismatch: {0}")]
    CountMismatch(String),

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Input {input} of component {component} has more than one driving connection")]
    FanIn { component: u32, input: u32 },

    #[error("Cyclic data dependency in flow {0}")]
    CyclicDependency(u32),

    #[error("Asset payload decode failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Malformed or out-of-schema transport messages. The message is dropped.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Message has no populated field")]
    Empty,

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Unknown flow state: {0}")]
    UnknownFlowState(u32),

    #[error("Unknown component {component} in flow state {flow_state}")]
    UnknownComponent { flow_state: u32, component: u32 },

    #[error("Unknown property {property} on component {component}")]
    UnknownProperty { component: u32, property: u32 },

    #[error("Unknown output {output} on component {component}")]
    UnknownOutput { component: u32, output: u32 },

    #[error("Property {property} on component {component} is not assignable")]
    NotAssignable { component: u32, property: u32 },

    #[error("Malformed debugger message: {0}")]
    Debugger(String),
}
