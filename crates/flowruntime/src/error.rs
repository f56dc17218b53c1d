use flowcore::{AssetError, ComponentError, ComponentIndex, ComponentTypeId, FlowIndex};
use thiserror::Error;

/// Fatal engine errors. Reported to the host as an init failure.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Unknown component type {type_id} (flow {flow}, component {component})")]
    UnknownComponentType {
        type_id: ComponentTypeId,
        flow: FlowIndex,
        component: ComponentIndex,
    },

    #[error("Failed to create component {component} in flow {flow}: {source}")]
    ComponentCreation {
        flow: FlowIndex,
        component: ComponentIndex,
        #[source]
        source: ComponentError,
    },

    #[error("Duplicate component type id {0}")]
    DuplicateComponentType(ComponentTypeId),

    #[error("Engine already initialized")]
    AlreadyInitialized,

    #[error("Engine is stopped")]
    Stopped,
}
