use crate::{Expression, Value};
use serde::{Deserialize, Serialize};

pub type FlowIndex = u32;
pub type ComponentIndex = u32;
pub type ComponentTypeId = u16;

/// Whether a slot carries control flow ("run next") or data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotKind {
    Sequence,
    Data,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    pub kind: SlotKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSlot {
    pub name: String,
    pub kind: SlotKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub expression: Expression,
}

/// Compiled component record. Immutable once compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub type_id: ComponentTypeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputSlot>,
    #[serde(default)]
    pub outputs: Vec<OutputSlot>,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Component {
    pub fn new(type_id: ComponentTypeId) -> Self {
        Self {
            type_id,
            name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_seq_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(InputSlot {
            name: name.into(),
            kind: SlotKind::Sequence,
            required: false,
        });
        self
    }

    pub fn with_data_input(mut self, name: impl Into<String>, required: bool) -> Self {
        self.inputs.push(InputSlot {
            name: name.into(),
            kind: SlotKind::Data,
            required,
        });
        self
    }

    pub fn with_seq_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputSlot {
            name: name.into(),
            kind: SlotKind::Sequence,
        });
        self
    }

    pub fn with_data_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputSlot {
            name: name.into(),
            kind: SlotKind::Data,
        });
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.properties.push(Property {
            name: name.into(),
            expression,
        });
        self
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|slot| slot.name == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|slot| slot.name == name)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Action components are triggered by sequence input arrival.
    pub fn is_action(&self) -> bool {
        self.inputs.iter().any(|slot| slot.kind == SlotKind::Sequence)
    }

    /// First sequence output, used by `propagate_value_through_seqout`.
    pub fn seqout_index(&self) -> Option<usize> {
        self.outputs
            .iter()
            .position(|slot| slot.kind == SlotKind::Sequence)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("type#{}", self.type_id))
    }
}

/// Directed edge from (source, output) to (target, input)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLine {
    pub source: ComponentIndex,
    pub output: u32,
    pub target: ComponentIndex,
    pub input: u32,
}

/// Descriptive grouping used by the editor. Never executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentGroup {
    pub name: String,
    pub components: Vec<ComponentIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub default: Value,
}

/// Static graph of components and connection lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub components: Vec<Component>,
    #[serde(default)]
    pub connections: Vec<ConnectionLine>,
    #[serde(default)]
    pub entries: Vec<ComponentIndex>,
    #[serde(default)]
    pub groups: Vec<ComponentGroup>,
    #[serde(default)]
    pub locals: Vec<Variable>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            connections: Vec::new(),
            entries: Vec::new(),
            groups: Vec::new(),
            locals: Vec::new(),
        }
    }

    pub fn component(&self, index: ComponentIndex) -> Option<&Component> {
        self.components.get(index as usize)
    }

    pub fn output_count(&self) -> usize {
        self.components.iter().map(|c| c.outputs.len()).sum()
    }
}
