//! Compiled asset blob: a fixed binary header followed by the flow payload.
//!
//! Header layout (little endian):
//!
//! | offset | size | field              |
//! |--------|------|--------------------|
//! | 0      | 4    | magic `EFLW`       |
//! | 4      | 4    | version            |
//! | 8      | 4    | flow count         |
//! | 12     | 4    | component count    |
//! | 16     | 4    | connection count   |
//! | 20     | 4    | payload length     |

use crate::{
    AssetError, ComponentIndex, ConnectionLine, Flow, FlowIndex, SlotKind, Variable,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const ASSET_MAGIC: [u8; 4] = *b"EFLW";
pub const ASSET_VERSION: u32 = 3;
pub const HEADER_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetHeader {
    pub version: u32,
    pub flow_count: u32,
    pub component_count: u32,
    pub connection_count: u32,
    pub payload_len: u32,
}

impl AssetHeader {
    /// Parse and check the header. The payload itself is not touched.
    pub fn parse(bytes: &[u8]) -> Result<Self, AssetError> {
        if bytes.len() < HEADER_LEN {
            return Err(AssetError::Truncated {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[0..4] != ASSET_MAGIC {
            return Err(AssetError::BadMagic);
        }

        let word = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };

        let header = Self {
            version: word(4),
            flow_count: word(8),
            component_count: word(12),
            connection_count: word(16),
            payload_len: word(20),
        };

        if header.version != ASSET_VERSION {
            return Err(AssetError::VersionMismatch {
                expected: ASSET_VERSION,
                found: header.version,
            });
        }

        let needed = HEADER_LEN + header.payload_len as usize;
        if bytes.len() < needed {
            return Err(AssetError::Truncated {
                needed,
                actual: bytes.len(),
            });
        }

        Ok(header)
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ASSET_MAGIC);
        for word in [
            self.version,
            self.flow_count,
            self.component_count,
            self.connection_count,
            self.payload_len,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

/// Everything the engine needs to run a program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assets {
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub globals: Vec<Variable>,
    #[serde(default)]
    pub start_flows: Vec<FlowIndex>,
}

impl Assets {
    pub fn component_count(&self) -> usize {
        self.flows.iter().map(|f| f.components.len()).sum()
    }

    pub fn connection_count(&self) -> usize {
        self.flows.iter().map(|f| f.connections.len()).sum()
    }

    pub fn flow(&self, index: FlowIndex) -> Option<&Flow> {
        self.flows.get(index as usize)
    }

    /// Encode into a blob with header
    pub fn to_bytes(&self) -> Result<Vec<u8>, AssetError> {
        let payload = serde_json::to_vec(self)?;
        let header = AssetHeader {
            version: ASSET_VERSION,
            flow_count: self.flows.len() as u32,
            component_count: self.component_count() as u32,
            connection_count: self.connection_count() as u32,
            payload_len: payload.len() as u32,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        header.write(&mut out);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a blob, checking the header against the payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssetError> {
        let header = AssetHeader::parse(bytes)?;
        let payload = &bytes[HEADER_LEN..HEADER_LEN + header.payload_len as usize];
        let assets: Assets = serde_json::from_slice(payload)?;

        if assets.flows.len() != header.flow_count as usize {
            return Err(AssetError::CountMismatch(format!(
                "header declares {} flows, payload has {}",
                header.flow_count,
                assets.flows.len()
            )));
        }
        if assets.component_count() != header.component_count as usize {
            return Err(AssetError::CountMismatch(format!(
                "header declares {} components, payload has {}",
                header.component_count,
                assets.component_count()
            )));
        }
        if assets.connection_count() != header.connection_count as usize {
            return Err(AssetError::CountMismatch(format!(
                "header declares {} connections, payload has {}",
                header.connection_count,
                assets.connection_count()
            )));
        }

        assets.check_indexes()?;
        tracing::debug!(
            "Decoded assets v{}: {} flows, {} components, {} connections",
            header.version,
            header.flow_count,
            header.component_count,
            header.connection_count
        );
        Ok(assets)
    }

    /// Bounds checks on every index stored in the payload.
    pub fn check_indexes(&self) -> Result<(), AssetError> {
        for start in &self.start_flows {
            if *start as usize >= self.flows.len() {
                return Err(AssetError::InvalidIndex(format!("start flow {}", start)));
            }
        }

        for (flow_index, flow) in self.flows.iter().enumerate() {
            for entry in &flow.entries {
                if *entry as usize >= flow.components.len() {
                    return Err(AssetError::InvalidIndex(format!(
                        "flow {} entry component {}",
                        flow_index, entry
                    )));
                }
            }

            for line in &flow.connections {
                let source = flow.component(line.source).ok_or_else(|| {
                    AssetError::InvalidIndex(format!(
                        "flow {} connection source {}",
                        flow_index, line.source
                    ))
                })?;
                let target = flow.component(line.target).ok_or_else(|| {
                    AssetError::InvalidIndex(format!(
                        "flow {} connection target {}",
                        flow_index, line.target
                    ))
                })?;
                if line.output as usize >= source.outputs.len() {
                    return Err(AssetError::InvalidIndex(format!(
                        "flow {} component {} output {}",
                        flow_index, line.source, line.output
                    )));
                }
                if line.input as usize >= target.inputs.len() {
                    return Err(AssetError::InvalidIndex(format!(
                        "flow {} component {} input {}",
                        flow_index, line.target, line.input
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Builds one flow. Stands in for the visual compiler in tools and tests.
#[derive(Debug, Clone)]
pub struct FlowBuilder {
    flow: Flow,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            flow: Flow::new(name),
        }
    }

    pub fn add(&mut self, component: crate::Component) -> ComponentIndex {
        self.flow.components.push(component);
        (self.flow.components.len() - 1) as ComponentIndex
    }

    /// Add a component and mark it as a flow entry
    pub fn add_entry(&mut self, component: crate::Component) -> ComponentIndex {
        let index = self.add(component);
        self.flow.entries.push(index);
        index
    }

    pub fn connect(
        &mut self,
        source: ComponentIndex,
        output: u32,
        target: ComponentIndex,
        input: u32,
    ) -> &mut Self {
        self.flow.connections.push(ConnectionLine {
            source,
            output,
            target,
            input,
        });
        self
    }

    pub fn local(&mut self, name: impl Into<String>, default: impl Into<crate::Value>) -> &mut Self {
        self.flow.locals.push(Variable {
            name: name.into(),
            default: default.into(),
        });
        self
    }

    pub fn group(&mut self, name: impl Into<String>, components: Vec<ComponentIndex>) -> &mut Self {
        self.flow.groups.push(crate::ComponentGroup {
            name: name.into(),
            components,
            description: None,
        });
        self
    }

    pub fn build(self) -> Flow {
        self.flow
    }
}

/// Collects flows and globals and runs the checks the engine relies on
#[derive(Debug, Clone, Default)]
pub struct AssetBuilder {
    flows: Vec<Flow>,
    globals: Vec<Variable>,
    start_flows: Vec<FlowIndex>,
}

impl AssetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_flow(&mut self, flow: Flow) -> FlowIndex {
        self.flows.push(flow);
        (self.flows.len() - 1) as FlowIndex
    }

    /// Add a flow that is instantiated at program start
    pub fn add_start_flow(&mut self, flow: Flow) -> FlowIndex {
        let index = self.add_flow(flow);
        self.start_flows.push(index);
        index
    }

    pub fn global(&mut self, name: impl Into<String>, default: impl Into<crate::Value>) -> &mut Self {
        self.globals.push(Variable {
            name: name.into(),
            default: default.into(),
        });
        self
    }

    pub fn build(self) -> Result<Assets, AssetError> {
        let assets = Assets {
            flows: self.flows,
            globals: self.globals,
            start_flows: self.start_flows,
        };

        assets.check_indexes()?;
        for (index, flow) in assets.flows.iter().enumerate() {
            check_fan_in(flow)?;
            check_data_cycles(index as FlowIndex, flow)?;
        }

        Ok(assets)
    }
}

/// A data input may be driven by at most one connection. Sequence inputs
/// may join several control paths.
fn check_fan_in(flow: &Flow) -> Result<(), AssetError> {
    let mut driven = HashSet::new();
    for line in &flow.connections {
        let target = &flow.components[line.target as usize];
        if target.inputs[line.input as usize].kind == SlotKind::Sequence {
            continue;
        }
        if !driven.insert((line.target, line.input)) {
            return Err(AssetError::FanIn {
                component: line.target,
                input: line.input,
            });
        }
    }
    Ok(())
}

/// Pure data edges must form a DAG. Sequence edges may close loops.
fn check_data_cycles(flow_index: FlowIndex, flow: &Flow) -> Result<(), AssetError> {
    let mut graph = DiGraph::<ComponentIndex, ()>::new();
    let nodes: Vec<_> = (0..flow.components.len())
        .map(|i| graph.add_node(i as ComponentIndex))
        .collect();

    for line in &flow.connections {
        let source = &flow.components[line.source as usize];
        if source.outputs[line.output as usize].kind == SlotKind::Data {
            graph.add_edge(nodes[line.source as usize], nodes[line.target as usize], ());
        }
    }

    if toposort(&graph, None).is_err() {
        return Err(AssetError::CyclicDependency(flow_index));
    }

    Ok(())
}
