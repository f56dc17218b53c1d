use flowcore::{Component, ComponentIndex, ConnectionLine, Flow, FlowIndex, SlotKind};

/// Read-only view of a compiled flow with precomputed edge lookups
#[derive(Debug, Clone)]
pub struct FlowGraph {
    index: FlowIndex,
    flow: Flow,
    /// component -> output -> connection indexes, in declaration order
    outgoing: Vec<Vec<Vec<usize>>>,
    /// component -> input -> driving connection
    incoming: Vec<Vec<Option<usize>>>,
}

impl FlowGraph {
    /// Indexes must already be bounds-checked (`Assets::check_indexes`).
    pub fn new(index: FlowIndex, flow: Flow) -> Self {
        let mut outgoing: Vec<Vec<Vec<usize>>> = flow
            .components
            .iter()
            .map(|c| vec![Vec::new(); c.outputs.len()])
            .collect();
        let mut incoming: Vec<Vec<Option<usize>>> = flow
            .components
            .iter()
            .map(|c| vec![None; c.inputs.len()])
            .collect();

        for (i, line) in flow.connections.iter().enumerate() {
            outgoing[line.source as usize][line.output as usize].push(i);

            // Fan-in is rejected by the compiler; the first edge wins if one slips through.
            let slot = &mut incoming[line.target as usize][line.input as usize];
            if slot.is_none() {
                *slot = Some(i);
            }
        }

        Self {
            index,
            flow,
            outgoing,
            incoming,
        }
    }

    pub fn index(&self) -> FlowIndex {
        self.index
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn name(&self) -> &str {
        &self.flow.name
    }

    pub fn component_count(&self) -> usize {
        self.flow.components.len()
    }

    pub fn component(&self, index: ComponentIndex) -> Option<&Component> {
        self.flow.components.get(index as usize)
    }

    pub fn connection(&self, index: usize) -> Option<&ConnectionLine> {
        self.flow.connections.get(index)
    }

    /// Connection indexes leaving (component, output)
    pub fn outgoing(&self, component: ComponentIndex, output: usize) -> &[usize] {
        self.outgoing
            .get(component as usize)
            .and_then(|outputs| outputs.get(output))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn incoming(&self, component: ComponentIndex, input: usize) -> Option<&ConnectionLine> {
        self.incoming
            .get(component as usize)
            .and_then(|inputs| inputs.get(input))
            .copied()
            .flatten()
            .and_then(|i| self.flow.connections.get(i))
    }

    pub fn output_kind(&self, component: ComponentIndex, output: usize) -> Option<SlotKind> {
        self.component(component)
            .and_then(|c| c.outputs.get(output))
            .map(|slot| slot.kind)
    }

    pub fn entries(&self) -> &[ComponentIndex] {
        &self.flow.entries
    }
}
