//! Live Super-network
//!
//! The trainable representation the finalizer walks: a [`Model`] of
//! [`Cell`]s, each cell a DAG of [`Node`]s, each node a list of incoming
//! [`Edge`]s. All trainable state lives inside the ops.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::desc::{AuxTowerDesc, CellType, ParamMap};
use super::ops::{Op, Parameter};
use crate::device::{Device, Placement, TransferMode};
use crate::error::{NasError, Result};

/// Model-level metadata carried unchanged into the finalized description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Dataset channels
    pub ds_ch: usize,
    /// Number of output classes
    pub n_classes: usize,
    /// One slot per cell
    pub aux_tower_descs: Vec<Option<AuxTowerDesc>>,
    /// Free-form model parameters
    pub params: ParamMap,
}

impl ModelInfo {
    pub fn new(ds_ch: usize, n_classes: usize) -> Self {
        Self {
            ds_ch,
            n_classes,
            aux_tower_descs: Vec::new(),
            params: ParamMap::new(),
        }
    }

    /// Set aux tower slots
    pub fn with_aux_towers(mut self, aux_tower_descs: Vec<Option<AuxTowerDesc>>) -> Self {
        self.aux_tower_descs = aux_tower_descs;
        self
    }

    /// Set a model parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Cell-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellInfo {
    pub cell_type: CellType,
    pub id: usize,
    /// Id of the cell this one was cloned from
    pub template_cell: Option<usize>,
    /// Upper bound on ranked edges kept per node
    pub max_final_edges: usize,
    /// Output channels of each node
    pub node_ch_out: usize,
}

impl CellInfo {
    pub fn new(cell_type: CellType, id: usize) -> Self {
        Self {
            cell_type,
            id,
            template_cell: None,
            max_final_edges: 2,
            node_ch_out: 16,
        }
    }

    pub fn with_template(mut self, template_cell: usize) -> Self {
        self.template_cell = Some(template_cell);
        self
    }

    pub fn with_max_final_edges(mut self, max_final_edges: usize) -> Self {
        self.max_final_edges = max_final_edges;
        self
    }

    pub fn with_node_ch_out(mut self, node_ch_out: usize) -> Self {
        self.node_ch_out = node_ch_out;
        self
    }
}

/// A connection into a node
#[derive(Debug)]
pub struct Edge {
    op: Box<dyn Op>,
    input_ids: Vec<usize>,
}

impl Edge {
    pub fn new(op: impl Op + 'static, input_ids: Vec<usize>) -> Self {
        Self::boxed(Box::new(op), input_ids)
    }

    pub fn boxed(op: Box<dyn Op>, input_ids: Vec<usize>) -> Self {
        Self { op, input_ids }
    }

    pub fn op(&self) -> &dyn Op {
        self.op.as_ref()
    }

    pub fn op_mut(&mut self) -> &mut dyn Op {
        self.op.as_mut()
    }

    /// Ids of the states this edge reads from
    pub fn input_ids(&self) -> &[usize] {
        &self.input_ids
    }
}

/// A DAG node: the ordered list of its incoming edges
#[derive(Debug, Default)]
pub struct Node {
    edges: Vec<Edge>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an incoming edge
    pub fn add_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut [Edge] {
        &mut self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl From<Vec<Edge>> for Node {
    fn from(edges: Vec<Edge>) -> Self {
        Self { edges }
    }
}

/// A cell of the super-network
#[derive(Debug)]
pub struct Cell {
    info: CellInfo,
    s0_op: Box<dyn Op>,
    s1_op: Box<dyn Op>,
    dag: Vec<Node>,
    post_op: Box<dyn Op>,
}

impl Cell {
    pub fn new(
        info: CellInfo,
        s0_op: impl Op + 'static,
        s1_op: impl Op + 'static,
        post_op: impl Op + 'static,
    ) -> Self {
        Self {
            info,
            s0_op: Box::new(s0_op),
            s1_op: Box::new(s1_op),
            dag: Vec::new(),
            post_op: Box::new(post_op),
        }
    }

    /// Add a node
    pub fn add_node(mut self, node: Node) -> Self {
        self.dag.push(node);
        self
    }

    pub fn info(&self) -> &CellInfo {
        &self.info
    }

    /// Nodes in topological order
    pub fn dag(&self) -> &[Node] {
        &self.dag
    }

    pub fn dag_mut(&mut self) -> &mut [Node] {
        &mut self.dag
    }

    pub fn s0_op(&self) -> &dyn Op {
        self.s0_op.as_ref()
    }

    pub fn s1_op(&self) -> &dyn Op {
        self.s1_op.as_ref()
    }

    pub fn post_op(&self) -> &dyn Op {
        self.post_op.as_ref()
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.s0_op.parameters();
        params.extend(self.s1_op.parameters());
        for node in &self.dag {
            for edge in node.edges() {
                params.extend(edge.op.parameters());
            }
        }
        params.extend(self.post_op.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.s0_op.parameters_mut();
        params.extend(self.s1_op.parameters_mut());
        for node in &mut self.dag {
            for edge in node.edges_mut() {
                params.extend(edge.op.parameters_mut());
            }
        }
        params.extend(self.post_op.parameters_mut());
        params
    }
}

/// A trainable super-network
#[derive(Debug)]
pub struct Model {
    info: ModelInfo,
    stem0_op: Box<dyn Op>,
    stem1_op: Box<dyn Op>,
    cells: Vec<Cell>,
    pool_op: Box<dyn Op>,
    logits_op: Box<dyn Op>,
    placement: Placement,
}

impl Model {
    /// Create a host-resident model with no cells
    pub fn new(
        info: ModelInfo,
        stem0_op: impl Op + 'static,
        stem1_op: impl Op + 'static,
        pool_op: impl Op + 'static,
        logits_op: impl Op + 'static,
    ) -> Self {
        Self {
            info,
            stem0_op: Box::new(stem0_op),
            stem1_op: Box::new(stem1_op),
            cells: Vec::new(),
            pool_op: Box::new(pool_op),
            logits_op: Box::new(logits_op),
            placement: Placement::new(Device::Cpu),
        }
    }

    /// Add a cell
    pub fn add_cell(mut self, cell: Cell) -> Self {
        self.cells.push(cell);
        self
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    pub fn stem0_op(&self) -> &dyn Op {
        self.stem0_op.as_ref()
    }

    pub fn stem1_op(&self) -> &dyn Op {
        self.stem1_op.as_ref()
    }

    pub fn pool_op(&self) -> &dyn Op {
        self.pool_op.as_ref()
    }

    pub fn logits_op(&self) -> &dyn Op {
        self.logits_op.as_ref()
    }

    /// Device the model is resident on right now.
    ///
    /// A non-blocking transfer is not reflected here until [`Model::synchronize`].
    pub fn device(&self) -> Device {
        self.placement.current()
    }

    /// Whether a non-blocking transfer is still in flight
    pub fn has_pending_transfer(&self) -> bool {
        self.placement.pending().is_some()
    }

    /// Move the model to `device`
    pub fn to_device(&mut self, device: Device, mode: TransferMode) {
        if let Some(target) = self.placement.request(device, mode) {
            self.relocate(target);
        }
    }

    /// Blocking move to host memory
    pub fn to_host(&mut self) {
        self.to_device(Device::Cpu, TransferMode::Blocking);
    }

    /// Wait for an in-flight transfer to complete
    pub fn synchronize(&mut self) {
        if let Some(target) = self.placement.synchronize() {
            self.relocate(target);
        }
    }

    /// Verify that every parameter is resident on `expected`
    pub fn ensure_resident(&self, expected: Device) -> Result<()> {
        let current = self.device();
        if current != expected {
            return Err(NasError::DeviceInvariant { expected, actual: current });
        }
        match self.parameters().into_iter().find(|p| p.device() != expected) {
            Some(stray) => Err(NasError::DeviceInvariant {
                expected,
                actual: stray.device(),
            }),
            None => Ok(()),
        }
    }

    /// All trainable parameters, stems first
    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.stem0_op.parameters();
        params.extend(self.stem1_op.parameters());
        for cell in &self.cells {
            params.extend(cell.parameters());
        }
        params.extend(self.pool_op.parameters());
        params.extend(self.logits_op.parameters());
        params
    }

    /// Total number of trainable scalar values
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.value().len()).sum()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.stem0_op.parameters_mut();
        params.extend(self.stem1_op.parameters_mut());
        for cell in &mut self.cells {
            params.extend(cell.parameters_mut());
        }
        params.extend(self.pool_op.parameters_mut());
        params.extend(self.logits_op.parameters_mut());
        params
    }

    fn relocate(&mut self, device: Device) {
        let params = self.parameters_mut();
        debug!(device = %device, parameters = params.len(), "Relocating model parameters");
        for param in params {
            param.to(device);
        }
    }
}
