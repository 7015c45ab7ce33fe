//! Architecture Descriptors
//!
//! Plain, detached descriptions of a finalized architecture. Nothing in here
//! refers back to the live super-network: every tensor is copied into a
//! [`TrainableState`] and every hyperparameter is an owned JSON value.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Hyperparameters attached to an op or a model
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// Snapshot of one named trainable tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainableState {
    /// Parameter name within its op
    pub name: String,
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Row-major values
    pub values: Vec<f64>,
}

impl TrainableState {
    /// Copy a tensor into a detached snapshot
    pub fn capture(name: impl Into<String>, array: &ArrayD<f64>) -> Self {
        Self {
            name: name.into(),
            shape: array.shape().to_vec(),
            values: array.iter().copied().collect(),
        }
    }

    /// Rebuild the tensor from the snapshot
    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), self.values.clone())?)
    }

    /// Number of scalar values
    pub fn numel(&self) -> usize {
        self.values.len()
    }
}

/// Finalized form of a single operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    /// Op name, e.g. `sep_conv_3x3` or `skip_connect`
    pub name: String,
    /// Op hyperparameters
    pub params: ParamMap,
    /// Number of inputs the op consumes
    pub in_len: usize,
    /// Trainable state captured at finalize time
    pub trainables: Vec<TrainableState>,
}

impl OpDesc {
    /// Create a descriptor with a single input and no state
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: ParamMap::new(),
            in_len: 1,
            trainables: Vec::new(),
        }
    }

    /// Set a hyperparameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the number of inputs
    pub fn with_in_len(mut self, in_len: usize) -> Self {
        self.in_len = in_len;
        self
    }

    /// Attach trainable state
    pub fn with_trainables(mut self, trainables: Vec<TrainableState>) -> Self {
        self.trainables = trainables;
        self
    }
}

/// A retained edge: op plus the ids of the states it reads from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDesc {
    pub op_desc: OpDesc,
    pub input_ids: Vec<usize>,
}

impl EdgeDesc {
    pub fn new(op_desc: OpDesc, input_ids: Vec<usize>) -> Self {
        Self { op_desc, input_ids }
    }
}

/// Edges kept for one node, in aggregation order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeDesc {
    pub edges: Vec<EdgeDesc>,
}

impl NodeDesc {
    pub fn new(edges: Vec<EdgeDesc>) -> Self {
        Self { edges }
    }

    /// Number of retained edges
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
}

/// Cell type in the architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    /// Normal cell (preserves dimensions)
    Regular,
    /// Reduction cell (halves spatial dimensions)
    Reduction,
}

/// Finalized cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDesc {
    /// Cell type
    pub cell_type: CellType,
    /// Position of the cell in the model
    pub id: usize,
    /// Finalized nodes
    pub nodes: Vec<NodeDesc>,
    /// Preprocessing op for the cell's first input
    pub s0_op: OpDesc,
    /// Preprocessing op for the cell's second input
    pub s1_op: OpDesc,
    /// Id of the cell this one was cloned from, if any
    pub template_cell: Option<usize>,
    /// Upper bound on ranked edges kept per node
    pub max_final_edges: usize,
    /// Output channels of each node
    pub node_ch_out: usize,
    /// Op applied after node outputs are aggregated
    pub post_op: OpDesc,
}

impl CellDesc {
    /// Total number of retained edges across all nodes
    pub fn num_edges(&self) -> usize {
        self.nodes.iter().map(NodeDesc::num_edges).sum()
    }
}

/// Auxiliary classifier head attached after a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxTowerDesc {
    pub ch_in: usize,
    pub n_classes: usize,
    pub stride: usize,
}

/// Finalized model, ready to hand to an architecture builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDesc {
    pub stem0_op: OpDesc,
    pub stem1_op: OpDesc,
    pub pool_op: OpDesc,
    /// Dataset channels
    pub ds_ch: usize,
    pub n_classes: usize,
    pub cell_descs: Vec<CellDesc>,
    /// One slot per cell; `None` where no aux tower follows the cell
    pub aux_tower_descs: Vec<Option<AuxTowerDesc>>,
    pub logits_op: OpDesc,
    pub params: ParamMap,
}

impl ModelDesc {
    /// Number of cells
    pub fn num_cells(&self) -> usize {
        self.cell_descs.len()
    }

    /// Cells of the given type, in model order
    pub fn cells_of_type(&self, cell_type: CellType) -> impl Iterator<Item = &CellDesc> {
        self.cell_descs.iter().filter(move |c| c.cell_type == cell_type)
    }
}
