//! Kolosal NAS - super-network finalization
//!
//! This crate turns a trained neural architecture search super-network into
//! a single concrete architecture description:
//! - Every edge's operation finalizes itself and reports a rank
//! - Edges without a rank are required and always kept
//! - Ranked edges compete for at most `max_final_edges` slots per node
//! - The result is a detached [`nas::ModelDesc`] value tree
//!
//! # Modules
//!
//! - [`nas`] - Super-network, op library, descriptors and finalizers
//! - [`device`] - Device placement and blocking/non-blocking transfers
//! - [`error`] - Error types
//!
//! # Example
//! ```
//! use kolosal_nas::prelude::*;
//! use ndarray::array;
//!
//! let edge = |alphas| -> Result<Edge> {
//!     let candidates: Vec<Box<dyn Op>> = vec![
//!         Box::new(FixedOp::new("sep_conv_3x3")),
//!         Box::new(FixedOp::skip()),
//!         Box::new(FixedOp::none()),
//!     ];
//!     Ok(Edge::new(MixedOp::with_alphas(candidates, alphas)?, vec![0]))
//! };
//!
//! let cell = Cell::new(
//!     CellInfo::new(CellType::Regular, 0).with_max_final_edges(1),
//!     FixedOp::new("relu_conv_bn"),
//!     FixedOp::new("relu_conv_bn"),
//!     FixedOp::new("concate_channels"),
//! )
//! .add_node(Node::new().add_edge(edge(array![2.0, 0.0, 0.0])?).add_edge(edge(array![0.0, 1.0, 0.0])?));
//!
//! let mut model = Model::new(
//!     ModelInfo::new(3, 10),
//!     FixedOp::new("stem_conv3x3"),
//!     FixedOp::new("stem_conv3x3"),
//!     FixedOp::new("pool_adaptive_avg2d"),
//!     FixedOp::new("linear"),
//! )
//! .add_cell(cell);
//!
//! let desc = DefaultFinalizers.finalize_model(&mut model, &FinalizeOptions::default())?;
//! assert_eq!(desc.cell_descs[0].nodes[0].edges[0].op_desc.name, "sep_conv_3x3");
//! # Ok::<(), kolosal_nas::NasError>(())
//! ```

// Core error handling
pub mod error;

// Device placement
pub mod device;

// Neural architecture search
pub mod nas;

pub use error::{NasError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{NasError, Result};

    // Device placement
    pub use crate::device::{Device, TransferMode};

    // Super-network and finalization
    pub use crate::nas::{
        Cell, CellDesc, CellInfo, CellType, DefaultFinalizers, Edge, EdgeDesc, FinalizeOptions,
        Finalizers, FixedOp, MixedOp, Model, ModelDesc, ModelInfo, Node, NodeDesc, Op, OpDesc,
    };
}
