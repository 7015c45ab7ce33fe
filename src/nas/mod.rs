//! Neural Architecture Search (NAS) Module
//!
//! Finalization of trained super-networks:
//! - Live super-network representation (model, cells, nodes, edges)
//! - Operation trait and a small op library, including DARTS mixed ops
//! - Detached architecture descriptors
//! - Edge ranking and top-k selection per node

mod darts;
mod desc;
mod finalizers;
mod model;
mod ops;

pub use darts::MixedOp;
pub use desc::{
    AuxTowerDesc, CellDesc, CellType, EdgeDesc, ModelDesc, NodeDesc, OpDesc, ParamMap,
    TrainableState,
};
pub use finalizers::{DefaultFinalizers, FinalizeOptions, Finalizers};
pub use model::{Cell, CellInfo, Edge, Model, ModelInfo, Node};
pub use ops::{FixedOp, Op, Parameter};
