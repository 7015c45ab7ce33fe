//! Super-network Finalization
//!
//! Collapses a trained super-network into a [`ModelDesc`]. Each edge's op is
//! asked for its finalized form and a rank; edges without a rank are required
//! and always kept, ranked edges compete for at most `max_final_edges` slots
//! per node.
//!
//! Every step lives on the [`Finalizers`] trait with a default
//! implementation, so a search algorithm can override just the step it
//! needs (say, node selection) and reuse the rest of the traversal.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::desc::{CellDesc, EdgeDesc, ModelDesc, NodeDesc};
use super::model::{Cell, Edge, Model, Node};
use crate::device::{Device, TransferMode};
use crate::error::{NasError, Result};

/// Options for [`Finalizers::finalize_model`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOptions {
    /// Move the model to host memory before finalizing.
    ///
    /// Finalizing copies every op's state; doing that on an accelerator can
    /// exhaust its memory.
    pub to_host: bool,
    /// Queue a non-blocking move back to the original device afterwards
    pub restore_device: bool,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            to_host: true,
            restore_device: true,
        }
    }
}

impl FinalizeOptions {
    pub fn with_to_host(mut self, to_host: bool) -> Self {
        self.to_host = to_host;
        self
    }

    pub fn with_restore_device(mut self, restore_device: bool) -> Self {
        self.restore_device = restore_device;
        self
    }
}

/// Model, cell, node and edge level finalization.
///
/// Op-level behaviour belongs in [`Op::finalize`](crate::nas::Op::finalize);
/// implement this trait to change how ranks are aggregated and thresholded.
pub trait Finalizers {
    /// Finalize the whole model.
    ///
    /// With `to_host` set the model is moved to host memory first. Either
    /// way the model must be fully resident on host before any op is
    /// finalized, otherwise [`NasError::DeviceInvariant`] is returned and
    /// the model is left where it was. With `restore_device` set a
    /// non-blocking transfer back to the original device is queued on the
    /// way out; call [`Model::synchronize`] before relying on it.
    fn finalize_model(&self, model: &mut Model, options: &FinalizeOptions) -> Result<ModelDesc> {
        // settle any earlier non-blocking move so the original device is well defined
        model.synchronize();
        let original = model.device();

        info!(
            cells = model.cells().len(),
            parameters = model.num_parameters(),
            device = %original,
            to_host = options.to_host,
            "Finalizing model"
        );

        if options.to_host {
            model.to_host();
        }
        // op snapshots must never be materialized on an accelerator
        model.ensure_resident(Device::Cpu)?;

        let result = build_model_desc(self, model);

        if options.restore_device {
            model.to_device(original, TransferMode::NonBlocking);
        }

        let desc = result?;
        info!(
            cells = desc.num_cells(),
            edges = desc.cell_descs.iter().map(CellDesc::num_edges).sum::<usize>(),
            "Model finalized"
        );
        Ok(desc)
    }

    /// Finalize every cell, preserving order
    fn finalize_cells(&self, model: &Model) -> Result<Vec<CellDesc>> {
        if model.cells().is_empty() {
            warn!("Model has no cells to finalize");
        }
        model.cells().iter().map(|cell| self.finalize_cell(cell)).collect()
    }

    /// Finalize one cell: its nodes, boundary ops and post op
    fn finalize_cell(&self, cell: &Cell) -> Result<CellDesc> {
        let info = cell.info();
        debug!(cell_id = info.id, cell_type = ?info.cell_type, nodes = cell.dag().len(), "Finalizing cell");

        let nodes = cell
            .dag()
            .iter()
            .map(|node| self.finalize_node(node, info.max_final_edges))
            .collect::<Result<Vec<_>>>()?;

        Ok(CellDesc {
            cell_type: info.cell_type,
            id: info.id,
            nodes,
            s0_op: cell.s0_op().finalize()?.0,
            s1_op: cell.s1_op().finalize()?.0,
            template_cell: info.template_cell,
            max_final_edges: info.max_final_edges,
            node_ch_out: info.node_ch_out,
            post_op: cell.post_op().finalize()?.0,
        })
    }

    /// Keep the required edges followed by the top ranked optional edges
    fn finalize_node(&self, node: &Node, max_final_edges: usize) -> Result<NodeDesc> {
        if node.is_empty() {
            debug!("Node has no incoming edges");
            return Ok(NodeDesc::default());
        }

        let (mut selected, ranked) = self.get_edge_ranks(node)?;

        if selected.len() > max_final_edges {
            warn!(
                required = selected.len(),
                max_final_edges,
                "Required edges alone exceed max_final_edges"
            );
        }

        let optional = ranked.len();
        selected.extend(self.select_edges(ranked, max_final_edges));
        debug!(
            edges = node.len(),
            optional,
            kept = selected.len(),
            "Node finalized"
        );

        Ok(NodeDesc::new(selected))
    }

    /// Pick at most `max_final_edges` ranked edges, highest rank first.
    ///
    /// Equal ranks keep their original relative order. When there are no
    /// more candidates than slots, all are kept in encounter order.
    fn select_edges(&self, mut edge_desc_ranks: Vec<(EdgeDesc, f64)>, max_final_edges: usize) -> Vec<EdgeDesc> {
        if edge_desc_ranks.len() > max_final_edges {
            // stable, so ties stay in encounter order
            edge_desc_ranks.sort_by(|a, b| b.1.total_cmp(&a.1));
            edge_desc_ranks.truncate(max_final_edges);
        }
        edge_desc_ranks.into_iter().map(|(desc, _)| desc).collect()
    }

    /// Finalize every edge once, splitting required edges from ranked ones
    fn get_edge_ranks(&self, node: &Node) -> Result<(Vec<EdgeDesc>, Vec<(EdgeDesc, f64)>)> {
        let mut required = Vec::new();
        let mut ranked = Vec::new();
        for edge in node.edges() {
            match self.finalize_edge(edge)? {
                (desc, None) => required.push(desc),
                (desc, Some(rank)) => ranked.push((desc, rank)),
            }
        }
        Ok((required, ranked))
    }

    /// Finalize an edge's op and attach the edge's inputs
    fn finalize_edge(&self, edge: &Edge) -> Result<(EdgeDesc, Option<f64>)> {
        let (op_desc, rank) = edge.op().finalize()?;
        if let Some(rank) = rank.filter(|r| r.is_nan()) {
            return Err(NasError::InvalidRank {
                op: op_desc.name,
                rank,
            });
        }
        Ok((EdgeDesc::new(op_desc, edge.input_ids().to_vec()), rank))
    }
}

/// The stock finalization strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFinalizers;

impl Finalizers for DefaultFinalizers {}

fn build_model_desc<F: Finalizers + ?Sized>(finalizers: &F, model: &Model) -> Result<ModelDesc> {
    let stem0_op = model.stem0_op().finalize()?.0;
    let stem1_op = model.stem1_op().finalize()?.0;
    let pool_op = model.pool_op().finalize()?.0;
    let logits_op = model.logits_op().finalize()?.0;

    let cell_descs = finalizers.finalize_cells(model)?;

    let info = model.info();
    Ok(ModelDesc {
        stem0_op,
        stem1_op,
        pool_op,
        ds_ch: info.ds_ch,
        n_classes: info.n_classes,
        cell_descs,
        aux_tower_descs: info.aux_tower_descs.clone(),
        logits_op,
        params: info.params.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nas::desc::{CellType, OpDesc};
    use crate::nas::model::{CellInfo, ModelInfo};
    use crate::nas::ops::{FixedOp, Op};

    /// Op with a fixed rank, named after its position
    #[derive(Debug)]
    struct RankedOp {
        name: String,
        rank: Option<f64>,
    }

    impl Op for RankedOp {
        fn name(&self) -> &str {
            &self.name
        }

        fn finalize(&self) -> Result<(OpDesc, Option<f64>)> {
            Ok((OpDesc::new(self.name.clone()), self.rank))
        }
    }

    fn node_with_ranks(ranks: &[Option<f64>]) -> Node {
        ranks
            .iter()
            .enumerate()
            .fold(Node::new(), |node, (i, &rank)| {
                node.add_edge(Edge::new(
                    RankedOp { name: format!("edge{}", i), rank },
                    vec![i],
                ))
            })
    }

    fn names(desc: &NodeDesc) -> Vec<&str> {
        desc.edges.iter().map(|e| e.op_desc.name.as_str()).collect()
    }

    #[test]
    fn test_required_first_then_top_ranked() {
        let node = node_with_ranks(&[None, Some(3.0), Some(1.0), Some(3.0), None]);
        let desc = DefaultFinalizers.finalize_node(&node, 2).unwrap();

        assert_eq!(names(&desc), vec!["edge0", "edge4", "edge1", "edge3"]);
    }

    #[test]
    fn test_ranked_sorted_descending_when_truncated() {
        let node = node_with_ranks(&[Some(0.1), Some(0.7), Some(0.4), Some(0.9)]);
        let desc = DefaultFinalizers.finalize_node(&node, 3).unwrap();

        assert_eq!(names(&desc), vec!["edge3", "edge1", "edge2"]);
    }

    #[test]
    fn test_no_truncation_keeps_encounter_order() {
        let node = node_with_ranks(&[Some(0.1), None, Some(0.9)]);
        let desc = DefaultFinalizers.finalize_node(&node, 2).unwrap();

        assert_eq!(names(&desc), vec!["edge1", "edge0", "edge2"]);
    }

    #[test]
    fn test_ties_are_stable() {
        let node = node_with_ranks(&[Some(0.5), Some(0.5), Some(0.5), Some(0.5)]);
        let desc = DefaultFinalizers.finalize_node(&node, 2).unwrap();

        assert_eq!(names(&desc), vec!["edge0", "edge1"]);
    }

    #[test]
    fn test_required_edges_may_exceed_bound() {
        let node = node_with_ranks(&[None, None, None, Some(1.0)]);
        let desc = DefaultFinalizers.finalize_node(&node, 1).unwrap();

        assert_eq!(names(&desc), vec!["edge0", "edge1", "edge2", "edge3"]);
    }

    #[test]
    fn test_zero_bound_drops_all_ranked() {
        let node = node_with_ranks(&[Some(2.0), None, Some(1.0)]);
        let desc = DefaultFinalizers.finalize_node(&node, 0).unwrap();

        assert_eq!(names(&desc), vec!["edge1"]);
    }

    #[test]
    fn test_infinite_ranks_are_comparable() {
        let node = node_with_ranks(&[Some(1.0), Some(f64::NEG_INFINITY), Some(f64::INFINITY)]);
        let desc = DefaultFinalizers.finalize_node(&node, 2).unwrap();

        assert_eq!(names(&desc), vec!["edge2", "edge0"]);
    }

    #[test]
    fn test_select_edges_orders_nan_consistently() {
        let ranked = vec![
            (EdgeDesc::new(OpDesc::new("edge0"), vec![0]), 0.5),
            (EdgeDesc::new(OpDesc::new("edge1"), vec![1]), f64::NAN),
            (EdgeDesc::new(OpDesc::new("edge2"), vec![2]), 0.9),
            (EdgeDesc::new(OpDesc::new("edge3"), vec![3]), 0.5),
        ];
        let kept = DefaultFinalizers.select_edges(ranked, 3);
        let names: Vec<&str> = kept.iter().map(|e| e.op_desc.name.as_str()).collect();

        // positive NaN sorts above every number; ties still keep encounter order
        assert_eq!(names, vec!["edge1", "edge2", "edge0"]);
    }

    #[test]
    fn test_nan_rank_rejected() {
        let node = node_with_ranks(&[Some(1.0), Some(f64::NAN)]);
        let err = DefaultFinalizers.finalize_node(&node, 1).unwrap_err();

        assert!(matches!(err, NasError::InvalidRank { ref op, .. } if op == "edge1"));
    }

    #[test]
    fn test_finalize_edge_keeps_inputs_and_rank() {
        let edge = Edge::new(RankedOp { name: "dil_conv_5x5".to_string(), rank: Some(0.25) }, vec![0, 3]);
        let (desc, rank) = DefaultFinalizers.finalize_edge(&edge).unwrap();

        assert_eq!(desc.input_ids, vec![0, 3]);
        assert_eq!(desc.op_desc.name, "dil_conv_5x5");
        assert_eq!(rank, Some(0.25));
    }

    #[test]
    fn test_empty_node() {
        let desc = DefaultFinalizers.finalize_node(&Node::new(), 2).unwrap();
        assert!(desc.edges.is_empty());
    }

    #[test]
    fn test_finalize_cell_copies_metadata() {
        let cell = Cell::new(
            CellInfo::new(CellType::Reduction, 4)
                .with_template(2)
                .with_max_final_edges(1)
                .with_node_ch_out(24),
            FixedOp::new("factorized_reduce"),
            FixedOp::new("relu_conv_bn"),
            FixedOp::new("concate_channels"),
        )
        .add_node(node_with_ranks(&[Some(0.2), Some(0.8)]))
        .add_node(node_with_ranks(&[None, Some(0.3), Some(0.6)]));

        let desc = DefaultFinalizers.finalize_cell(&cell).unwrap();

        assert_eq!(desc.cell_type, CellType::Reduction);
        assert_eq!(desc.id, 4);
        assert_eq!(desc.template_cell, Some(2));
        assert_eq!(desc.max_final_edges, 1);
        assert_eq!(desc.node_ch_out, 24);
        assert_eq!(desc.s0_op.name, "factorized_reduce");
        assert_eq!(desc.s1_op.name, "relu_conv_bn");
        assert_eq!(desc.post_op.name, "concate_channels");
        assert_eq!(names(&desc.nodes[0]), vec!["edge1"]);
        assert_eq!(names(&desc.nodes[1]), vec!["edge0", "edge2"]);
    }

    /// Keeps only the single weakest ranked edge, to exercise overriding
    struct WeakestEdge;

    impl Finalizers for WeakestEdge {
        fn select_edges(&self, mut edge_desc_ranks: Vec<(EdgeDesc, f64)>, _max_final_edges: usize) -> Vec<EdgeDesc> {
            edge_desc_ranks.sort_by(|a, b| a.1.total_cmp(&b.1));
            edge_desc_ranks.into_iter().take(1).map(|(desc, _)| desc).collect()
        }
    }

    #[test]
    fn test_overridden_step_used_by_traversal() {
        let model = Model::new(
            ModelInfo::new(3, 10),
            FixedOp::new("stem"),
            FixedOp::new("stem"),
            FixedOp::new("pool"),
            FixedOp::new("linear"),
        )
        .add_cell(
            Cell::new(
                CellInfo::new(CellType::Regular, 0),
                FixedOp::skip(),
                FixedOp::skip(),
                FixedOp::new("concate_channels"),
            )
            .add_node(node_with_ranks(&[Some(0.9), None, Some(0.1)])),
        );

        let cells = WeakestEdge.finalize_cells(&model).unwrap();
        assert_eq!(names(&cells[0].nodes[0]), vec!["edge1", "edge2"]);
    }

    #[test]
    fn test_options_default() {
        let options = FinalizeOptions::default();
        assert!(options.to_host);
        assert!(options.restore_device);

        let options = options.with_to_host(false).with_restore_device(false);
        assert_eq!(options, FinalizeOptions { to_host: false, restore_device: false });
    }
}
