//! The abstraction over the preprocessed network.
//!
//! Every hidden block beyond the first collapses its role classes: each
//! class starts as a single abstract neuron standing in for all of its
//! concrete copies, and refinement splits concrete neurons back out one at
//! a time. Abstract weights are extracted per partition group: sum over
//! merged source neurons of the per-source extremum over merged target
//! neurons, the extremum rounding up (Max) into INC targets and down (Min)
//! into DEC targets so the abstract output dominates the concrete one along
//! every role's monotonicity. Biases take the same extremum.

use crate::preprocess::{layer_at, layer_at_mut, validate_canonical};
use crate::roles::{weight_op, Monotonicity, Role, WeightOp};
use rho_core::{Result, RhoError};
use rho_nlr::{LayerKind, NetworkLevelReasoner};
use tracing::debug;

/// One abstract neuron: a role class and the preprocessed-layer neuron
/// indices currently merged into it.
#[derive(Debug, Clone)]
pub struct Group {
    role: Role,
    members: Vec<usize>,
}

impl Group {
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn members(&self) -> &[usize] {
        &self.members
    }
}

/// One abstracted hidden block: the preprocessed weighted-sum layer index
/// (its ReLU partner is the next layer) and the current partition. The
/// ReLU layer shares the partition, neuron for neuron.
#[derive(Debug, Clone)]
pub struct Block {
    ws_layer: usize,
    groups: Vec<Group>,
}

impl Block {
    #[inline]
    pub fn ws_layer(&self) -> usize {
        self.ws_layer
    }

    #[inline]
    pub fn relu_layer(&self) -> usize {
        self.ws_layer + 1
    }

    #[inline]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }
}

fn extremum(op: WeightOp, values: impl Iterator<Item = f64>) -> f64 {
    match op {
        WeightOp::Max => values.fold(f64::NEG_INFINITY, f64::max),
        WeightOp::Min => values.fold(f64::INFINITY, f64::min),
        WeightOp::Zero => 0.0,
    }
}

fn bias_op(monotonicity: Monotonicity) -> WeightOp {
    match monotonicity {
        Monotonicity::Inc => WeightOp::Max,
        Monotonicity::Dec => WeightOp::Min,
    }
}

/// The abstraction state: the preprocessed network plus the per-block
/// partitions it is currently collapsed under.
#[derive(Debug, Clone)]
pub struct Abstraction {
    preprocessed: NetworkLevelReasoner,
    blocks: Vec<Block>,
}

impl Abstraction {
    /// Initial abstraction: every block beyond the first hidden one
    /// collapses to one neuron per role class.
    pub fn new(preprocessed: NetworkLevelReasoner) -> Result<Self> {
        validate_canonical(&preprocessed)?;
        let n = preprocessed.num_layers();
        let mut blocks = Vec::new();
        // Intermediate weighted-sum layers sit at odd indices; the first
        // hidden block (layers 1 and 2) is never abstracted.
        let mut ws_layer = 3;
        while ws_layer + 2 < n {
            let size = layer_at(&preprocessed, ws_layer)?.size();
            let groups = Role::ALL
                .iter()
                .map(|&role| Group {
                    role,
                    members: (0..size)
                        .filter(|i| i % 4 == role.copy_offset())
                        .collect(),
                })
                .filter(|g| !g.members.is_empty())
                .collect();
            blocks.push(Block { ws_layer, groups });
            ws_layer += 2;
        }
        debug!(blocks = blocks.len(), "created initial abstraction");
        Ok(Self {
            preprocessed,
            blocks,
        })
    }

    #[inline]
    pub fn preprocessed(&self) -> &NetworkLevelReasoner {
        &self.preprocessed
    }

    pub fn preprocessed_mut(&mut self) -> &mut NetworkLevelReasoner {
        &mut self.preprocessed
    }

    #[inline]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// True once every group is a singleton; the abstract network then
    /// equals the preprocessed one and the engine's verdict is final.
    pub fn is_fully_refined(&self) -> bool {
        self.blocks
            .iter()
            .all(|b| b.groups.iter().all(|g| g.members.len() == 1))
    }

    /// Split `member` out of the given group into its own abstract neuron.
    /// The singleton is inserted before the remainder, keeping group order
    /// deterministic.
    pub fn refine(&mut self, block: usize, group: usize, member: usize) -> Result<()> {
        let block_state = self.blocks.get_mut(block).ok_or_else(|| {
            RhoError::Configuration(format!("no abstracted block {}", block))
        })?;
        let group_state = block_state.groups.get_mut(group).ok_or_else(|| {
            RhoError::Configuration(format!("no group {} in block {}", group, block))
        })?;
        if group_state.members.len() < 2 {
            return Err(RhoError::Configuration(format!(
                "group {} of block {} cannot be split further",
                group, block
            )));
        }
        let position = group_state
            .members
            .iter()
            .position(|&m| m == member)
            .ok_or_else(|| {
                RhoError::Configuration(format!(
                    "neuron {} is not merged into group {} of block {}",
                    member, group, block
                ))
            })?;
        group_state.members.remove(position);
        let role = group_state.role;
        block_state.groups.insert(
            group,
            Group {
                role,
                members: vec![member],
            },
        );
        debug!(block, group, member, "refined abstraction");
        Ok(())
    }

    /// Materialize the abstract network under the current partitions, with
    /// fresh consecutive variable indices. Layer indices match the
    /// preprocessed network one for one; only sizes differ.
    pub fn network(&self) -> Result<NetworkLevelReasoner> {
        let pre = &self.preprocessed;
        let n = pre.num_layers();
        let mut out = NetworkLevelReasoner::new();

        // Input layer with its box.
        let input = layer_at(pre, 0)?;
        out.add_layer(LayerKind::Input, input.size())?;
        {
            let target = layer_at_mut(&mut out, 0)?;
            for i in 0..input.size() {
                target.set_lb(i, input.lb(i));
                target.set_ub(i, input.ub(i));
            }
        }

        // First hidden block, copied verbatim.
        {
            let ws = layer_at(pre, 1)?;
            out.add_layer(LayerKind::WeightedSum, ws.size())?;
            let input_size = input.size();
            let target = layer_at_mut(&mut out, 1)?;
            target.add_source(0, input_size)?;
            for t in 0..ws.size() {
                target.set_bias(t, ws.bias(t));
                for s in 0..input_size {
                    let w = ws.weight(0, s, t);
                    if w != 0.0 {
                        target.set_weight(0, s, t, w)?;
                    }
                }
            }

            let relu = layer_at(pre, 2)?;
            out.add_layer(LayerKind::Relu, relu.size())?;
            let target = layer_at_mut(&mut out, 2)?;
            for t in 0..relu.size() {
                target.add_activation_source(1, t, t)?;
            }
        }

        // Abstracted blocks.
        let mut previous_groups: Option<&[Group]> = None;
        for block in &self.blocks {
            let ws_pre = layer_at(pre, block.ws_layer)?;
            let source_index = block.ws_layer - 1;
            let count = block.groups.len();
            let previous_size = layer_at(&out, source_index)?.size();

            let ws_index = out.add_layer(LayerKind::WeightedSum, count)?;
            debug_assert_eq!(ws_index, block.ws_layer);
            let target = layer_at_mut(&mut out, ws_index)?;
            target.add_source(source_index, previous_size)?;

            for (g, group) in block.groups.iter().enumerate() {
                let op = bias_op(group.role.monotonicity());
                let bias = extremum(op, group.members.iter().map(|&t| ws_pre.bias(t)));
                target.set_bias(g, bias);

                match previous_groups {
                    // Source is the concrete first hidden ReLU: per-source
                    // extremum over the merged targets, no summation.
                    None => {
                        for s in 0..previous_size {
                            let op = weight_op(Role::from_copy(s % 4), group.role);
                            if op == WeightOp::Zero {
                                continue;
                            }
                            let w = extremum(
                                op,
                                group
                                    .members
                                    .iter()
                                    .map(|&t| ws_pre.weight(source_index, s, t)),
                            );
                            if w != 0.0 {
                                target.set_weight(source_index, s, g, w)?;
                            }
                        }
                    }
                    // Source is itself abstracted: sum the per-source
                    // extrema over its merged members.
                    Some(groups) => {
                        for (s_g, source_group) in groups.iter().enumerate() {
                            let op = weight_op(source_group.role, group.role);
                            if op == WeightOp::Zero {
                                continue;
                            }
                            let mut acc = 0.0;
                            for &s in &source_group.members {
                                acc += extremum(
                                    op,
                                    group
                                        .members
                                        .iter()
                                        .map(|&t| ws_pre.weight(source_index, s, t)),
                                );
                            }
                            if acc != 0.0 {
                                target.set_weight(source_index, s_g, g, acc)?;
                            }
                        }
                    }
                }
            }

            let relu_index = out.add_layer(LayerKind::Relu, count)?;
            debug_assert_eq!(relu_index, block.relu_layer());
            let target = layer_at_mut(&mut out, relu_index)?;
            for g in 0..count {
                target.add_activation_source(relu_index - 1, g, g)?;
            }

            previous_groups = Some(&block.groups);
        }

        // Output layer: never collapsed; merged sources sum their members'
        // output weights, classes the table zeroes contribute nothing.
        {
            let out_pre = layer_at(pre, n - 1)?;
            let source_index = n - 2;
            let previous_size = layer_at(&out, source_index)?.size();
            let out_index = out.add_layer(LayerKind::Output, out_pre.size())?;
            debug_assert_eq!(out_index, n - 1);
            let target = layer_at_mut(&mut out, out_index)?;
            target.add_source(source_index, previous_size)?;
            for t in 0..out_pre.size() {
                target.set_bias(t, out_pre.bias(t));
                match previous_groups {
                    None => {
                        for s in 0..previous_size {
                            let w = out_pre.weight(source_index, s, t);
                            if w != 0.0 {
                                target.set_weight(source_index, s, t, w)?;
                            }
                        }
                    }
                    Some(groups) => {
                        for (s_g, source_group) in groups.iter().enumerate() {
                            if weight_op(source_group.role, Role::PosInc) == WeightOp::Zero {
                                continue;
                            }
                            let mut acc = 0.0;
                            for &s in &source_group.members {
                                acc += out_pre.weight(source_index, s, t);
                            }
                            if acc != 0.0 {
                                target.set_weight(source_index, s_g, t, acc)?;
                            }
                        }
                    }
                }
            }
        }

        out.assign_variables();
        Ok(out)
    }
}
