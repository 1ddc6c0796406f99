//! The 4× sign × monotonicity expansion.
//!
//! Every intermediate neuron of the canonical ladder becomes a 4-tuple of
//! copies, one per role. Incoming weights and biases are duplicated into
//! every copy; outgoing weights through a ReLU are pruned so that each
//! concrete edge survives on exactly one source copy: the one whose sign
//! matches the weight and whose monotonicity matches the target's (flipped
//! under a negative weight). The rewritten network therefore computes
//! exactly the same input→output mapping as the original: every copy of a
//! neuron carries the original neuron's value, and each target sums each
//! original edge exactly once.

use crate::roles::Role;
use rho_core::{Result, RhoError};
use rho_nlr::{LayerKind, NetworkLevelReasoner};
use tracing::debug;

/// Check the canonical alternating topology the expansion relies on:
/// input, (weighted sum, ReLU) blocks, terminal output sum, each layer
/// drawing only from its predecessor and each ReLU neuron activating from
/// its same-index predecessor neuron.
pub(crate) fn validate_canonical(nlr: &NetworkLevelReasoner) -> Result<()> {
    let n = nlr.num_layers();
    if n < 4 || n % 2 != 0 {
        return Err(RhoError::Configuration(format!(
            "expected input, hidden blocks, and output; got {} layers",
            n
        )));
    }
    for index in 0..n {
        let layer = nlr.layer(index).ok_or_else(|| {
            RhoError::Configuration(format!("missing layer {}", index))
        })?;
        let expected = if index == 0 {
            LayerKind::Input
        } else if index == n - 1 {
            LayerKind::Output
        } else if index % 2 == 1 {
            LayerKind::WeightedSum
        } else {
            LayerKind::Relu
        };
        if layer.kind() != expected {
            return Err(RhoError::Configuration(format!(
                "layer {} is {}, expected {}",
                index,
                layer.kind(),
                expected
            )));
        }
        match layer.kind() {
            LayerKind::Input => {}
            LayerKind::WeightedSum | LayerKind::Output => {
                let sources: Vec<usize> = layer.source_layers().map(|(l, _)| l).collect();
                if sources != [index - 1] {
                    return Err(RhoError::Configuration(format!(
                        "layer {} must draw only from layer {}",
                        index,
                        index - 1
                    )));
                }
            }
            LayerKind::Relu => {
                let previous = nlr.layer(index - 1).ok_or_else(|| {
                    RhoError::Configuration(format!("missing layer {}", index - 1))
                })?;
                if layer.size() != previous.size() {
                    return Err(RhoError::Configuration(format!(
                        "ReLU layer {} size {} differs from its source size {}",
                        index,
                        layer.size(),
                        previous.size()
                    )));
                }
                for neuron in 0..layer.size() {
                    let source = layer.activation_source(neuron).ok_or_else(|| {
                        RhoError::Configuration(format!(
                            "neuron ({}, {}) has no activation source",
                            index, neuron
                        ))
                    })?;
                    if source.layer != index - 1 || source.neuron != neuron {
                        return Err(RhoError::Configuration(format!(
                            "neuron ({}, {}) must activate from ({}, {})",
                            index,
                            neuron,
                            index - 1,
                            neuron
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Rewrite the network so every intermediate neuron becomes its 4-tuple of
/// role copies, with fresh consecutive variable indices. Layer sizes
/// (n0, n1, ..., nk) become (n0, 4n1, 4n1, ..., 4nk-1, 4nk-1, nk).
pub fn preprocess(nlr: &NetworkLevelReasoner) -> Result<NetworkLevelReasoner> {
    validate_canonical(nlr)?;
    let n = nlr.num_layers();
    let mut out = NetworkLevelReasoner::new();

    // Input layer unchanged, box included.
    let input = layer_at(nlr, 0)?;
    out.add_layer(LayerKind::Input, input.size())?;
    {
        let target = layer_at_mut(&mut out, 0)?;
        for i in 0..input.size() {
            target.set_lb(i, input.lb(i));
            target.set_ub(i, input.ub(i));
        }
    }

    for index in 1..n {
        let layer = layer_at(nlr, index)?;
        match layer.kind() {
            LayerKind::Input => unreachable!("validated canonical topology"),
            LayerKind::WeightedSum => {
                let original_size = layer.size();
                let new_index = out.add_layer(LayerKind::WeightedSum, 4 * original_size)?;
                let previous = layer_at(nlr, index - 1)?;
                let previous_new_size = if index == 1 {
                    previous.size()
                } else {
                    4 * previous.size()
                };
                let target = layer_at_mut(&mut out, new_index)?;
                target.add_source(index - 1, previous_new_size)?;
                for t in 0..original_size {
                    for c in 0..4 {
                        target.set_bias(4 * t + c, layer.bias(t));
                    }
                }
                if index == 1 {
                    // The input layer is not quadrupled: duplicate every
                    // edge into all four copies.
                    for j in 0..previous.size() {
                        for t in 0..original_size {
                            let w = layer.weight(0, j, t);
                            if w == 0.0 {
                                continue;
                            }
                            for c in 0..4 {
                                target.set_weight(0, j, 4 * t + c, w)?;
                            }
                        }
                    }
                } else {
                    // The source is a quadrupled ReLU layer: each edge
                    // survives on exactly one source copy per target copy.
                    for j in 0..previous.size() {
                        for t in 0..original_size {
                            let w = layer.weight(index - 1, j, t);
                            if w == 0.0 {
                                continue;
                            }
                            for c in 0..4 {
                                let carrier = Role::edge_carrier(w > 0.0, Role::from_copy(c));
                                target.set_weight(
                                    index - 1,
                                    4 * j + carrier.copy_offset(),
                                    4 * t + c,
                                    w,
                                )?;
                            }
                        }
                    }
                }
            }
            LayerKind::Relu => {
                let original_size = layer.size();
                let new_index = out.add_layer(LayerKind::Relu, 4 * original_size)?;
                let target = layer_at_mut(&mut out, new_index)?;
                for t in 0..original_size {
                    for c in 0..4 {
                        target.add_activation_source(index - 1, 4 * t + c, 4 * t + c)?;
                    }
                }
            }
            LayerKind::Output => {
                let new_index = out.add_layer(LayerKind::Output, layer.size())?;
                let previous = layer_at(nlr, index - 1)?;
                let target = layer_at_mut(&mut out, new_index)?;
                target.add_source(index - 1, 4 * previous.size())?;
                for t in 0..layer.size() {
                    target.set_bias(t, layer.bias(t));
                }
                // The output is all POS_INC: a positive edge survives on
                // the POS_INC copy, a negative one on NEG_DEC.
                for j in 0..previous.size() {
                    for t in 0..layer.size() {
                        let w = layer.weight(index - 1, j, t);
                        if w == 0.0 {
                            continue;
                        }
                        let carrier = Role::edge_carrier(w > 0.0, Role::PosInc);
                        target.set_weight(index - 1, 4 * j + carrier.copy_offset(), t, w)?;
                    }
                }
            }
        }
    }

    let variables = out.assign_variables();
    debug!(
        layers = out.num_layers(),
        variables, "preprocessed network into role copies"
    );
    Ok(out)
}

pub(crate) fn layer_at(nlr: &NetworkLevelReasoner, index: usize) -> Result<&rho_nlr::Layer> {
    nlr.layer(index)
        .ok_or_else(|| RhoError::Configuration(format!("missing layer {}", index)))
}

pub(crate) fn layer_at_mut(
    nlr: &mut NetworkLevelReasoner,
    index: usize,
) -> Result<&mut rho_nlr::Layer> {
    nlr.layer_mut(index)
        .ok_or_else(|| RhoError::Configuration(format!("missing layer {}", index)))
}
