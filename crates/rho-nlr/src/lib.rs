//! Network-level reasoning for piecewise-linear feedforward networks.
//!
//! The [`NetworkLevelReasoner`] owns an ordered sequence of layers (input,
//! weighted sums, ReLUs, terminal output sum) and performs the operations
//! that need whole-network structure: forward evaluation, interval and
//! symbolic bound propagation, translation to the flat variable-and-equation
//! query consumed by a solving engine, and the variable remap/eliminate
//! protocol driven by an engine's preprocessor.
//!
//! Propagation passes never fail; at worst they fail to tighten. All
//! configuration errors surface at construction time.

mod layer;
mod query;
mod relu;
mod symbolic;
mod tableau;

#[cfg(test)]
mod tests;

pub use layer::{Layer, LayerKind};
pub use query::{Equation, InputQuery};
pub use relu::{
    ActivationKind, CaseSplit, Fix, Phase, ReluConstraint, ReluConstraintState,
};
pub use symbolic::{relu_relaxation, SymbolicBounds};
pub use tableau::{BoundTable, VariableBounds, WatchRegistrar};

use ndarray::Array1;
use rho_core::{Result, RhoError, Tightening};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Owns the layer sequence and reasons over it.
#[derive(Debug, Clone, Default)]
pub struct NetworkLevelReasoner {
    layers: Vec<Layer>,
    tightenings: Vec<Tightening>,
}

impl NetworkLevelReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer; the first must be the input layer, and only the
    /// first may be one.
    pub fn add_layer(&mut self, kind: LayerKind, size: usize) -> Result<usize> {
        let index = self.layers.len();
        if index == 0 && kind != LayerKind::Input {
            return Err(RhoError::Configuration(
                "the first layer must be the input layer".to_string(),
            ));
        }
        if index > 0 && kind == LayerKind::Input {
            return Err(RhoError::Configuration(
                "only the first layer may be an input layer".to_string(),
            ));
        }
        self.layers.push(Layer::new(index, kind, size));
        Ok(index)
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map(|l| l.size()).unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(|l| l.size()).unwrap_or(0)
    }

    /// Set the input box on the input layer.
    pub fn set_input_bounds(&mut self, lower: &[f64], upper: &[f64]) -> Result<()> {
        let input = self.layers.first_mut().ok_or_else(|| {
            RhoError::Configuration("network has no layers".to_string())
        })?;
        if lower.len() != input.size() || upper.len() != input.size() {
            return Err(RhoError::ShapeMismatch {
                expected: input.size(),
                got: lower.len().min(upper.len()),
            });
        }
        for i in 0..input.size() {
            input.set_lb(i, lower[i]);
            input.set_ub(i, upper[i]);
        }
        Ok(())
    }

    /// Topological forward pass. Records every layer's assignment and
    /// returns the output layer's.
    pub fn evaluate(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let first = self.layers.first_mut().ok_or_else(|| {
            RhoError::Configuration("network has no layers".to_string())
        })?;
        if input.len() != first.size() {
            return Err(RhoError::ShapeMismatch {
                expected: first.size(),
                got: input.len(),
            });
        }
        first.set_assignment(Array1::from(input.to_vec()));
        for i in 1..self.layers.len() {
            let (earlier, rest) = self.layers.split_at_mut(i);
            let assignment = rest[0].compute_assignment(earlier)?;
            rest[0].set_assignment(assignment);
        }
        let last = self.layers.len() - 1;
        Ok(self.layers[last].assignment().to_vec())
    }

    /// Populate every neuron's concrete bounds from an external bound
    /// source, keyed by the neuron's query variable.
    pub fn obtain_bounds(&mut self, source: &dyn VariableBounds) {
        for layer in &mut self.layers {
            for neuron in 0..layer.size() {
                if layer.eliminated_value(neuron).is_some() {
                    continue;
                }
                if let Some(variable) = layer.variable(neuron) {
                    layer.set_lb(neuron, source.lower_bound(variable));
                    layer.set_ub(neuron, source.upper_bound(variable));
                }
            }
        }
    }

    /// Interval-arithmetic sweep over layers 1..k. Improvements are stored
    /// on the neurons and recorded as tightenings.
    pub fn interval_propagation(&mut self) {
        for i in 1..self.layers.len() {
            let (earlier, rest) = self.layers.split_at_mut(i);
            let layer = &mut rest[0];
            let (lb, ub) = match layer.interval_bounds(earlier) {
                Ok(bounds) => bounds,
                Err(e) => {
                    warn!(layer = i, error = %e, "interval propagation stopped");
                    return;
                }
            };
            for t in 0..layer.size() {
                if layer.eliminated_value(t).is_some() {
                    continue;
                }
                if lb[t] > layer.lb(t) {
                    layer.set_lb(t, lb[t]);
                    if let Some(variable) = layer.variable(t) {
                        self.tightenings.push(Tightening::lower(variable, lb[t]));
                    }
                }
                if ub[t] < layer.ub(t) {
                    layer.set_ub(t, ub[t]);
                    if let Some(variable) = layer.variable(t) {
                        self.tightenings.push(Tightening::upper(variable, ub[t]));
                    }
                }
            }
        }
        debug!(
            tightenings = self.tightenings.len(),
            "interval propagation pass complete"
        );
    }

    /// Symbolic sweep over layers 1..k, carrying linear expressions over
    /// the input layer. Resulting bounds are never looser than interval
    /// arithmetic; on a crossing ReLU the triangle relaxation applies.
    pub fn symbolic_propagation(&mut self) {
        if self.layers.is_empty() {
            return;
        }
        let input_lb = self.layers[0].lower_bounds().clone();
        let input_ub = self.layers[0].upper_bounds().clone();
        let mut symbolic: Vec<SymbolicBounds> =
            vec![SymbolicBounds::identity(self.layers[0].size())];

        for i in 1..self.layers.len() {
            let (earlier, rest) = self.layers.split_at_mut(i);
            let layer = &mut rest[0];
            let composed = match layer.kind() {
                LayerKind::Input => unreachable!("input layers are first"),
                LayerKind::WeightedSum | LayerKind::Output => {
                    SymbolicBounds::weighted_sum(layer, &symbolic)
                }
                LayerKind::Relu => {
                    SymbolicBounds::relu(layer, &symbolic, earlier, &input_lb, &input_ub)
                }
            };
            let bounds = match composed {
                Ok(bounds) => bounds,
                Err(e) => {
                    warn!(layer = i, error = %e, "symbolic propagation stopped");
                    return;
                }
            };
            for t in 0..layer.size() {
                if layer.eliminated_value(t).is_some() {
                    continue;
                }
                let mut lo = bounds.concretize_lower(t, &input_lb, &input_ub);
                let mut hi = bounds.concretize_upper(t, &input_lb, &input_ub);
                if layer.kind() == LayerKind::Relu {
                    lo = lo.max(0.0);
                    hi = hi.max(0.0);
                }
                if lo > layer.lb(t) {
                    layer.set_lb(t, lo);
                    if let Some(variable) = layer.variable(t) {
                        self.tightenings.push(Tightening::lower(variable, lo));
                    }
                }
                if hi < layer.ub(t) {
                    layer.set_ub(t, hi);
                    if let Some(variable) = layer.variable(t) {
                        self.tightenings.push(Tightening::upper(variable, hi));
                    }
                }
            }
            symbolic.push(bounds);
        }
        debug!(
            tightenings = self.tightenings.len(),
            "symbolic propagation pass complete"
        );
    }

    /// Drain recorded tightenings into the caller's sink.
    pub fn collect_tightenings(&mut self, sink: &mut Vec<Tightening>) {
        sink.append(&mut self.tightenings);
    }

    /// Assign consecutive variable indices to every live neuron, walking
    /// layers and neurons in ascending order. Returns the variable count.
    pub fn assign_variables(&mut self) -> usize {
        let mut next = 0;
        for layer in &mut self.layers {
            for neuron in 0..layer.size() {
                if layer.eliminated_value(neuron).is_some() {
                    continue;
                }
                layer.set_variable(neuron, next);
                next += 1;
            }
        }
        next
    }

    /// Produce the equivalent flat query: one equation per weighted-sum
    /// neuron, one ReLU constraint per activation neuron, input/output
    /// markings, and the input layer's propagated bounds. The query carries
    /// a deep copy of this network.
    pub fn generate_query(&self) -> Result<InputQuery> {
        let mut query = InputQuery::new();
        let mut max_variable = None;

        for layer in &self.layers {
            for neuron in 0..layer.size() {
                if layer.eliminated_value(neuron).is_some() {
                    continue;
                }
                let variable = layer.variable(neuron).ok_or_else(|| {
                    RhoError::Configuration(format!(
                        "neuron ({}, {}) has no variable; assign variables first",
                        layer.index(),
                        neuron
                    ))
                })?;
                max_variable = Some(max_variable.map_or(variable, |m: usize| m.max(variable)));
                if layer.lb(neuron).is_finite() {
                    query.set_lower_bound(variable, layer.lb(neuron));
                }
                if layer.ub(neuron).is_finite() {
                    query.set_upper_bound(variable, layer.ub(neuron));
                }
            }
        }
        query.set_num_variables(max_variable.map_or(0, |m| m + 1));

        for layer in &self.layers {
            match layer.kind() {
                LayerKind::Input => {
                    for neuron in 0..layer.size() {
                        if let Some(variable) = layer.variable(neuron) {
                            query.mark_input_variable(variable);
                        }
                    }
                }
                LayerKind::WeightedSum | LayerKind::Output => {
                    for t in 0..layer.size() {
                        if layer.eliminated_value(t).is_some() {
                            continue;
                        }
                        let target = layer.variable(t).ok_or_else(|| {
                            RhoError::Configuration(format!(
                                "neuron ({}, {}) has no variable",
                                layer.index(),
                                t
                            ))
                        })?;
                        let mut equation = Equation::new();
                        let mut scalar = -layer.bias(t);
                        for (source, source_size) in layer.source_layers() {
                            let source_layer = self.layers.get(source).ok_or_else(|| {
                                RhoError::Configuration(format!(
                                    "layer {} draws from missing layer {}",
                                    layer.index(),
                                    source
                                ))
                            })?;
                            for s in 0..source_size {
                                let w = layer.weight(source, s, t);
                                if w == 0.0 {
                                    continue;
                                }
                                if let Some(value) = source_layer.eliminated_value(s) {
                                    scalar -= w * value;
                                } else {
                                    let source_variable =
                                        source_layer.variable(s).ok_or_else(|| {
                                            RhoError::Configuration(format!(
                                                "neuron ({}, {}) has no variable",
                                                source, s
                                            ))
                                        })?;
                                    equation.add_addend(w, source_variable);
                                }
                            }
                        }
                        equation.add_addend(-1.0, target);
                        equation.set_scalar(scalar);
                        query.add_equation(equation);
                    }
                }
                LayerKind::Relu => {
                    for t in 0..layer.size() {
                        if layer.eliminated_value(t).is_some() {
                            continue;
                        }
                        let source = layer.activation_source(t).ok_or_else(|| {
                            RhoError::Configuration(format!(
                                "neuron ({}, {}) has no activation source",
                                layer.index(),
                                t
                            ))
                        })?;
                        let source_layer = self.layers.get(source.layer).ok_or_else(|| {
                            RhoError::Configuration(format!(
                                "activation source layer {} missing",
                                source.layer
                            ))
                        })?;
                        if source_layer.eliminated_value(source.neuron).is_some() {
                            continue;
                        }
                        let b = source_layer.variable(source.neuron).ok_or_else(|| {
                            RhoError::Configuration(format!(
                                "neuron {} has no variable",
                                source
                            ))
                        })?;
                        let f = layer.variable(t).ok_or_else(|| {
                            RhoError::Configuration(format!(
                                "neuron ({}, {}) has no variable",
                                layer.index(),
                                t
                            ))
                        })?;
                        query.add_relu_constraint(ReluConstraint::new(b, f));
                    }
                }
            }
        }

        if let Some(last) = self.layers.last() {
            for neuron in 0..last.size() {
                if let Some(variable) = last.variable(neuron) {
                    query.mark_output_variable(variable);
                }
            }
        }

        query.attach_network(self.clone());
        Ok(query)
    }

    /// Honor an engine preprocessor's variable remapping: `map` renames
    /// surviving variables, `eliminated` fixes removed ones to constants.
    pub fn update_variable_indices(
        &mut self,
        map: &BTreeMap<usize, usize>,
        eliminated: &BTreeMap<usize, f64>,
    ) {
        for layer in &mut self.layers {
            for neuron in 0..layer.size() {
                let Some(variable) = layer.variable(neuron) else {
                    continue;
                };
                if let Some(&value) = eliminated.get(&variable) {
                    layer.eliminate(neuron, value);
                    layer.clear_variable(neuron);
                } else if let Some(&new) = map.get(&variable) {
                    layer.set_variable(neuron, new);
                }
            }
        }
    }

    /// Human-readable topology summary.
    pub fn dump_topology(&self) -> String {
        let mut out = String::new();
        for layer in &self.layers {
            let sources: Vec<usize> = layer.source_layers().map(|(l, _)| l).collect();
            if sources.is_empty() {
                out.push_str(&format!(
                    "Layer {}: {}, size {}\n",
                    layer.index(),
                    layer.kind(),
                    layer.size()
                ));
            } else {
                out.push_str(&format!(
                    "Layer {}: {}, size {}, sources {:?}\n",
                    layer.index(),
                    layer.kind(),
                    layer.size(),
                    sources
                ));
            }
        }
        out
    }
}
