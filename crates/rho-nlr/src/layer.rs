//! The layer model: one node of the layered network representation.
//!
//! A layer owns its bias vector, one dense weight matrix per source layer,
//! optional activation-source links (ReLU layers only), per-neuron variable
//! indices, concrete bounds, and the assignment slot filled by forward
//! evaluation. Cross-layer references are by layer index, never by handle,
//! so layers clone freely.

use ndarray::{Array1, Array2};
use rho_core::{NeuronIndex, Result, RhoError};
use std::collections::BTreeMap;

/// The kind of a layer. `Output` is a terminal weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Input,
    WeightedSum,
    Relu,
    Output,
}

impl LayerKind {
    /// Weighted-sum semantics (affine combination of sources plus bias).
    #[inline]
    pub fn is_weighted_sum(&self) -> bool {
        matches!(self, LayerKind::WeightedSum | LayerKind::Output)
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerKind::Input => write!(f, "Input"),
            LayerKind::WeightedSum => write!(f, "WeightedSum"),
            LayerKind::Relu => write!(f, "ReLU"),
            LayerKind::Output => write!(f, "Output"),
        }
    }
}

/// One layer of the network.
#[derive(Debug, Clone)]
pub struct Layer {
    index: usize,
    kind: LayerKind,
    size: usize,
    /// Source layer index -> source layer size. BTreeMap keeps evaluation
    /// order deterministic (ascending layer index).
    source_sizes: BTreeMap<usize, usize>,
    /// Source layer index -> weight matrix of shape (size, source_size);
    /// row = target neuron, column = source neuron. Missing entries are 0.
    weights: BTreeMap<usize, Array2<f64>>,
    bias: Array1<f64>,
    /// For ReLU layers: the neuron each of this layer's neurons activates
    /// from. Exactly one per neuron in a well-formed network.
    activation_sources: Vec<Option<NeuronIndex>>,
    /// Query variable index per neuron, assigned after construction.
    variables: Vec<Option<usize>>,
    /// Neurons eliminated by the engine's preprocessor, with fixed values.
    eliminated: BTreeMap<usize, f64>,
    lb: Array1<f64>,
    ub: Array1<f64>,
    assignment: Array1<f64>,
}

impl Layer {
    pub fn new(index: usize, kind: LayerKind, size: usize) -> Self {
        Self {
            index,
            kind,
            size,
            source_sizes: BTreeMap::new(),
            weights: BTreeMap::new(),
            bias: Array1::zeros(size),
            activation_sources: vec![None; size],
            variables: vec![None; size],
            eliminated: BTreeMap::new(),
            lb: Array1::from_elem(size, f64::NEG_INFINITY),
            ub: Array1::from_elem(size, f64::INFINITY),
            assignment: Array1::zeros(size),
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Source layer indices, ascending.
    pub fn source_layers(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.source_sizes.iter().map(|(&l, &s)| (l, s))
    }

    pub fn has_source(&self, source: usize) -> bool {
        self.source_sizes.contains_key(&source)
    }

    /// Register a source layer. Sources must precede this layer.
    pub fn add_source(&mut self, source: usize, source_size: usize) -> Result<()> {
        if self.kind == LayerKind::Input {
            return Err(RhoError::Configuration(format!(
                "input layer {} cannot have sources",
                self.index
            )));
        }
        if source >= self.index {
            return Err(RhoError::Configuration(format!(
                "layer {} cannot draw from layer {}",
                self.index, source
            )));
        }
        self.source_sizes.insert(source, source_size);
        self.weights
            .entry(source)
            .or_insert_with(|| Array2::zeros((self.size, source_size)));
        Ok(())
    }

    /// Set a weight. The source layer must have been registered.
    pub fn set_weight(
        &mut self,
        source_layer: usize,
        source_neuron: usize,
        target_neuron: usize,
        weight: f64,
    ) -> Result<()> {
        let matrix = self.weights.get_mut(&source_layer).ok_or_else(|| {
            RhoError::Configuration(format!(
                "layer {} has no source layer {}",
                self.index, source_layer
            ))
        })?;
        if target_neuron >= matrix.nrows() || source_neuron >= matrix.ncols() {
            return Err(RhoError::Configuration(format!(
                "weight ({}, {}, {}) out of range for layer {}",
                source_layer, source_neuron, target_neuron, self.index
            )));
        }
        matrix[[target_neuron, source_neuron]] = weight;
        Ok(())
    }

    /// Removing a weight is setting it to 0; the abstraction uses this to
    /// prune edges.
    pub fn remove_weight(
        &mut self,
        source_layer: usize,
        source_neuron: usize,
        target_neuron: usize,
    ) -> Result<()> {
        self.set_weight(source_layer, source_neuron, target_neuron, 0.0)
    }

    /// Read a weight; missing entries read as 0.
    pub fn weight(&self, source_layer: usize, source_neuron: usize, target_neuron: usize) -> f64 {
        self.weights
            .get(&source_layer)
            .map(|m| m[[target_neuron, source_neuron]])
            .unwrap_or(0.0)
    }

    pub fn weight_matrix(&self, source_layer: usize) -> Option<&Array2<f64>> {
        self.weights.get(&source_layer)
    }

    pub fn set_bias(&mut self, neuron: usize, bias: f64) {
        self.bias[neuron] = bias;
    }

    #[inline]
    pub fn bias(&self, neuron: usize) -> f64 {
        self.bias[neuron]
    }

    /// Link `target_neuron` of this ReLU layer to its activation source.
    pub fn add_activation_source(
        &mut self,
        source_layer: usize,
        source_neuron: usize,
        target_neuron: usize,
    ) -> Result<()> {
        if self.kind != LayerKind::Relu {
            return Err(RhoError::Configuration(format!(
                "layer {} is {}, not an activation layer",
                self.index, self.kind
            )));
        }
        if source_layer >= self.index {
            return Err(RhoError::Configuration(format!(
                "activation source layer {} does not precede layer {}",
                source_layer, self.index
            )));
        }
        if target_neuron >= self.size {
            return Err(RhoError::Configuration(format!(
                "activation target {} out of range for layer {}",
                target_neuron, self.index
            )));
        }
        self.activation_sources[target_neuron] =
            Some(NeuronIndex::new(source_layer, source_neuron));
        Ok(())
    }

    #[inline]
    pub fn activation_source(&self, neuron: usize) -> Option<NeuronIndex> {
        self.activation_sources[neuron]
    }

    pub fn set_variable(&mut self, neuron: usize, variable: usize) {
        self.variables[neuron] = Some(variable);
    }

    #[inline]
    pub fn variable(&self, neuron: usize) -> Option<usize> {
        self.variables[neuron]
    }

    pub(crate) fn clear_variable(&mut self, neuron: usize) {
        self.variables[neuron] = None;
    }

    /// Fix a neuron to a constant; propagation and evaluation treat it as
    /// eliminated from the query.
    pub fn eliminate(&mut self, neuron: usize, value: f64) {
        self.eliminated.insert(neuron, value);
        self.lb[neuron] = value;
        self.ub[neuron] = value;
    }

    #[inline]
    pub fn eliminated_value(&self, neuron: usize) -> Option<f64> {
        self.eliminated.get(&neuron).copied()
    }

    #[inline]
    pub fn lb(&self, neuron: usize) -> f64 {
        self.lb[neuron]
    }

    #[inline]
    pub fn ub(&self, neuron: usize) -> f64 {
        self.ub[neuron]
    }

    pub fn set_lb(&mut self, neuron: usize, value: f64) {
        self.lb[neuron] = value;
    }

    pub fn set_ub(&mut self, neuron: usize, value: f64) {
        self.ub[neuron] = value;
    }

    pub fn lower_bounds(&self) -> &Array1<f64> {
        &self.lb
    }

    pub fn upper_bounds(&self) -> &Array1<f64> {
        &self.ub
    }

    pub fn assignment(&self) -> &Array1<f64> {
        &self.assignment
    }

    pub(crate) fn set_assignment(&mut self, assignment: Array1<f64>) {
        self.assignment = assignment;
    }

    /// Compute this layer's assignment from the assignments of all earlier
    /// layers (`earlier[j]` is layer `j`). Source layers are visited in
    /// ascending index order and source neurons in ascending order, so
    /// floating-point sums replay deterministically.
    pub fn compute_assignment(&self, earlier: &[Layer]) -> Result<Array1<f64>> {
        match self.kind {
            LayerKind::Input => Err(RhoError::Configuration(
                "input layer assignments are provided, not computed".to_string(),
            )),
            LayerKind::WeightedSum | LayerKind::Output => {
                let mut out = self.bias.clone();
                for (&source, matrix) in &self.weights {
                    let values = earlier
                        .get(source)
                        .ok_or_else(|| {
                            RhoError::Configuration(format!(
                                "layer {} evaluated before source {}",
                                self.index, source
                            ))
                        })?
                        .assignment();
                    for t in 0..self.size {
                        let mut acc = out[t];
                        for s in 0..matrix.ncols() {
                            acc += matrix[[t, s]] * values[s];
                        }
                        out[t] = acc;
                    }
                }
                for (&neuron, &value) in &self.eliminated {
                    out[neuron] = value;
                }
                Ok(out)
            }
            LayerKind::Relu => {
                let mut out = Array1::zeros(self.size);
                for t in 0..self.size {
                    if let Some(value) = self.eliminated.get(&t) {
                        out[t] = *value;
                        continue;
                    }
                    let source = self.activation_sources[t].ok_or_else(|| {
                        RhoError::Configuration(format!(
                            "neuron ({}, {}) has no activation source",
                            self.index, t
                        ))
                    })?;
                    let value = earlier
                        .get(source.layer)
                        .ok_or_else(|| {
                            RhoError::Configuration(format!(
                                "layer {} evaluated before source {}",
                                self.index, source.layer
                            ))
                        })?
                        .assignment()[source.neuron];
                    out[t] = value.max(0.0);
                }
                Ok(out)
            }
        }
    }

    /// Interval-arithmetic bounds for this layer from the concrete bounds of
    /// earlier layers. For a weighted sum, each weight's positive part
    /// composes lower-with-lower and upper-with-upper; the negative part
    /// crosses.
    pub fn interval_bounds(&self, earlier: &[Layer]) -> Result<(Array1<f64>, Array1<f64>)> {
        match self.kind {
            LayerKind::Input => Err(RhoError::Configuration(
                "input layer bounds are provided, not computed".to_string(),
            )),
            LayerKind::WeightedSum | LayerKind::Output => {
                let mut lb = self.bias.clone();
                let mut ub = self.bias.clone();
                for (&source, matrix) in &self.weights {
                    let source_layer = earlier.get(source).ok_or_else(|| {
                        RhoError::Configuration(format!(
                            "layer {} bounded before source {}",
                            self.index, source
                        ))
                    })?;
                    for t in 0..self.size {
                        for s in 0..matrix.ncols() {
                            let w = matrix[[t, s]];
                            if w > 0.0 {
                                lb[t] += w * source_layer.lb(s);
                                ub[t] += w * source_layer.ub(s);
                            } else if w < 0.0 {
                                lb[t] += w * source_layer.ub(s);
                                ub[t] += w * source_layer.lb(s);
                            }
                        }
                    }
                }
                for (&neuron, &value) in &self.eliminated {
                    lb[neuron] = value;
                    ub[neuron] = value;
                }
                Ok((lb, ub))
            }
            LayerKind::Relu => {
                let mut lb = Array1::zeros(self.size);
                let mut ub = Array1::zeros(self.size);
                for t in 0..self.size {
                    if let Some(value) = self.eliminated.get(&t) {
                        lb[t] = *value;
                        ub[t] = *value;
                        continue;
                    }
                    let source = self.activation_sources[t].ok_or_else(|| {
                        RhoError::Configuration(format!(
                            "neuron ({}, {}) has no activation source",
                            self.index, t
                        ))
                    })?;
                    let source_layer = earlier.get(source.layer).ok_or_else(|| {
                        RhoError::Configuration(format!(
                            "layer {} bounded before source {}",
                            self.index, source.layer
                        ))
                    })?;
                    lb[t] = source_layer.lb(source.neuron).max(0.0);
                    ub[t] = source_layer.ub(source.neuron).max(0.0);
                }
                Ok((lb, ub))
            }
        }
    }
}
