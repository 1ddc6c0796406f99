//! Symbolic bound propagation: linear expressions over the input layer that
//! sandwich every neuron's value across the whole input box.
//!
//! Each layer carries four arrays: coefficient matrices and scalar biases for
//! the lower and upper bounding expressions. Weighted sums compose with sign
//! discipline (positive weights pair lower-with-lower and upper-with-upper,
//! negative weights cross); ReLU neurons choose between pass-through, zero,
//! and the triangle relaxation based on the source's concrete bounds.

use crate::layer::{Layer, LayerKind};
use ndarray::{Array1, Array2};
use rho_core::{Result, RhoError};

/// Linear relaxation of max(0, x) on the interval [l, u].
///
/// Returns (lower_slope, lower_intercept, upper_slope, upper_intercept).
/// The crossing case uses the chord u/(u-l) * (x - l) above and 0 below;
/// callers holding a lower expression that is provably non-negative may
/// upgrade the lower side to the slope-1 line.
pub fn relu_relaxation(l: f64, u: f64) -> (f64, f64, f64, f64) {
    if l >= 0.0 {
        (1.0, 0.0, 1.0, 0.0)
    } else if u <= 0.0 {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let slope = u / (u - l);
        (0.0, 0.0, slope, -l * slope)
    }
}

/// Symbolic bounds for one layer: `size` lower and upper expressions over
/// the `num_inputs` input neurons, plus scalar biases.
#[derive(Debug, Clone)]
pub struct SymbolicBounds {
    /// Shape (size, num_inputs).
    pub lower_a: Array2<f64>,
    pub lower_b: Array1<f64>,
    pub upper_a: Array2<f64>,
    pub upper_b: Array1<f64>,
}

/// Minimum of a linear expression over the input box. Zero coefficients are
/// skipped so unbounded inputs do not poison the sum with 0 * inf.
fn row_min(a: &Array2<f64>, b: &Array1<f64>, row: usize, lb: &Array1<f64>, ub: &Array1<f64>) -> f64 {
    let mut acc = b[row];
    for i in 0..a.ncols() {
        let c = a[[row, i]];
        if c > 0.0 {
            acc += c * lb[i];
        } else if c < 0.0 {
            acc += c * ub[i];
        }
    }
    acc
}

fn row_max(a: &Array2<f64>, b: &Array1<f64>, row: usize, lb: &Array1<f64>, ub: &Array1<f64>) -> f64 {
    let mut acc = b[row];
    for i in 0..a.ncols() {
        let c = a[[row, i]];
        if c > 0.0 {
            acc += c * ub[i];
        } else if c < 0.0 {
            acc += c * lb[i];
        }
    }
    acc
}

impl SymbolicBounds {
    /// The input layer bounds itself: identity coefficients, zero bias.
    pub fn identity(size: usize) -> Self {
        Self {
            lower_a: Array2::eye(size),
            lower_b: Array1::zeros(size),
            upper_a: Array2::eye(size),
            upper_b: Array1::zeros(size),
        }
    }

    pub fn zeros(size: usize, num_inputs: usize) -> Self {
        Self {
            lower_a: Array2::zeros((size, num_inputs)),
            lower_b: Array1::zeros(size),
            upper_a: Array2::zeros((size, num_inputs)),
            upper_b: Array1::zeros(size),
        }
    }

    /// Tightest lower bound the lower expression certifies over the box.
    pub fn concretize_lower(&self, neuron: usize, lb: &Array1<f64>, ub: &Array1<f64>) -> f64 {
        row_min(&self.lower_a, &self.lower_b, neuron, lb, ub)
    }

    /// Tightest upper bound the upper expression certifies over the box.
    pub fn concretize_upper(&self, neuron: usize, lb: &Array1<f64>, ub: &Array1<f64>) -> f64 {
        row_max(&self.upper_a, &self.upper_b, neuron, lb, ub)
    }

    /// Compose a weighted-sum layer with the symbolic bounds of its source
    /// layers (`earlier[j]` belongs to layer `j`).
    pub fn weighted_sum(layer: &Layer, earlier: &[SymbolicBounds]) -> Result<Self> {
        debug_assert!(layer.kind().is_weighted_sum());
        let num_inputs = earlier
            .first()
            .map(|s| s.lower_a.ncols())
            .ok_or_else(|| {
                RhoError::Configuration("weighted sum with no preceding layers".to_string())
            })?;
        let mut out = Self::zeros(layer.size(), num_inputs);
        for t in 0..layer.size() {
            out.lower_b[t] = layer.bias(t);
            out.upper_b[t] = layer.bias(t);
        }
        for (source, _) in layer.source_layers() {
            let src = earlier.get(source).ok_or_else(|| {
                RhoError::Configuration(format!(
                    "layer {} composed before source {}",
                    layer.index(),
                    source
                ))
            })?;
            let matrix = match layer.weight_matrix(source) {
                Some(m) => m,
                None => continue,
            };
            for t in 0..layer.size() {
                for s in 0..matrix.ncols() {
                    let w = matrix[[t, s]];
                    if w == 0.0 {
                        continue;
                    }
                    let (low_src_a, low_src_b, up_src_a, up_src_b) = if w > 0.0 {
                        (&src.lower_a, &src.lower_b, &src.upper_a, &src.upper_b)
                    } else {
                        (&src.upper_a, &src.upper_b, &src.lower_a, &src.lower_b)
                    };
                    for i in 0..num_inputs {
                        out.lower_a[[t, i]] += w * low_src_a[[s, i]];
                        out.upper_a[[t, i]] += w * up_src_a[[s, i]];
                    }
                    out.lower_b[t] += w * low_src_b[s];
                    out.upper_b[t] += w * up_src_b[s];
                }
            }
        }
        out.freeze_eliminated(layer);
        Ok(out)
    }

    /// Compose a ReLU layer: pass through active neurons, zero out inactive
    /// ones, relax the crossing ones.
    pub fn relu(
        layer: &Layer,
        earlier: &[SymbolicBounds],
        earlier_layers: &[Layer],
        input_lb: &Array1<f64>,
        input_ub: &Array1<f64>,
    ) -> Result<Self> {
        debug_assert_eq!(layer.kind(), LayerKind::Relu);
        let num_inputs = input_lb.len();
        let mut out = Self::zeros(layer.size(), num_inputs);
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
            let src_sym = earlier.get(source.layer).ok_or_else(|| {
                RhoError::Configuration(format!(
                    "layer {} composed before source {}",
                    layer.index(),
                    source.layer
                ))
            })?;
            let src_layer = earlier_layers.get(source.layer).ok_or_else(|| {
                RhoError::Configuration(format!(
                    "layer {} composed before source {}",
                    layer.index(),
                    source.layer
                ))
            })?;
            let s = source.neuron;
            let l = src_layer.lb(s);
            let u = src_layer.ub(s);

            let (_, _, upper_slope, upper_intercept) = relu_relaxation(l, u);
            if upper_slope != 0.0 {
                for i in 0..num_inputs {
                    out.upper_a[[t, i]] = upper_slope * src_sym.upper_a[[s, i]];
                }
                out.upper_b[t] = upper_slope * src_sym.upper_b[s] + upper_intercept;
            }

            // The lower side passes through when the neuron is provably
            // active, and also on a crossing neuron whose lower expression
            // cannot go negative over the box; otherwise it is floored at 0
            // (rows stay zero).
            let keep_lower = l >= 0.0
                || (u > 0.0
                    && row_min(&src_sym.lower_a, &src_sym.lower_b, s, input_lb, input_ub)
                        >= 0.0);
            if keep_lower {
                for i in 0..num_inputs {
                    out.lower_a[[t, i]] = src_sym.lower_a[[s, i]];
                }
                out.lower_b[t] = src_sym.lower_b[s];
            }
        }
        out.freeze_eliminated(layer);
        Ok(out)
    }

    /// Pin eliminated neurons to constant expressions so downstream layers
    /// compose with their fixed values.
    fn freeze_eliminated(&mut self, layer: &Layer) {
        for t in 0..layer.size() {
            if let Some(value) = layer.eliminated_value(t) {
                for i in 0..self.lower_a.ncols() {
                    self.lower_a[[t, i]] = 0.0;
                    self.upper_a[[t, i]] = 0.0;
                }
                self.lower_b[t] = value;
                self.upper_b[t] = value;
            }
        }
    }
}
