//! NNet format support for loading ReLU-network verification benchmarks.
//!
//! NNet (Kyle Julian, Stanford 2016) stores fully-connected ReLU networks
//! as plain text: comment lines starting with `//`, a header with layer
//! counts, the layer sizes, an unused symmetric flag, the input box,
//! normalization constants (means and ranges, inputs plus one for the
//! output), then row-major weight matrices and bias vectors per layer.
//! Hidden layers are ReLU-activated; the output layer is linear.

use ndarray::{Array1, Array2};
use rho_core::{Result, RhoError};
use rho_nlr::{InputQuery, LayerKind, NetworkLevelReasoner};
use std::path::Path;
use tracing::{debug, info};

/// A parsed NNet network with all metadata.
#[derive(Debug, Clone)]
pub struct NnetNetwork {
    /// Number of weight layers (not counting the input layer).
    pub num_layers: usize,
    pub input_size: usize,
    pub output_size: usize,
    pub max_layer_size: usize,
    /// Sizes of all layers including input and output.
    pub layer_sizes: Vec<usize>,
    /// Input box, used for clamping during normalization.
    pub input_minimums: Vec<f64>,
    pub input_maximums: Vec<f64>,
    pub input_means: Vec<f64>,
    pub input_ranges: Vec<f64>,
    pub output_mean: f64,
    pub output_range: f64,
    /// Weight matrices, `layer_sizes[k+1] x layer_sizes[k]`.
    pub weights: Vec<Array2<f64>>,
    pub biases: Vec<Array1<f64>>,
}

struct LineReader<'a> {
    lines: std::str::Lines<'a>,
    line_number: usize,
}

impl<'a> LineReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            line_number: 0,
        }
    }

    /// Next non-comment, non-empty line as comma-separated floats.
    fn values(&mut self) -> Result<Vec<f64>> {
        loop {
            let line = self.lines.next().ok_or_else(|| {
                RhoError::Configuration(format!(
                    "nnet file truncated after line {}",
                    self.line_number
                ))
            })?;
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            return trimmed
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        RhoError::Configuration(format!(
                            "nnet line {}: bad number {:?}",
                            self.line_number, v
                        ))
                    })
                })
                .collect();
        }
    }

    fn sizes(&mut self) -> Result<Vec<usize>> {
        Ok(self.values()?.into_iter().map(|v| v as usize).collect())
    }
}

/// Parse NNet text.
pub fn parse_nnet(text: &str) -> Result<NnetNetwork> {
    let mut reader = LineReader::new(text);

    let header = reader.sizes()?;
    if header.len() < 4 {
        return Err(RhoError::Configuration(
            "nnet header needs numLayers, inputSize, outputSize, maxLayerSize".to_string(),
        ));
    }
    let (num_layers, input_size, output_size, max_layer_size) =
        (header[0], header[1], header[2], header[3]);

    let layer_sizes = reader.sizes()?;
    if layer_sizes.len() != num_layers + 1 {
        return Err(RhoError::Configuration(format!(
            "expected {} layer sizes, got {}",
            num_layers + 1,
            layer_sizes.len()
        )));
    }
    if layer_sizes[0] != input_size || layer_sizes[num_layers] != output_size {
        return Err(RhoError::Configuration(
            "layer sizes disagree with the header".to_string(),
        ));
    }

    let _symmetric = reader.values()?;
    let input_minimums = reader.values()?;
    let input_maximums = reader.values()?;
    let means = reader.values()?;
    let ranges = reader.values()?;
    if input_minimums.len() != input_size
        || input_maximums.len() != input_size
        || means.len() != input_size + 1
        || ranges.len() != input_size + 1
    {
        return Err(RhoError::Configuration(
            "normalization vectors disagree with the input size".to_string(),
        ));
    }

    let mut weights = Vec::with_capacity(num_layers);
    let mut biases = Vec::with_capacity(num_layers);
    for k in 0..num_layers {
        let rows = layer_sizes[k + 1];
        let cols = layer_sizes[k];
        let mut matrix = Array2::zeros((rows, cols));
        for r in 0..rows {
            let row = reader.values()?;
            if row.len() != cols {
                return Err(RhoError::Configuration(format!(
                    "layer {} weight row {} has {} entries, expected {}",
                    k,
                    r,
                    row.len(),
                    cols
                )));
            }
            for (c, value) in row.into_iter().enumerate() {
                matrix[[r, c]] = value;
            }
        }
        let mut bias = Array1::zeros(rows);
        for r in 0..rows {
            let row = reader.values()?;
            if row.len() != 1 {
                return Err(RhoError::Configuration(format!(
                    "layer {} bias row {} has {} entries, expected 1",
                    k,
                    r,
                    row.len()
                )));
            }
            bias[r] = row[0];
        }
        weights.push(matrix);
        biases.push(bias);
    }

    debug!(
        num_layers,
        input_size, output_size, "parsed nnet network"
    );
    Ok(NnetNetwork {
        num_layers,
        input_size,
        output_size,
        max_layer_size,
        layer_sizes,
        input_minimums,
        input_maximums,
        input_means: means[..input_size].to_vec(),
        input_ranges: ranges[..input_size].to_vec(),
        output_mean: means[input_size],
        output_range: ranges[input_size],
        weights,
        biases,
    })
}

/// Load an NNet file from disk.
pub fn load_nnet<P: AsRef<Path>>(path: P) -> Result<NnetNetwork> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        RhoError::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    let network = parse_nnet(&text)?;
    info!(
        path = %path.display(),
        layers = network.num_layers,
        inputs = network.input_size,
        outputs = network.output_size,
        "loaded nnet model"
    );
    Ok(network)
}

impl NnetNetwork {
    /// Evaluate on an input vector. With `normalize`, inputs are clamped to
    /// the stored box and normalized, and the output is denormalized.
    pub fn evaluate(&self, input: &[f64], normalize: bool) -> Result<Vec<f64>> {
        if input.len() != self.input_size {
            return Err(RhoError::ShapeMismatch {
                expected: self.input_size,
                got: input.len(),
            });
        }
        let mut x: Vec<f64> = if normalize {
            input
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let clamped = v.clamp(self.input_minimums[i], self.input_maximums[i]);
                    (clamped - self.input_means[i]) / self.input_ranges[i]
                })
                .collect()
        } else {
            input.to_vec()
        };

        for (k, (weights, bias)) in self.weights.iter().zip(&self.biases).enumerate() {
            let mut y = vec![0.0; weights.nrows()];
            for (t, row) in weights.rows().into_iter().enumerate() {
                y[t] = row.iter().zip(&x).map(|(&w, &v)| w * v).sum::<f64>() + bias[t];
            }
            if k < self.num_layers - 1 {
                for v in &mut y {
                    *v = v.max(0.0);
                }
            }
            x = y;
        }

        if normalize {
            for v in &mut x {
                *v = *v * self.output_range + self.output_mean;
            }
        }
        Ok(x)
    }

    /// The input box after normalization.
    pub fn normalized_input_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let lower = self
            .input_minimums
            .iter()
            .zip(&self.input_means)
            .zip(&self.input_ranges)
            .map(|((&min, &mean), &range)| (min - mean) / range)
            .collect();
        let upper = self
            .input_maximums
            .iter()
            .zip(&self.input_means)
            .zip(&self.input_ranges)
            .map(|((&max, &mean), &range)| (max - mean) / range)
            .collect();
        (lower, upper)
    }

    /// Build the canonical layered network: alternating weighted-sum and
    /// ReLU layers, terminal output sum, normalized input box, variables
    /// assigned.
    pub fn to_network(&self) -> Result<NetworkLevelReasoner> {
        let mut nlr = NetworkLevelReasoner::new();
        nlr.add_layer(LayerKind::Input, self.input_size)?;

        for k in 0..self.num_layers {
            let rows = self.layer_sizes[k + 1];
            let last = k == self.num_layers - 1;
            let kind = if last {
                LayerKind::Output
            } else {
                LayerKind::WeightedSum
            };
            let ws_index = nlr.add_layer(kind, rows)?;
            let source = if k == 0 { 0 } else { ws_index - 1 };
            {
                let layer = nlr.layer_mut(ws_index).ok_or_else(|| {
                    RhoError::Configuration("missing freshly added layer".to_string())
                })?;
                layer.add_source(source, self.layer_sizes[k])?;
                for t in 0..rows {
                    layer.set_bias(t, self.biases[k][t]);
                    for s in 0..self.layer_sizes[k] {
                        let w = self.weights[k][[t, s]];
                        if w != 0.0 {
                            layer.set_weight(source, s, t, w)?;
                        }
                    }
                }
            }
            if !last {
                let relu_index = nlr.add_layer(LayerKind::Relu, rows)?;
                let layer = nlr.layer_mut(relu_index).ok_or_else(|| {
                    RhoError::Configuration("missing freshly added layer".to_string())
                })?;
                for t in 0..rows {
                    layer.add_activation_source(ws_index, t, t)?;
                }
            }
        }

        nlr.assign_variables();
        let (lower, upper) = self.normalized_input_bounds();
        nlr.set_input_bounds(&lower, &upper)?;
        Ok(nlr)
    }

    /// The equivalent flat query, input box included.
    pub fn input_query(&self) -> Result<InputQuery> {
        self.to_network()?.generate_query()
    }
}
