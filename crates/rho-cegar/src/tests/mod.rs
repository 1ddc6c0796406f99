//! Suites for preprocessing, abstraction, and the CEGAR loop.

mod abstraction;

use rho_nlr::{LayerKind, NetworkLevelReasoner};

/// The 17-variable deep net: input 2, hidden blocks (2, 2), (3, 3), (2, 2),
/// output 1. The last hidden layer's neurons are variables x14 and x15 and
/// feed the output with weights 1 and -2.
pub(crate) fn deep_network() -> NetworkLevelReasoner {
    let mut nlr = NetworkLevelReasoner::new();
    nlr.add_layer(LayerKind::Input, 2).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 2).unwrap();
    nlr.add_layer(LayerKind::Relu, 2).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 3).unwrap();
    nlr.add_layer(LayerKind::Relu, 3).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 2).unwrap();
    nlr.add_layer(LayerKind::Relu, 2).unwrap();
    nlr.add_layer(LayerKind::Output, 1).unwrap();

    {
        let layer = nlr.layer_mut(1).unwrap();
        layer.add_source(0, 2).unwrap();
        layer.set_weight(0, 0, 0, 1.0).unwrap();
        layer.set_weight(0, 1, 0, -1.0).unwrap();
        layer.set_weight(0, 0, 1, 2.0).unwrap();
        layer.set_weight(0, 1, 1, 0.5).unwrap();
        layer.set_bias(0, 0.5);
        layer.set_bias(1, -0.5);
    }
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 2).unwrap();
        layer.set_weight(2, 0, 0, 1.0).unwrap();
        layer.set_weight(2, 1, 0, -1.0).unwrap();
        layer.set_weight(2, 0, 1, -2.0).unwrap();
        layer.set_weight(2, 1, 1, 1.5).unwrap();
        layer.set_weight(2, 0, 2, 0.5).unwrap();
        layer.set_weight(2, 1, 2, 1.0).unwrap();
        layer.set_bias(0, 0.1);
        layer.set_bias(1, -0.2);
        layer.set_bias(2, 0.3);
    }
    {
        let layer = nlr.layer_mut(5).unwrap();
        layer.add_source(4, 3).unwrap();
        layer.set_weight(4, 0, 0, 1.0).unwrap();
        layer.set_weight(4, 1, 0, -0.5).unwrap();
        layer.set_weight(4, 2, 0, 2.0).unwrap();
        layer.set_weight(4, 0, 1, -1.0).unwrap();
        layer.set_weight(4, 1, 1, 1.0).unwrap();
        layer.set_weight(4, 2, 1, -1.5).unwrap();
        layer.set_bias(0, 0.25);
        layer.set_bias(1, -0.75);
    }
    {
        let layer = nlr.layer_mut(7).unwrap();
        layer.add_source(6, 2).unwrap();
        layer.set_weight(6, 0, 0, 1.0).unwrap();
        layer.set_weight(6, 1, 0, -2.0).unwrap();
        layer.set_bias(0, 0.5);
    }

    for relu in [2usize, 4, 6] {
        let size = nlr.layer(relu).unwrap().size();
        let layer = nlr.layer_mut(relu).unwrap();
        for i in 0..size {
            layer.add_activation_source(relu - 1, i, i).unwrap();
        }
    }

    assert_eq!(nlr.assign_variables(), 17);
    nlr.set_input_bounds(&[-1.0, -1.0], &[1.0, 1.0]).unwrap();
    nlr
}

/// A one-input net with two hidden blocks of width 2; concrete outputs lie
/// in [0, 1] over the box [-1, 1].
pub(crate) fn two_block_network() -> NetworkLevelReasoner {
    let mut nlr = NetworkLevelReasoner::new();
    nlr.add_layer(LayerKind::Input, 1).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 2).unwrap();
    nlr.add_layer(LayerKind::Relu, 2).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 2).unwrap();
    nlr.add_layer(LayerKind::Relu, 2).unwrap();
    nlr.add_layer(LayerKind::Output, 1).unwrap();

    {
        let layer = nlr.layer_mut(1).unwrap();
        layer.add_source(0, 1).unwrap();
        layer.set_weight(0, 0, 0, 1.0).unwrap();
        layer.set_weight(0, 0, 1, -1.0).unwrap();
    }
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 2).unwrap();
        layer.set_weight(2, 0, 0, 1.0).unwrap();
        layer.set_weight(2, 1, 0, 1.0).unwrap();
        layer.set_weight(2, 0, 1, -1.0).unwrap();
        layer.set_weight(2, 1, 1, 0.5).unwrap();
    }
    {
        let layer = nlr.layer_mut(5).unwrap();
        layer.add_source(4, 2).unwrap();
        layer.set_weight(4, 0, 0, 1.0).unwrap();
        layer.set_weight(4, 1, 0, -1.0).unwrap();
    }
    for relu in [2usize, 4] {
        let layer = nlr.layer_mut(relu).unwrap();
        for i in 0..2 {
            layer.add_activation_source(relu - 1, i, i).unwrap();
        }
    }

    nlr.assign_variables();
    nlr.set_input_bounds(&[-1.0], &[1.0]).unwrap();
    nlr
}

/// Sample the input box on a uniform grid.
pub(crate) fn grid_inputs(dims: usize, steps: usize) -> Vec<Vec<f64>> {
    let mut points = vec![vec![]];
    for _ in 0..dims {
        let mut next = Vec::new();
        for point in &points {
            for i in 0..=steps {
                let mut extended = point.clone();
                extended.push(-1.0 + 2.0 * (i as f64) / (steps as f64));
                next.push(extended);
            }
        }
        points = next;
    }
    points
}
