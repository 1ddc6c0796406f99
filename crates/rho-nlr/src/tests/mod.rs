//! Scenario suites for the network-level reasoner.

mod symbolic;

use crate::{LayerKind, NetworkLevelReasoner};

/// The two-input trivial ReLU net used across the suites:
///
/// ```text
///       a
/// x           d    f
///       b
/// y           e    g
///       c
/// ```
///
/// Layers: input 2, weighted-sum 3, ReLU 3, weighted-sum 2, ReLU 2,
/// output weighted-sum 2. Variables 0..13 in layer-walk order.
pub(crate) fn populate_network() -> NetworkLevelReasoner {
    let mut nlr = NetworkLevelReasoner::new();

    nlr.add_layer(LayerKind::Input, 2).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 3).unwrap();
    nlr.add_layer(LayerKind::Relu, 3).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 2).unwrap();
    nlr.add_layer(LayerKind::Relu, 2).unwrap();
    nlr.add_layer(LayerKind::Output, 2).unwrap();

    {
        let layer = nlr.layer_mut(1).unwrap();
        layer.add_source(0, 2).unwrap();
        layer.set_weight(0, 0, 0, 1.0).unwrap();
        layer.set_weight(0, 0, 1, 2.0).unwrap();
        layer.set_weight(0, 1, 1, -3.0).unwrap();
        layer.set_weight(0, 1, 2, 1.0).unwrap();
        layer.set_bias(0, 1.0);
    }
    {
        let layer = nlr.layer_mut(2).unwrap();
        for i in 0..3 {
            layer.add_activation_source(1, i, i).unwrap();
        }
    }
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 3).unwrap();
        layer.set_weight(2, 0, 0, 1.0).unwrap();
        layer.set_weight(2, 0, 1, -1.0).unwrap();
        layer.set_weight(2, 1, 0, 1.0).unwrap();
        layer.set_weight(2, 1, 1, 1.0).unwrap();
        layer.set_weight(2, 2, 0, -1.0).unwrap();
        layer.set_weight(2, 2, 1, -1.0).unwrap();
        layer.set_bias(1, 2.0);
    }
    {
        let layer = nlr.layer_mut(4).unwrap();
        for i in 0..2 {
            layer.add_activation_source(3, i, i).unwrap();
        }
    }
    {
        let layer = nlr.layer_mut(5).unwrap();
        layer.add_source(4, 2).unwrap();
        layer.set_weight(4, 0, 0, 1.0).unwrap();
        layer.set_weight(4, 0, 1, 1.0).unwrap();
        layer.set_weight(4, 1, 1, 3.0).unwrap();
    }

    let count = nlr.assign_variables();
    assert_eq!(count, 14);
    nlr
}
