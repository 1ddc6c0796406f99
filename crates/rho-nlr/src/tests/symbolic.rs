//! Symbolic bound propagation tests.

use crate::{BoundTable, LayerKind, NetworkLevelReasoner};
use rho_core::Tightening;

/// The linear net of the symbolic scenario: both ReLUs stay active over the
/// box [4, 6] x [1, 5], so symbolic composition is exact while interval
/// arithmetic loses the correlation between the two hidden neurons.
fn linear_network() -> NetworkLevelReasoner {
    let mut nlr = NetworkLevelReasoner::new();
    nlr.add_layer(LayerKind::Input, 2).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 2).unwrap();
    nlr.add_layer(LayerKind::Relu, 2).unwrap();
    nlr.add_layer(LayerKind::Output, 1).unwrap();

    {
        let layer = nlr.layer_mut(1).unwrap();
        layer.add_source(0, 2).unwrap();
        layer.set_weight(0, 0, 0, 2.0).unwrap();
        layer.set_weight(0, 0, 1, 1.0).unwrap();
        layer.set_weight(0, 1, 0, 3.0).unwrap();
        layer.set_weight(0, 1, 1, 1.0).unwrap();
    }
    {
        let layer = nlr.layer_mut(2).unwrap();
        layer.add_activation_source(1, 0, 0).unwrap();
        layer.add_activation_source(1, 1, 1).unwrap();
    }
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 2).unwrap();
        layer.set_weight(2, 0, 0, 1.0).unwrap();
        layer.set_weight(2, 1, 0, -1.0).unwrap();
    }

    assert_eq!(nlr.assign_variables(), 7);
    nlr
}

fn seeded_table() -> BoundTable {
    let large = 1_000_000.0;
    let mut table = BoundTable::new();
    for v in 0..7 {
        table.set_lower_bound(v, -large);
        table.set_upper_bound(v, large);
    }
    table.set_lower_bound(0, 4.0);
    table.set_upper_bound(0, 6.0);
    table.set_lower_bound(1, 1.0);
    table.set_upper_bound(1, 5.0);
    table
}

#[test]
fn test_symbolic_bound_tightening() {
    let mut nlr = linear_network();
    nlr.obtain_bounds(&seeded_table());
    nlr.symbolic_propagation();

    // x2 = 2 x0 + 3 x1 in [11, 27]; x3 = x0 + x1 in [5, 11]; both ReLUs
    // active so bounds survive the activations; the output composes to
    // x0 + 2 x1 in [6, 16].
    let mut bounds = Vec::new();
    nlr.collect_tightenings(&mut bounds);

    let expected = vec![
        Tightening::lower(2, 11.0),
        Tightening::upper(2, 27.0),
        Tightening::lower(3, 5.0),
        Tightening::upper(3, 11.0),
        Tightening::lower(4, 11.0),
        Tightening::upper(4, 27.0),
        Tightening::lower(5, 5.0),
        Tightening::upper(5, 11.0),
        Tightening::lower(6, 6.0),
        Tightening::upper(6, 16.0),
    ];
    assert_eq!(bounds.len(), expected.len());
    for tightening in &expected {
        assert!(
            bounds.contains(tightening),
            "missing tightening {:?}",
            tightening
        );
    }
}

#[test]
fn test_symbolic_tighter_than_interval_on_linear_net() {
    let mut interval_nlr = linear_network();
    interval_nlr.obtain_bounds(&seeded_table());
    interval_nlr.interval_propagation();

    let mut symbolic_nlr = linear_network();
    symbolic_nlr.obtain_bounds(&seeded_table());
    symbolic_nlr.symbolic_propagation();

    // Interval arithmetic forgets that both hidden neurons grow with the
    // inputs and reports [11 - 11, 27 - 5] = [0, 22] for the output.
    let output = interval_nlr.layer(3).unwrap();
    assert_eq!((output.lb(0), output.ub(0)), (0.0, 22.0));

    let output = symbolic_nlr.layer(3).unwrap();
    assert_eq!((output.lb(0), output.ub(0)), (6.0, 16.0));

    // Symbolic never loses to interval arithmetic at any neuron.
    for (il, sl) in interval_nlr.layers().zip(symbolic_nlr.layers()) {
        for neuron in 0..il.size() {
            assert!(sl.lb(neuron) >= il.lb(neuron));
            assert!(sl.ub(neuron) <= il.ub(neuron));
        }
    }
}

#[test]
fn test_symbolic_crossing_relu_relaxation() {
    let mut nlr = NetworkLevelReasoner::new();
    nlr.add_layer(LayerKind::Input, 1).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 1).unwrap();
    nlr.add_layer(LayerKind::Relu, 1).unwrap();
    nlr.add_layer(LayerKind::Output, 1).unwrap();
    {
        let layer = nlr.layer_mut(1).unwrap();
        layer.add_source(0, 1).unwrap();
        layer.set_weight(0, 0, 0, 1.0).unwrap();
    }
    nlr.layer_mut(2)
        .unwrap()
        .add_activation_source(1, 0, 0)
        .unwrap();
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 1).unwrap();
        layer.set_weight(2, 0, 0, 1.0).unwrap();
    }
    nlr.assign_variables();
    nlr.set_input_bounds(&[-1.0], &[1.0]).unwrap();

    nlr.symbolic_propagation();

    // The pre-activation crosses zero; the relaxation caps the ReLU output
    // by the chord value u = 1 and floors it at 0.
    let relu = nlr.layer(2).unwrap();
    assert_eq!((relu.lb(0), relu.ub(0)), (0.0, 1.0));
    let output = nlr.layer(3).unwrap();
    assert_eq!((output.lb(0), output.ub(0)), (0.0, 1.0));
}

#[test]
fn test_symbolic_inactive_relu_zeroes_out() {
    let mut nlr = NetworkLevelReasoner::new();
    nlr.add_layer(LayerKind::Input, 1).unwrap();
    nlr.add_layer(LayerKind::WeightedSum, 1).unwrap();
    nlr.add_layer(LayerKind::Relu, 1).unwrap();
    nlr.add_layer(LayerKind::Output, 1).unwrap();
    {
        let layer = nlr.layer_mut(1).unwrap();
        layer.add_source(0, 1).unwrap();
        layer.set_weight(0, 0, 0, 1.0).unwrap();
        layer.set_bias(0, -10.0);
    }
    nlr.layer_mut(2)
        .unwrap()
        .add_activation_source(1, 0, 0)
        .unwrap();
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 1).unwrap();
        layer.set_weight(2, 0, 0, 5.0).unwrap();
    }
    nlr.assign_variables();
    nlr.set_input_bounds(&[-1.0], &[1.0]).unwrap();

    nlr.symbolic_propagation();

    let relu = nlr.layer(2).unwrap();
    assert_eq!((relu.lb(0), relu.ub(0)), (0.0, 0.0));
    let output = nlr.layer(3).unwrap();
    assert_eq!((output.lb(0), output.ub(0)), (0.0, 0.0));
}
