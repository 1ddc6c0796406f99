//! Abstraction construction, soundness, and refinement tests.

use super::{deep_network, grid_inputs, two_block_network};
use crate::{preprocess, Abstraction, Monotonicity};
use proptest::prelude::*;
use rho_nlr::{LayerKind, NetworkLevelReasoner};

fn abstraction_of(nlr: &NetworkLevelReasoner) -> Abstraction {
    Abstraction::new(preprocess(nlr).unwrap()).unwrap()
}

/// Split every group down to singletons, one member at a time.
fn refine_fully(abstraction: &mut Abstraction) {
    loop {
        let mut target = None;
        'outer: for (b, block) in abstraction.blocks().iter().enumerate() {
            for (g, group) in block.groups().iter().enumerate() {
                if group.members().len() > 1 {
                    target = Some((b, g, group.members()[0]));
                    break 'outer;
                }
            }
        }
        match target {
            Some((b, g, m)) => abstraction.refine(b, g, m).unwrap(),
            None => break,
        }
    }
    assert!(abstraction.is_fully_refined());
}

#[test]
fn test_initial_abstraction_sizes() {
    let abstraction = abstraction_of(&deep_network());
    let network = abstraction.network().unwrap();

    let sizes: Vec<usize> = network.layers().map(|l| l.size()).collect();
    // The first hidden block keeps its 4x width; every later block
    // collapses to one neuron per role class.
    assert_eq!(sizes, vec![2, 8, 8, 4, 4, 4, 4, 1]);
}

#[test]
fn test_single_block_network_is_already_refined() {
    let mut nlr = NetworkLevelReasoner::new();
    nlr.add_layer(LayerKind::Input, 1).unwrap();
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
        let layer = nlr.layer_mut(2).unwrap();
        layer.add_activation_source(1, 0, 0).unwrap();
        layer.add_activation_source(1, 1, 1).unwrap();
    }
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 2).unwrap();
        layer.set_weight(2, 0, 0, 2.0).unwrap();
        layer.set_weight(2, 1, 0, 1.0).unwrap();
    }
    nlr.assign_variables();
    nlr.set_input_bounds(&[-1.0], &[1.0]).unwrap();

    let abstraction = abstraction_of(&nlr);
    assert!(abstraction.blocks().is_empty());
    assert!(abstraction.is_fully_refined());

    // With nothing to collapse, the abstract network is the preprocessed
    // network.
    let mut network = abstraction.network().unwrap();
    let mut preprocessed = abstraction.preprocessed().clone();
    let sizes: Vec<usize> = network.layers().map(|l| l.size()).collect();
    assert_eq!(sizes, vec![1, 8, 8, 1]);
    for input in grid_inputs(1, 8) {
        assert_eq!(
            network.evaluate(&input).unwrap(),
            preprocessed.evaluate(&input).unwrap()
        );
    }
}

#[test]
fn test_abstract_bias_takes_class_extremum() {
    let abstraction = abstraction_of(&deep_network());
    let network = abstraction.network().unwrap();

    // Block 0 merges the copies of layer 3, original biases (0.1, -0.2,
    // 0.3): INC classes round up to 0.3, DEC classes down to -0.2. Groups
    // sit in role order PosInc, PosDec, NegDec, NegInc.
    let layer = network.layer(3).unwrap();
    assert_eq!(layer.bias(0), 0.3);
    assert_eq!(layer.bias(1), -0.2);
    assert_eq!(layer.bias(2), -0.2);
    assert_eq!(layer.bias(3), 0.3);
}

#[test]
fn test_group_partition_covers_layer() {
    let abstraction = abstraction_of(&deep_network());

    for block in abstraction.blocks() {
        let size = abstraction
            .preprocessed()
            .layer(block.ws_layer())
            .unwrap()
            .size();
        let mut seen = vec![false; size];
        for group in block.groups() {
            for &member in group.members() {
                assert!(!seen[member], "neuron {} in two groups", member);
                seen[member] = true;
                assert_eq!(member % 4, group.role().copy_offset());
            }
        }
        assert!(seen.iter().all(|&s| s));
    }
}

#[test]
fn test_abstraction_soundness_on_grid() {
    let abstraction = abstraction_of(&deep_network());
    let mut abstract_network = abstraction.network().unwrap();
    let mut concrete = abstraction.preprocessed().clone();

    // Output neurons are POS_INC, so the abstract output dominates from
    // above at every point of the box.
    for input in grid_inputs(2, 8) {
        let abstract_out = abstract_network.evaluate(&input).unwrap();
        let concrete_out = concrete.evaluate(&input).unwrap();
        assert!(
            abstract_out[0] >= concrete_out[0] - 1e-9,
            "abstraction undercut concrete at {:?}: {} < {}",
            input,
            abstract_out[0],
            concrete_out[0]
        );
    }
}

#[test]
fn test_soundness_preserved_under_refinement() {
    let mut abstraction = abstraction_of(&deep_network());
    let mut concrete = abstraction.preprocessed().clone();

    // Split one member out of each block's first splittable group, then
    // re-check domination.
    let first_member = abstraction.blocks()[0].groups()[0].members()[0];
    abstraction.refine(0, 0, first_member).unwrap();
    let dec_member = abstraction.blocks()[0].groups()[2].members()[1];
    abstraction.refine(0, 2, dec_member).unwrap();

    let mut abstract_network = abstraction.network().unwrap();
    for input in grid_inputs(2, 8) {
        let abstract_out = abstract_network.evaluate(&input).unwrap();
        let concrete_out = concrete.evaluate(&input).unwrap();
        assert!(abstract_out[0] >= concrete_out[0] - 1e-9);
    }
}

#[test]
fn test_full_refinement_recovers_preprocessed_semantics() {
    let mut abstraction = abstraction_of(&deep_network());
    refine_fully(&mut abstraction);

    let mut abstract_network = abstraction.network().unwrap();
    let mut concrete = abstraction.preprocessed().clone();

    let abstract_sizes: Vec<usize> = abstract_network.layers().map(|l| l.size()).collect();
    let concrete_sizes: Vec<usize> = concrete.layers().map(|l| l.size()).collect();
    assert_eq!(abstract_sizes, concrete_sizes);

    // Fully refined groups reconstruct the concrete weights; the neurons
    // are permuted within each layer, so sums re-associate and only agree
    // up to round-off.
    for input in grid_inputs(2, 6) {
        let a = abstract_network.evaluate(&input).unwrap();
        let c = concrete.evaluate(&input).unwrap();
        for (x, y) in a.iter().zip(c.iter()) {
            assert!((x - y).abs() < 1e-9, "{} != {} at {:?}", x, y, input);
        }
    }
}

#[test]
fn test_refine_rejects_bad_targets() {
    let mut abstraction = abstraction_of(&deep_network());

    assert!(abstraction.refine(9, 0, 0).is_err());
    assert!(abstraction.refine(0, 9, 0).is_err());
    // Member 1 is a POS_DEC copy, never in the POS_INC group.
    assert!(abstraction.refine(0, 0, 1).is_err());

    let member = abstraction.blocks()[0].groups()[0].members()[0];
    abstraction.refine(0, 0, member).unwrap();
    // The singleton that was split out cannot be split again.
    assert!(abstraction.refine(0, 0, member).is_err());
}

#[test]
fn test_refinement_monotonically_tightens_at_a_point() {
    let mut abstraction = abstraction_of(&two_block_network());
    let mut concrete = abstraction.preprocessed().clone();
    let input = vec![0.75];
    let concrete_out = concrete.evaluate(&input).unwrap()[0];

    let mut previous = abstraction
        .network()
        .unwrap()
        .evaluate(&input)
        .unwrap()[0];
    assert!(previous >= concrete_out - 1e-9);

    while !abstraction.is_fully_refined() {
        let mut target = None;
        'outer: for (b, block) in abstraction.blocks().iter().enumerate() {
            for (g, group) in block.groups().iter().enumerate() {
                if group.members().len() > 1 {
                    target = Some((b, g, group.members()[0]));
                    break 'outer;
                }
            }
        }
        let (b, g, m) = target.unwrap();
        abstraction.refine(b, g, m).unwrap();

        let refined = abstraction
            .network()
            .unwrap()
            .evaluate(&input)
            .unwrap()[0];
        // Still sound, and the gap can only close as resolution grows
        // toward the concrete network.
        assert!(refined >= concrete_out - 1e-9);
        previous = refined;
    }
    assert!((previous - concrete_out).abs() < 1e-9);
}

fn random_two_block(params: &[f64; 13]) -> NetworkLevelReasoner {
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
        layer.set_weight(0, 0, 0, params[0]).unwrap();
        layer.set_weight(0, 0, 1, params[1]).unwrap();
        layer.set_bias(0, params[2]);
        layer.set_bias(1, params[3]);
    }
    {
        let layer = nlr.layer_mut(3).unwrap();
        layer.add_source(2, 2).unwrap();
        layer.set_weight(2, 0, 0, params[4]).unwrap();
        layer.set_weight(2, 1, 0, params[5]).unwrap();
        layer.set_weight(2, 0, 1, params[6]).unwrap();
        layer.set_weight(2, 1, 1, params[7]).unwrap();
        layer.set_bias(0, params[8]);
        layer.set_bias(1, params[9]);
    }
    {
        let layer = nlr.layer_mut(5).unwrap();
        layer.add_source(4, 2).unwrap();
        layer.set_weight(4, 0, 0, params[10]).unwrap();
        layer.set_weight(4, 1, 0, params[11]).unwrap();
        layer.set_bias(0, params[12]);
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

proptest! {
    #[test]
    fn prop_abstraction_dominates_concrete(
        params in proptest::array::uniform13(-2.0f64..2.0),
        inputs in proptest::collection::vec(-1.0f64..1.0, 1..6),
    ) {
        let nlr = random_two_block(&params);
        let abstraction = Abstraction::new(preprocess(&nlr).unwrap()).unwrap();
        let mut abstract_network = abstraction.network().unwrap();
        let mut concrete = abstraction.preprocessed().clone();
        for x in inputs {
            let a = abstract_network.evaluate(&[x]).unwrap()[0];
            let c = concrete.evaluate(&[x]).unwrap()[0];
            prop_assert!(
                a >= c - 1e-6,
                "abstract {} undercut concrete {} at {}", a, c, x
            );
        }
    }
}

#[test]
fn test_group_roles_follow_monotonicity() {
    let abstraction = abstraction_of(&deep_network());
    for block in abstraction.blocks() {
        for group in block.groups() {
            match group.role().monotonicity() {
                Monotonicity::Inc | Monotonicity::Dec => {}
            }
        }
        assert_eq!(block.groups().len(), 4);
    }
}
