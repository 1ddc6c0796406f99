//! The flat query representation handed to the solving engine: variables
//! with optional bounds, linear equations, piecewise-linear constraints,
//! input/output markings, and optionally the network that generated it.

use crate::relu::ReluConstraint;
use crate::NetworkLevelReasoner;
use rho_core::Bound;
use std::collections::BTreeMap;

/// A linear equation sum(a_i * x_i) = c.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Equation {
    addends: Vec<(f64, usize)>,
    scalar: f64,
    auxiliary: Option<usize>,
}

impl Equation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_addend(&mut self, coefficient: f64, variable: usize) {
        self.addends.push((coefficient, variable));
    }

    pub fn set_scalar(&mut self, scalar: f64) {
        self.scalar = scalar;
    }

    #[inline]
    pub fn scalar(&self) -> f64 {
        self.scalar
    }

    #[inline]
    pub fn addends(&self) -> &[(f64, usize)] {
        &self.addends
    }

    /// Flag one of the equation's variables as engine-provisioned auxiliary.
    pub fn mark_auxiliary_variable(&mut self, variable: usize) {
        self.auxiliary = Some(variable);
    }

    #[inline]
    pub fn auxiliary_variable(&self) -> Option<usize> {
        self.auxiliary
    }

    /// Left-hand-side value under an assignment; `None` if any participating
    /// variable is unassigned.
    pub fn evaluate(&self, assignment: &BTreeMap<usize, f64>) -> Option<f64> {
        let mut acc = 0.0;
        for &(coefficient, variable) in &self.addends {
            acc += coefficient * assignment.get(&variable)?;
        }
        Some(acc)
    }

    pub fn update_variable_index(&mut self, old: usize, new: usize) {
        for (_, variable) in &mut self.addends {
            if *variable == old {
                *variable = new;
            }
        }
        if self.auxiliary == Some(old) {
            self.auxiliary = Some(new);
        }
    }
}

/// An input query: the boundary record between the driver and the engine.
#[derive(Debug, Clone, Default)]
pub struct InputQuery {
    num_variables: usize,
    lower_bounds: BTreeMap<usize, f64>,
    upper_bounds: BTreeMap<usize, f64>,
    equations: Vec<Equation>,
    relu_constraints: Vec<ReluConstraint>,
    input_variables: Vec<usize>,
    output_variables: Vec<usize>,
    assignment: BTreeMap<usize, f64>,
    network: Option<Box<NetworkLevelReasoner>>,
}

impl InputQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_num_variables(&mut self, n: usize) {
        self.num_variables = n;
    }

    #[inline]
    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    pub fn set_lower_bound(&mut self, variable: usize, bound: f64) {
        self.lower_bounds.insert(variable, bound);
    }

    pub fn set_upper_bound(&mut self, variable: usize, bound: f64) {
        self.upper_bounds.insert(variable, bound);
    }

    pub fn lower_bound(&self, variable: usize) -> Option<f64> {
        self.lower_bounds.get(&variable).copied()
    }

    pub fn upper_bound(&self, variable: usize) -> Option<f64> {
        self.upper_bounds.get(&variable).copied()
    }

    /// Both bounds, with missing sides reading as infinite.
    pub fn bound(&self, variable: usize) -> Bound {
        Bound {
            lower: self.lower_bound(variable).unwrap_or(f64::NEG_INFINITY),
            upper: self.upper_bound(variable).unwrap_or(f64::INFINITY),
        }
    }

    pub fn add_equation(&mut self, equation: Equation) {
        self.equations.push(equation);
    }

    #[inline]
    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn add_relu_constraint(&mut self, constraint: ReluConstraint) {
        self.relu_constraints.push(constraint);
    }

    #[inline]
    pub fn relu_constraints(&self) -> &[ReluConstraint] {
        &self.relu_constraints
    }

    pub fn relu_constraints_mut(&mut self) -> &mut [ReluConstraint] {
        &mut self.relu_constraints
    }

    pub fn mark_input_variable(&mut self, variable: usize) {
        self.input_variables.push(variable);
    }

    pub fn mark_output_variable(&mut self, variable: usize) {
        self.output_variables.push(variable);
    }

    #[inline]
    pub fn input_variables(&self) -> &[usize] {
        &self.input_variables
    }

    #[inline]
    pub fn output_variables(&self) -> &[usize] {
        &self.output_variables
    }

    /// Record a variable's value in the extracted solution.
    pub fn set_assignment(&mut self, variable: usize, value: f64) {
        self.assignment.insert(variable, value);
    }

    pub fn assignment(&self, variable: usize) -> Option<f64> {
        self.assignment.get(&variable).copied()
    }

    pub fn assignments(&self) -> &BTreeMap<usize, f64> {
        &self.assignment
    }

    pub fn attach_network(&mut self, network: NetworkLevelReasoner) {
        self.network = Some(Box::new(network));
    }

    pub fn network(&self) -> Option<&NetworkLevelReasoner> {
        self.network.as_deref()
    }

    pub fn network_mut(&mut self) -> Option<&mut NetworkLevelReasoner> {
        self.network.as_deref_mut()
    }
}
