//! The ReLU piecewise-linear constraint: f = max(0, b).
//!
//! The constraint participates in the engine's watcher protocol: it is told
//! about assignments and bound changes on its two variables, tracks a phase
//! (undetermined / active / inactive), reports fix candidates on violation,
//! and emits case splits on request. Constraint flavors are tagged by
//! activation kind rather than subtyped; ReLU is currently the only one.

use crate::query::Equation;
use crate::tableau::WatchRegistrar;
use rho_core::{float, Result, RhoError, Tightening};
use std::collections::BTreeMap;

/// Activation kind tag for piecewise-linear constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
}

/// Phase of a piecewise-linear constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Undetermined,
    Active,
    Inactive,
}

/// A proposed repair: set `variable` to `value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub variable: usize,
    pub value: f64,
}

/// One branch of a case split: bound tightenings plus equations, possibly
/// binding an engine-provisioned auxiliary variable.
#[derive(Debug, Clone, Default)]
pub struct CaseSplit {
    tightenings: Vec<Tightening>,
    equations: Vec<Equation>,
}

impl CaseSplit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_bound_tightening(&mut self, tightening: Tightening) {
        self.tightenings.push(tightening);
    }

    pub fn add_equation(&mut self, equation: Equation) {
        self.equations.push(equation);
    }

    pub fn bound_tightenings(&self) -> &[Tightening] {
        &self.tightenings
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }
}

/// Saved watcher state, for engine backtracking.
#[derive(Debug, Clone)]
pub struct ReluConstraintState {
    active: bool,
    assignment: BTreeMap<usize, f64>,
    phase: Phase,
}

/// f = max(0, b) over two query variables.
#[derive(Debug, Clone)]
pub struct ReluConstraint {
    b: usize,
    f: usize,
    active: bool,
    assignment: BTreeMap<usize, f64>,
    phase: Phase,
}

impl ReluConstraint {
    pub fn new(b: usize, f: usize) -> Self {
        Self {
            b,
            f,
            active: true,
            assignment: BTreeMap::new(),
            phase: Phase::Undetermined,
        }
    }

    #[inline]
    pub fn kind(&self) -> ActivationKind {
        ActivationKind::Relu
    }

    #[inline]
    pub fn b(&self) -> usize {
        self.b
    }

    #[inline]
    pub fn f(&self) -> usize {
        self.f
    }

    pub fn participating_variables(&self) -> Vec<usize> {
        vec![self.b, self.f]
    }

    pub fn participates_in(&self, variable: usize) -> bool {
        variable == self.b || variable == self.f
    }

    pub fn register_with(&self, registrar: &mut dyn WatchRegistrar) {
        registrar.watch(self.b);
        registrar.watch(self.f);
    }

    pub fn unregister_from(&self, registrar: &mut dyn WatchRegistrar) {
        registrar.unwatch(self.b);
        registrar.unwatch(self.f);
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn phase_fixed(&self) -> bool {
        self.phase != Phase::Undetermined
    }

    pub fn notify_value(&mut self, variable: usize, value: f64) {
        self.assignment.insert(variable, value);
    }

    pub fn notify_lower_bound(&mut self, variable: usize, bound: f64) {
        if variable == self.f && float::is_positive(bound) {
            self.phase = Phase::Active;
        } else if variable == self.b && !float::is_negative(bound) {
            self.phase = Phase::Active;
        }
    }

    pub fn notify_upper_bound(&mut self, variable: usize, bound: f64) {
        if (variable == self.f || variable == self.b) && !float::is_positive(bound) {
            self.phase = Phase::Inactive;
        }
    }

    fn value_of(&self, variable: usize) -> Result<f64> {
        self.assignment
            .get(&variable)
            .copied()
            .ok_or(RhoError::MissingAssignment { variable })
    }

    /// Check f >= 0 and (f = b or b <= 0) on the current assignment.
    pub fn satisfied(&self) -> Result<bool> {
        let b_value = self.value_of(self.b)?;
        let f_value = self.value_of(self.f)?;

        if float::is_negative(f_value) {
            return Ok(false);
        }
        if float::is_positive(f_value) {
            Ok(float::are_equal(b_value, f_value))
        } else {
            Ok(!float::is_positive(b_value))
        }
    }

    /// Up to two candidate repairs for a violated constraint.
    pub fn possible_fixes(&self) -> Result<Vec<Fix>> {
        let b_value = self.value_of(self.b)?;
        let f_value = self.value_of(self.f)?;

        let mut fixes = Vec::with_capacity(2);
        // Violations: f positive and disequal to a positive b; f positive
        // over a non-positive b; f zero under a positive b.
        if float::is_positive(f_value) {
            if float::is_positive(b_value) {
                fixes.push(Fix {
                    variable: self.b,
                    value: f_value,
                });
                fixes.push(Fix {
                    variable: self.f,
                    value: b_value,
                });
            } else {
                fixes.push(Fix {
                    variable: self.b,
                    value: f_value,
                });
                fixes.push(Fix {
                    variable: self.f,
                    value: 0.0,
                });
            }
        } else {
            fixes.push(Fix {
                variable: self.b,
                value: 0.0,
            });
            fixes.push(Fix {
                variable: self.f,
                value: b_value,
            });
        }
        Ok(fixes)
    }

    /// Active phase: b >= 0 and b - f = 0, routed through the auxiliary.
    fn active_split(&self, aux: usize) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.store_bound_tightening(Tightening::lower(self.b, 0.0));
        let mut equation = Equation::new();
        equation.add_addend(1.0, self.b);
        equation.add_addend(-1.0, self.f);
        equation.add_addend(1.0, aux);
        equation.mark_auxiliary_variable(aux);
        equation.set_scalar(0.0);
        split.add_equation(equation);
        split.store_bound_tightening(Tightening::lower(aux, 0.0));
        split.store_bound_tightening(Tightening::upper(aux, 0.0));
        split
    }

    /// Inactive phase: b <= 0 and f = 0.
    fn inactive_split(&self, aux: usize) -> CaseSplit {
        let mut split = CaseSplit::new();
        split.store_bound_tightening(Tightening::upper(self.b, 0.0));
        let mut equation = Equation::new();
        equation.add_addend(1.0, self.f);
        equation.add_addend(1.0, aux);
        equation.mark_auxiliary_variable(aux);
        equation.set_scalar(0.0);
        split.add_equation(equation);
        split.store_bound_tightening(Tightening::lower(aux, 0.0));
        split.store_bound_tightening(Tightening::upper(aux, 0.0));
        split
    }

    /// The splits to branch on. A phase-fixed constraint returns its single
    /// valid split; otherwise active first, then inactive.
    pub fn case_splits(&self, aux: usize) -> Vec<CaseSplit> {
        match self.phase {
            Phase::Undetermined => vec![self.active_split(aux), self.inactive_split(aux)],
            Phase::Active => vec![self.active_split(aux)],
            Phase::Inactive => vec![self.inactive_split(aux)],
        }
    }

    /// The split implied by a fixed phase.
    pub fn valid_split(&self, aux: usize) -> Result<CaseSplit> {
        match self.phase {
            Phase::Active => Ok(self.active_split(aux)),
            Phase::Inactive => Ok(self.inactive_split(aux)),
            Phase::Undetermined => Err(RhoError::Configuration(
                "valid split requested from an unfixed constraint".to_string(),
            )),
        }
    }

    pub fn store_state(&self) -> ReluConstraintState {
        ReluConstraintState {
            active: self.active,
            assignment: self.assignment.clone(),
            phase: self.phase,
        }
    }

    pub fn restore_state(&mut self, state: &ReluConstraintState) {
        self.active = state.active;
        self.assignment = state.assignment.clone();
        self.phase = state.phase;
    }

    pub fn update_variable_index(&mut self, old: usize, new: usize) {
        if self.b == old {
            self.b = new;
        }
        if self.f == old {
            self.f = new;
        }
        if let Some(value) = self.assignment.remove(&old) {
            self.assignment.insert(new, value);
        }
    }
}
