//! Seams toward the engine's tableau: a read-only view of variable bounds
//! and the registration half of the constraint watcher protocol.

use std::collections::{BTreeMap, BTreeSet};

/// Read access to per-variable bounds held elsewhere (typically the
/// engine's simplex tableau). Missing bounds read as infinite.
pub trait VariableBounds {
    fn lower_bound(&self, variable: usize) -> f64;
    fn upper_bound(&self, variable: usize) -> f64;
}

/// Registration half of the watcher protocol: a constraint asks to be told
/// about changes on the variables it participates in.
pub trait WatchRegistrar {
    fn watch(&mut self, variable: usize);
    fn unwatch(&mut self, variable: usize);
}

/// A plain bound store. Stands in for the tableau in tests and in the CLI's
/// propagation commands.
#[derive(Debug, Clone, Default)]
pub struct BoundTable {
    lower: BTreeMap<usize, f64>,
    upper: BTreeMap<usize, f64>,
    watched: BTreeSet<usize>,
}

impl BoundTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lower_bound(&mut self, variable: usize, bound: f64) {
        self.lower.insert(variable, bound);
    }

    pub fn set_upper_bound(&mut self, variable: usize, bound: f64) {
        self.upper.insert(variable, bound);
    }

    pub fn is_watched(&self, variable: usize) -> bool {
        self.watched.contains(&variable)
    }
}

impl VariableBounds for BoundTable {
    fn lower_bound(&self, variable: usize) -> f64 {
        self.lower
            .get(&variable)
            .copied()
            .unwrap_or(f64::NEG_INFINITY)
    }

    fn upper_bound(&self, variable: usize) -> f64 {
        self.upper.get(&variable).copied().unwrap_or(f64::INFINITY)
    }
}

impl WatchRegistrar for BoundTable {
    fn watch(&mut self, variable: usize) {
        self.watched.insert(variable);
    }

    fn unwatch(&mut self, variable: usize) {
        self.watched.remove(&variable);
    }
}
