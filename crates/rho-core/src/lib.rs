//! Core types for ρ-CEGAR neural network verification.
//!
//! This crate provides the foundational scalar types shared by the
//! network-level reasoner and the abstraction-refinement driver: interval
//! bounds, neuron addressing, bound tightenings, tolerance-aware float
//! comparisons, and the common error type.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub mod float;

/// A bound on a scalar value: [lower, upper].
///
/// Endpoints may be infinite; an unbounded variable is `Bound::unbounded()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    /// Create a new bound.
    #[inline]
    pub fn new(lower: f64, upper: f64) -> Self {
        debug_assert!(lower <= upper, "Invalid bound: {lower} > {upper}");
        Self { lower, upper }
    }

    /// Create a concrete (point) bound.
    #[inline]
    pub fn concrete(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// The whole real line.
    #[inline]
    pub fn unbounded() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Check if this bound contains a value.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// Width of the bound interval.
    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Check if bounds have exploded to infinity.
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.lower.is_infinite() || self.upper.is_infinite()
    }

    /// Intersect two bounds. `None` if they are disjoint.
    #[inline]
    pub fn intersect(&self, other: &Bound) -> Option<Bound> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        if lower <= upper {
            Some(Bound { lower, upper })
        } else {
            None
        }
    }

    /// Union of two bounds (convex hull).
    #[inline]
    pub fn union(&self, other: &Bound) -> Bound {
        Bound {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }
}

impl From<RangeInclusive<f64>> for Bound {
    fn from(range: RangeInclusive<f64>) -> Self {
        Self::new(*range.start(), *range.end())
    }
}

/// Address of a neuron: (layer index, neuron index within the layer).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NeuronIndex {
    pub layer: usize,
    pub neuron: usize,
}

impl NeuronIndex {
    #[inline]
    pub fn new(layer: usize, neuron: usize) -> Self {
        Self { layer, neuron }
    }
}

impl std::fmt::Display for NeuronIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.layer, self.neuron)
    }
}

/// Which side of a variable's interval a tightening applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundKind {
    Lower,
    Upper,
}

/// A discovered bound improvement on a query variable.
///
/// Propagation passes emit these into a sink; the consumer (an engine's
/// tableau, or a test harness) decides how to apply them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tightening {
    pub variable: usize,
    pub value: f64,
    pub kind: BoundKind,
}

impl Tightening {
    #[inline]
    pub fn lower(variable: usize, value: f64) -> Self {
        Self {
            variable,
            value,
            kind: BoundKind::Lower,
        }
    }

    #[inline]
    pub fn upper(variable: usize, value: f64) -> Self {
        Self {
            variable,
            value,
            kind: BoundKind::Upper,
        }
    }
}

/// Error type for ρ-CEGAR operations.
#[derive(Debug)]
pub enum RhoError {
    /// Malformed topology: missing bias/weight/activation source, wrong
    /// layer kind, unknown source layer. Fatal to the current query.
    Configuration(String),

    /// Input/output vector length disagrees with the layer size.
    ShapeMismatch { expected: usize, got: usize },

    /// A constraint was checked before all its variables were assigned;
    /// indicates an engine-protocol bug.
    MissingAssignment { variable: usize },

    /// Activation other than identity/ReLU encountered.
    UnsupportedActivation(String),

    /// The engine returned a status other than SAT/UNSAT/Timeout.
    UnsupportedEngineExit(String),

    /// The engine exceeded its budget; verification result is unknown.
    Timeout,
}

impl std::fmt::Display for RhoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RhoError::Configuration(s) => write!(f, "Configuration error: {}", s),
            RhoError::ShapeMismatch { expected, got } => {
                write!(f, "Shape mismatch: expected {}, got {}", expected, got)
            }
            RhoError::MissingAssignment { variable } => {
                write!(f, "Variable x{} checked before assignment", variable)
            }
            RhoError::UnsupportedActivation(s) => {
                write!(f, "Unsupported activation: {}", s)
            }
            RhoError::UnsupportedEngineExit(s) => {
                write!(f, "Unsupported engine exit code: {}", s)
            }
            RhoError::Timeout => write!(f, "Engine timed out"),
        }
    }
}

impl std::error::Error for RhoError {}

pub type Result<T> = std::result::Result<T, RhoError>;
