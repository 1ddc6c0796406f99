//! Neuron roles for the sign × monotonicity expansion.
//!
//! Every intermediate neuron of the preprocessed network is one of four
//! copies of an original neuron, keyed by (sign, monotonicity):
//!
//! - sign: whether the copy carries only non-negative (POS) or only
//!   non-positive (NEG) contribution through its outgoing ReLU edges;
//! - monotonicity: whether increasing the copy's value can only increase
//!   (INC) or only decrease (DEC) the final output.
//!
//! The copy-index convention is fixed: within a quadrupled layer, neuron
//! 4i + c is copy c of original neuron i, with copy 0 = POS_INC,
//! 1 = POS_DEC, 2 = NEG_DEC, 3 = NEG_INC. The output layer is all POS_INC
//! by convention, and roles propagate backward through weight signs; ReLU
//! copies inherit their source's role.

use serde::{Deserialize, Serialize};

/// Sign of a copy's outgoing contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Pos,
    Neg,
}

/// Direction in which a neuron's value influences the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Monotonicity {
    Inc,
    Dec,
}

impl Monotonicity {
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Monotonicity::Inc => Monotonicity::Dec,
            Monotonicity::Dec => Monotonicity::Inc,
        }
    }
}

/// The four neuron roles, in copy-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum Role {
    PosInc = 0,
    PosDec = 1,
    NegDec = 2,
    NegInc = 3,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::PosInc, Role::PosDec, Role::NegDec, Role::NegInc];

    /// The role of copy `index % 4` within a quadrupled layer.
    #[inline]
    pub fn from_copy(index: usize) -> Self {
        Self::ALL[index % 4]
    }

    /// This role's copy offset within its 4-tuple.
    #[inline]
    pub fn copy_offset(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn sign(self) -> Sign {
        match self {
            Role::PosInc | Role::PosDec => Sign::Pos,
            Role::NegDec | Role::NegInc => Sign::Neg,
        }
    }

    #[inline]
    pub fn monotonicity(self) -> Monotonicity {
        match self {
            Role::PosInc | Role::NegInc => Monotonicity::Inc,
            Role::PosDec | Role::NegDec => Monotonicity::Dec,
        }
    }

    #[inline]
    pub fn from_parts(sign: Sign, monotonicity: Monotonicity) -> Self {
        match (sign, monotonicity) {
            (Sign::Pos, Monotonicity::Inc) => Role::PosInc,
            (Sign::Pos, Monotonicity::Dec) => Role::PosDec,
            (Sign::Neg, Monotonicity::Dec) => Role::NegDec,
            (Sign::Neg, Monotonicity::Inc) => Role::NegInc,
        }
    }

    /// The unique source role that carries an edge of the given weight sign
    /// into a target of role `target`: a positive weight rides a POS copy
    /// with the target's monotonicity, a negative weight a NEG copy with
    /// the flipped monotonicity.
    #[inline]
    pub fn edge_carrier(weight_positive: bool, target: Role) -> Self {
        if weight_positive {
            Role::from_parts(Sign::Pos, target.monotonicity())
        } else {
            Role::from_parts(Sign::Neg, target.monotonicity().flip())
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::PosInc => write!(f, "POS_INC"),
            Role::PosDec => write!(f, "POS_DEC"),
            Role::NegDec => write!(f, "NEG_DEC"),
            Role::NegInc => write!(f, "NEG_INC"),
        }
    }
}

/// How the abstraction extracts a merged weight for a (source role,
/// target role) pair. `Zero` marks role transitions the preprocessing has
/// already pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightOp {
    Max,
    Min,
    Zero,
}

/// Whether any edge may run from a `from`-role copy into a `to`-role copy:
/// INC targets read from POS_INC and NEG_DEC sources, DEC targets from
/// POS_DEC and NEG_INC.
#[inline]
pub fn edge_allowed(from: Role, to: Role) -> bool {
    match to.monotonicity() {
        Monotonicity::Inc => matches!(from, Role::PosInc | Role::NegDec),
        Monotonicity::Dec => matches!(from, Role::PosDec | Role::NegInc),
    }
}

/// The weight operator for a role pair. Forbidden transitions are `Zero`;
/// surviving ones take the extremum that keeps the target an
/// over-approximation along its monotonicity: INC targets round up (Max),
/// DEC targets round down (Min).
#[inline]
pub fn weight_op(from: Role, to: Role) -> WeightOp {
    if !edge_allowed(from, to) {
        return WeightOp::Zero;
    }
    match to.monotonicity() {
        Monotonicity::Inc => WeightOp::Max,
        Monotonicity::Dec => WeightOp::Min,
    }
}
