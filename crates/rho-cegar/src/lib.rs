//! Counterexample-guided abstraction refinement for piecewise-linear
//! network verification.
//!
//! The driver stores an input query, rewrites its network into the 4×
//! sign × monotonicity expansion, collapses it into a small sound
//! over-approximation, and loops: solve the abstract query with the
//! engine; echo UNSAT; on SAT replay the counterexample through the
//! preprocessed network and either confirm it or refine the abstraction
//! where it was loosest at the witness.

mod abstraction;
mod preprocess;
mod roles;

#[cfg(test)]
mod tests;

pub use abstraction::{Abstraction, Block, Group};
pub use preprocess::preprocess;
pub use roles::{edge_allowed, weight_op, Monotonicity, Role, Sign, WeightOp};

use rho_core::{float, Result, RhoError};
use rho_nlr::{InputQuery, NetworkLevelReasoner};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Engine verdicts. Anything other than these is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitCode {
    Sat,
    Unsat,
    Timeout,
    Error,
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Sat => write!(f, "SAT"),
            ExitCode::Unsat => write!(f, "UNSAT"),
            ExitCode::Timeout => write!(f, "TIMEOUT"),
            ExitCode::Error => write!(f, "ERROR"),
        }
    }
}

/// The consumed engine contract. An engine is constructed fresh per solve
/// call and discarded after result extraction.
pub trait Engine {
    /// Ingest the query; returning false means the engine already reached
    /// a verdict during its own preprocessing.
    fn process_input_query(&mut self, query: &InputQuery) -> bool;

    /// Run the search within the given budget.
    fn solve(&mut self, timeout: Option<Duration>);

    fn exit_code(&self) -> ExitCode;

    /// On SAT, populate the query's variable assignments.
    fn extract_solution(&self, query: &mut InputQuery);
}

/// Outcome of a verification run. Timeout is the "unknown" verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CegarResult {
    Sat {
        counterexample: Vec<f64>,
        output: Vec<f64>,
    },
    Unsat,
    Timeout,
}

/// Run counters, for tests and telemetry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CegarStats {
    pub engine_calls: usize,
    pub refinements: usize,
}

/// The abstraction-refinement driver for a single query.
#[derive(Debug)]
pub struct CegarSolver {
    base: InputQuery,
    abstraction: Abstraction,
    timeout: Option<Duration>,
    stats: CegarStats,
}

impl CegarSolver {
    /// Store the base query, pull its input box onto the attached network,
    /// preprocess into role copies, and build the initial abstraction.
    pub fn new(query: InputQuery) -> Result<Self> {
        let mut network = query
            .network()
            .cloned()
            .ok_or_else(|| {
                RhoError::Configuration(
                    "query has no attached network-level reasoner".to_string(),
                )
            })?;

        // Seed the input layer with the query's bounds for the input
        // variables.
        if let Some(input) = network.layer_mut(0) {
            for neuron in 0..input.size() {
                if let Some(variable) = input.variable(neuron) {
                    if let Some(lb) = query.lower_bound(variable) {
                        input.set_lb(neuron, lb);
                    }
                    if let Some(ub) = query.upper_bound(variable) {
                        input.set_ub(neuron, ub);
                    }
                }
            }
        }

        let preprocessed = preprocess(&network)?;
        info!(
            original_layers = network.num_layers(),
            preprocessed_variables = preprocessed
                .layers()
                .map(|l| l.size())
                .sum::<usize>(),
            "stored and preprocessed base query"
        );
        let abstraction = Abstraction::new(preprocessed)?;

        Ok(Self {
            base: query,
            abstraction,
            timeout: None,
            stats: CegarStats::default(),
        })
    }

    /// Budget handed to each engine invocation.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    #[inline]
    pub fn stats(&self) -> CegarStats {
        self.stats
    }

    #[inline]
    pub fn abstraction(&self) -> &Abstraction {
        &self.abstraction
    }

    /// The CEGAR loop. `spawn` builds one engine per iteration.
    pub fn run<E, F>(&mut self, mut spawn: F) -> Result<CegarResult>
    where
        E: Engine,
        F: FnMut() -> E,
    {
        loop {
            let mut abstract_network = self.abstraction.network()?;
            let mut abstract_query = abstract_network.generate_query()?;
            self.apply_output_property(&mut abstract_query);

            let abstract_size: usize = abstract_network.layers().map(|l| l.size()).sum();
            info!(
                iteration = self.stats.engine_calls,
                abstract_neurons = abstract_size,
                "solving abstract query"
            );

            let mut engine = spawn();
            self.stats.engine_calls += 1;
            if engine.process_input_query(&abstract_query) {
                engine.solve(self.timeout);
            }

            match engine.exit_code() {
                ExitCode::Unsat => {
                    info!("abstract query UNSAT; concrete query UNSAT");
                    return Ok(CegarResult::Unsat);
                }
                ExitCode::Timeout => {
                    info!("engine timed out; verification unknown");
                    return Ok(CegarResult::Timeout);
                }
                ExitCode::Error => {
                    return Err(RhoError::UnsupportedEngineExit(
                        ExitCode::Error.to_string(),
                    ));
                }
                ExitCode::Sat => {
                    engine.extract_solution(&mut abstract_query);
                    let witness = self.extract_witness(&abstract_query)?;
                    let output = self
                        .abstraction
                        .preprocessed_mut()
                        .evaluate(&witness)?;

                    if self.abstraction.is_fully_refined() {
                        info!("SAT on fully refined abstraction; verdict final");
                        return Ok(CegarResult::Sat {
                            counterexample: witness,
                            output,
                        });
                    }
                    if self.outputs_satisfy_property(&output) {
                        info!("counterexample confirmed on concrete network");
                        return Ok(CegarResult::Sat {
                            counterexample: witness,
                            output,
                        });
                    }

                    debug!("spurious counterexample; refining");
                    self.refine_from_witness(&witness, &mut abstract_network)?;
                    self.stats.refinements += 1;
                }
            }
        }
    }

    /// The abstract counterexample's input values, in input-layer order.
    fn extract_witness(&self, query: &InputQuery) -> Result<Vec<f64>> {
        query
            .input_variables()
            .iter()
            .map(|&variable| {
                query
                    .assignment(variable)
                    .ok_or(RhoError::MissingAssignment { variable })
            })
            .collect()
    }

    /// Impose the base query's output-variable bounds on the abstract
    /// query's output variables, in output-layer order.
    fn apply_output_property(&self, query: &mut InputQuery) {
        let abstract_outputs = query.output_variables().to_vec();
        for (&base_variable, &abstract_variable) in self
            .base
            .output_variables()
            .iter()
            .zip(abstract_outputs.iter())
        {
            if let Some(lb) = self.base.lower_bound(base_variable) {
                query.set_lower_bound(abstract_variable, lb);
            }
            if let Some(ub) = self.base.upper_bound(base_variable) {
                query.set_upper_bound(abstract_variable, ub);
            }
        }
    }

    /// A counterexample is genuine iff the replayed concrete outputs land
    /// inside the base query's output bounds.
    fn outputs_satisfy_property(&self, output: &[f64]) -> bool {
        for (&variable, &value) in self.base.output_variables().iter().zip(output.iter()) {
            let bound = self.base.bound(variable);
            if value < bound.lower - float::DEFAULT_EPSILON
                || value > bound.upper + float::DEFAULT_EPSILON
            {
                return false;
            }
        }
        true
    }

    /// Pick the loosest (block, role class) at the spurious witness and
    /// split out its most extreme member.
    ///
    /// Looseness of a group is the gap between its abstract ReLU value and
    /// the class aggregate of its members' concrete values (max for INC
    /// classes, min for DEC), scaled by the group's total outgoing weight
    /// magnitude. Ties break toward the lowest block, group, and member
    /// index so refinement replays deterministically.
    fn refine_from_witness(
        &mut self,
        witness: &[f64],
        abstract_network: &mut NetworkLevelReasoner,
    ) -> Result<()> {
        abstract_network.evaluate(witness)?;

        let mut best: Option<(f64, usize, usize)> = None;
        for (b, block) in self.abstraction.blocks().iter().enumerate() {
            let relu_index = block.relu_layer();
            let abstract_relu = abstract_network.layer(relu_index).ok_or_else(|| {
                RhoError::Configuration(format!("missing abstract layer {}", relu_index))
            })?;
            let concrete_relu =
                self.abstraction
                    .preprocessed()
                    .layer(relu_index)
                    .ok_or_else(|| {
                        RhoError::Configuration(format!(
                            "missing preprocessed layer {}",
                            relu_index
                        ))
                    })?;
            let next = abstract_network.layer(relu_index + 1).ok_or_else(|| {
                RhoError::Configuration(format!("missing abstract layer {}", relu_index + 1))
            })?;

            for (g, group) in block.groups().iter().enumerate() {
                if group.members().len() < 2 {
                    continue;
                }
                let abstract_value = abstract_relu.assignment()[g];
                let aggregate = match group.role().monotonicity() {
                    Monotonicity::Inc => group
                        .members()
                        .iter()
                        .map(|&m| concrete_relu.assignment()[m])
                        .fold(f64::NEG_INFINITY, f64::max),
                    Monotonicity::Dec => group
                        .members()
                        .iter()
                        .map(|&m| concrete_relu.assignment()[m])
                        .fold(f64::INFINITY, f64::min),
                };
                let gap = (abstract_value - aggregate).abs();
                let outgoing: f64 = (0..next.size())
                    .map(|t| next.weight(relu_index, g, t).abs())
                    .sum();
                let score = gap * outgoing;
                if best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, b, g));
                }
            }
        }

        let Some((score, b, g)) = best else {
            return Err(RhoError::Configuration(
                "refinement requested but no group can be split".to_string(),
            ));
        };

        // Restore the member whose witness value is most extreme within
        // its class.
        let group = &self.abstraction.blocks()[b].groups()[g];
        let concrete_relu = self
            .abstraction
            .preprocessed()
            .layer(self.abstraction.blocks()[b].relu_layer())
            .ok_or_else(|| {
                RhoError::Configuration("missing preprocessed layer".to_string())
            })?;
        let mut member = group.members()[0];
        let mut member_value = concrete_relu.assignment()[member];
        for &m in &group.members()[1..] {
            let value = concrete_relu.assignment()[m];
            let better = match group.role().monotonicity() {
                Monotonicity::Inc => value > member_value,
                Monotonicity::Dec => value < member_value,
            };
            if better {
                member = m;
                member_value = value;
            }
        }

        debug!(
            block = b,
            group = g,
            member,
            score,
            "splitting out witness-extreme member"
        );
        self.abstraction.refine(b, g, member)
    }
}
