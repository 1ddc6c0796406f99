//! ρ-CEGAR command-line interface.
//!
//! Loads NNet models and exposes the network-level reasoner's operations:
//! topology inspection, forward evaluation, bound propagation over the
//! input box, and a dry run of the abstraction pipeline.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rho_cegar::{preprocess, Abstraction};
use rho_core::Tightening;
use rho_nnet::load_nnet;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Bound propagation method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum Method {
    /// Interval arithmetic, layer by layer
    #[default]
    Interval,
    /// Symbolic linear bounds over the input layer
    Symbolic,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Interval => write!(f, "interval"),
            Method::Symbolic => write!(f, "symbolic"),
        }
    }
}

#[derive(Parser)]
#[command(name = "rho")]
#[command(version = "0.1.0")]
#[command(about = "Piecewise-linear network verification toolkit", long_about = None)]
struct Cli {
    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a model's topology
    Info {
        /// Path to an NNet model
        model: PathBuf,
    },
    /// Evaluate a model on one input
    Eval {
        model: PathBuf,

        /// Comma-separated input values
        #[arg(short, long)]
        input: String,

        /// Apply the model's input normalization and output denormalization
        #[arg(long, default_value_t = false)]
        normalize: bool,
    },
    /// Propagate bounds through the network over its input box
    Bounds {
        model: PathBuf,

        /// Propagation method
        #[arg(long, value_enum, default_value_t = Method::Interval)]
        method: Method,

        /// Override the input box lower corner (comma-separated)
        #[arg(long)]
        lower: Option<String>,

        /// Override the input box upper corner (comma-separated)
        #[arg(long)]
        upper: Option<String>,

        /// Output as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Preprocess into role copies and build the initial abstraction
    Abstract {
        model: PathBuf,

        /// Output as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn parse_values(text: &str) -> Result<Vec<f64>> {
    text.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<f64>().with_context(|| format!("bad value {:?}", v)))
        .collect()
}

#[derive(Serialize)]
struct BoundsReport {
    method: String,
    tightenings: Vec<Tightening>,
    output_variables: Vec<usize>,
    output_bounds: Vec<(f64, f64)>,
}

#[derive(Serialize)]
struct AbstractReport {
    original_sizes: Vec<usize>,
    preprocessed_sizes: Vec<usize>,
    abstract_sizes: Vec<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    match cli.command {
        Commands::Info { model } => {
            let nnet = load_nnet(&model)?;
            let nlr = nnet.to_network()?;
            print!("{}", nlr.dump_topology());
            let variables: usize = nlr.layers().map(|l| l.size()).sum();
            println!("Variables: {}", variables);
        }
        Commands::Eval {
            model,
            input,
            normalize,
        } => {
            let nnet = load_nnet(&model)?;
            let input = parse_values(&input)?;
            let output = nnet.evaluate(&input, normalize)?;
            println!(
                "{}",
                output
                    .iter()
                    .map(|v| format!("{:.6}", v))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Commands::Bounds {
            model,
            method,
            lower,
            upper,
            json,
        } => {
            let nnet = load_nnet(&model)?;
            let mut nlr = nnet.to_network()?;
            if let (Some(lower), Some(upper)) = (&lower, &upper) {
                nlr.set_input_bounds(&parse_values(lower)?, &parse_values(upper)?)?;
            } else if lower.is_some() || upper.is_some() {
                bail!("--lower and --upper must be given together");
            }

            match method {
                Method::Interval => nlr.interval_propagation(),
                Method::Symbolic => nlr.symbolic_propagation(),
            }
            let mut tightenings = Vec::new();
            nlr.collect_tightenings(&mut tightenings);
            info!(count = tightenings.len(), "collected tightenings");

            let last = nlr.num_layers() - 1;
            let output = nlr.layer(last).context("network has no layers")?;
            let output_variables: Vec<usize> =
                (0..output.size()).filter_map(|i| output.variable(i)).collect();
            let output_bounds: Vec<(f64, f64)> =
                (0..output.size()).map(|i| (output.lb(i), output.ub(i))).collect();

            if json {
                let report = BoundsReport {
                    method: format!("{:?}", method).to_lowercase(),
                    tightenings,
                    output_variables,
                    output_bounds,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Tightenings: {}", tightenings.len());
                for (variable, (lb, ub)) in
                    output_variables.iter().zip(output_bounds.iter())
                {
                    println!("x{}: [{:.6}, {:.6}]", variable, lb, ub);
                }
            }
        }
        Commands::Abstract { model, json } => {
            let nnet = load_nnet(&model)?;
            let nlr = nnet.to_network()?;
            let original_sizes: Vec<usize> = nlr.layers().map(|l| l.size()).collect();

            let preprocessed = preprocess(&nlr)?;
            let preprocessed_sizes: Vec<usize> =
                preprocessed.layers().map(|l| l.size()).collect();

            let abstraction = Abstraction::new(preprocessed)?;
            let network = abstraction.network()?;
            let abstract_sizes: Vec<usize> = network.layers().map(|l| l.size()).collect();

            if json {
                let report = AbstractReport {
                    original_sizes,
                    preprocessed_sizes,
                    abstract_sizes,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Original:     {:?}", original_sizes);
                println!("Preprocessed: {:?}", preprocessed_sizes);
                println!("Abstract:     {:?}", abstract_sizes);
            }
        }
    }
    Ok(())
}
