use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use voltaic::analysis::transient::{self, TranOptions};
use voltaic::compiler;
use voltaic::error::SimError;
use voltaic::output::TabWriter;
use voltaic::parser;
use voltaic::stats::Stats;

/// Time-domain circuit simulator based on modified nodal analysis
#[derive(Parser)]
#[command(name = "voltaic", version)]
struct Cli {
    /// Netlist file to simulate
    netlist: PathBuf,

    /// Trace output file (default: netlist with a .tab extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for the divergence-restart randomization
    #[arg(long)]
    seed: Option<u64>,

    /// Print run statistics to stderr
    #[arg(long)]
    stats: bool,
}

/// Process exit code for a simulation error.
fn exit_code(err: &SimError) -> i32 {
    match err {
        SimError::SingularSystem { .. } => 2,
        SimError::NoConvergence { .. } => 3,
        SimError::TooManyVariables { .. } => 4,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let input = fs::read_to_string(&cli.netlist).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {}", cli.netlist.display(), e);
        exit(1);
    });

    let netlist = parser::parse(&input).unwrap_or_else(|e| {
        eprintln!("{}", e);
        exit(exit_code(&e));
    });

    let circuit = compiler::compile(&netlist).unwrap_or_else(|e| {
        eprintln!("{}", e);
        exit(exit_code(&e));
    });

    let out_path = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.netlist.with_extension("tab"));
    let file = fs::File::create(&out_path).unwrap_or_else(|e| {
        eprintln!("Error creating {}: {}", out_path.display(), e);
        exit(1);
    });
    let mut trace = TabWriter::new(BufWriter::new(file));

    let mut stats = cli.stats.then(Stats::new);
    let options = TranOptions { seed: cli.seed };

    if let Err(e) = transient::run(&circuit, &mut trace, &options, stats.as_mut()) {
        eprintln!("{}", e);
        exit(exit_code(&e));
    }

    if let Some(stats) = stats {
        stats.display();
    }
}
