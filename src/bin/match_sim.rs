//! match_sim - synthetic accuracy check for the strict matcher
//!
//! Registers random unit vectors as known users, queries with each of them and
//! with fresh strangers, and reports the confusion counts at a threshold.

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use facemark::matcher::{simulate_accuracy, DEFAULT_THRESHOLD};

#[derive(Parser, Debug)]
#[command(
    name = "match_sim",
    about = "Estimate strict-match accuracy on random embeddings"
)]
struct Args {
    /// Embedding dimension
    #[arg(long, default_value_t = 128)]
    dim: usize,

    /// Number of registered users
    #[arg(long, default_value_t = 50)]
    known: usize,

    /// Number of stranger queries
    #[arg(long, default_value_t = 500)]
    strangers: usize,

    /// Match threshold (defaults to the matcher's)
    #[arg(long)]
    threshold: Option<f32>,

    /// RNG seed
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.dim == 0 {
        return Err(anyhow!("--dim must be greater than zero"));
    }
    let threshold = args.threshold.unwrap_or(DEFAULT_THRESHOLD);
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(anyhow!("threshold must be in (0, 1], got {}", threshold));
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let report = simulate_accuracy(&mut rng, args.dim, args.known, args.strangers, threshold);

    println!(
        "dim={} known={} strangers={} threshold={:.3} seed={}",
        args.dim, args.known, args.strangers, threshold, args.seed
    );
    println!("  true positives  {:>6}", report.true_positives);
    println!("  false negatives {:>6}", report.false_negatives);
    println!("  false positives {:>6}", report.false_positives);
    println!("  true negatives  {:>6}", report.true_negatives);
    println!(
        "  precision {:.3}  recall {:.3}  accuracy {:.3}",
        report.precision(),
        report.recall(),
        report.accuracy()
    );
    Ok(())
}
