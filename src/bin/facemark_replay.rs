//! facemark_replay - run a recorded session through the identity tracker
//!
//! Prints one line per frame with the displayed labels, any instant matches
//! and the tracks evicted on that frame. Useful for checking tracker tuning
//! against captured sessions without a camera.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use facemark::replay::ReplaySession;
use facemark::ui::Ui;
use facemark::TrackerConfig;

#[derive(Parser, Debug)]
#[command(
    name = "facemark_replay",
    about = "Replay a recorded detection session through the identity tracker"
)]
struct Args {
    /// Session file (JSON)
    #[arg(long, value_name = "PATH")]
    session: PathBuf,

    /// Override the match threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the label memory in milliseconds
    #[arg(long)]
    memory_ms: Option<u64>,

    /// Only print frames whose labels changed
    #[arg(long)]
    changes_only: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_env(Some(&args.ui));

    let session = {
        let _stage = ui.stage("Load session");
        ReplaySession::load(&args.session)?
    };

    let mut config = TrackerConfig::default();
    if let Some(threshold) = args.threshold {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!("threshold must be in (0, 1], got {}", threshold));
        }
        config.match_threshold = threshold;
    }
    if let Some(memory_ms) = args.memory_ms {
        config.memory_ms = memory_ms;
    }

    let steps = {
        let _stage = ui.stage("Replay frames");
        session.run(config)
    };

    let mut previous: Option<Vec<String>> = None;
    let mut evicted_total = 0usize;
    for step in &steps {
        let labels: Vec<String> = step.overlay.boxes.iter().map(|b| b.text.clone()).collect();
        evicted_total += step.overlay.evicted.len();
        let changed = previous.as_ref() != Some(&labels);
        previous = Some(labels.clone());
        if args.changes_only && !changed && step.overlay.instant_matches.is_empty() {
            continue;
        }

        println!("t={:>7}ms  [{}]", step.timestamp_ms, labels.join(" | "));
        for instant in &step.overlay.instant_matches {
            println!(
                "             instant {} -> {} ({:.3})",
                instant.track_id, instant.outcome.identity, instant.outcome.confidence
            );
        }
        if !step.overlay.evicted.is_empty() {
            let ids: Vec<String> = step.overlay.evicted.iter().map(|id| id.to_string()).collect();
            println!("             evicted {}", ids.join(", "));
        }
    }

    println!(
        "{} frames replayed, {} tracks evicted",
        steps.len(),
        evicted_total
    );
    Ok(())
}
