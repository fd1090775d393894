//! # mediasim
//!
//! Headless runner: loads a TOML scenario, runs it for a fixed number of
//! ticks and prints one JSON metrics line per tick on stdout.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults (stable link, delay-based CC, FEC, 500 ticks)
//! mediasim
//!
//! # Scenario file, reproducible seed, summary only
//! mediasim --config lossy.toml --seed 7 --ticks 3000 --summary
//!
//! # Same, with the seed taken from the environment
//! MEDIASIM_SEED=7 mediasim --config lossy.toml --summary
//! ```
//!
//! `MEDIASIM_CONFIG` and `MEDIASIM_SEED` stand in for `--config` and
//! `--seed`; an unparsable value is an error. `RUST_LOG` filters logs,
//! which go to stderr.

use std::io::Write;

use clap::Parser;
use mediasim::congestion::CongestionStrategy;
use mediasim::{SimConfig, Simulation};
use tracing_subscriber::EnvFilter;

/// Discrete-tick real-time media transport simulator.
#[derive(Parser, Debug)]
#[command(name = "mediasim", about = "Discrete-tick real-time media transport simulator")]
struct Cli {
    /// TOML scenario (built-in defaults when absent).
    #[arg(long, short = 'c', env = "MEDIASIM_CONFIG")]
    config: Option<String>,

    /// Ticks to simulate.
    #[arg(long, short = 'n', default_value_t = 500)]
    ticks: u64,

    /// Random seed, overrides the scenario's.
    #[arg(long, short = 's', env = "MEDIASIM_SEED")]
    seed: Option<u64>,

    /// Congestion strategy: aimd, delay-based or model-based.
    #[arg(long)]
    strategy: Option<CongestionStrategy>,

    /// Print only the end-of-run summary.
    #[arg(long, default_value_t = false)]
    summary: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();

    // ── Config ──────────────────────────────────────────────────
    let text = match &cli.config {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config '{}': {}", path, e))?,
        None => String::new(),
    };
    let resolved = SimConfig::from_toml_str(&text)?;
    let mut config = resolved.config;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }

    tracing::info!(
        config = ?cli.config,
        ticks = cli.ticks,
        seed = config.seed,
        "mediasim starting"
    );

    // ── Run ─────────────────────────────────────────────────────
    let mut sim = Simulation::new(config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for _ in 0..cli.ticks {
        let sample = sim.tick();
        if !cli.summary {
            writeln!(out, "{}", sample.to_json_line())?;
        }
    }

    let summary = sim.summary();
    if cli.summary {
        writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
    }
    out.flush()?;

    tracing::info!(
        sent = summary.sent,
        lost = summary.lost,
        recovered = summary.recovered,
        residual_loss = summary.residual_loss_rate,
        quality_switches = summary.quality_switches,
        "mediasim finished"
    );

    Ok(())
}
