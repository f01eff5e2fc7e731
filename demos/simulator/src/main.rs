//! Simulate rounds of fault-tolerant collective signing over a simulated p2p network.
//!
//! Every round is started by participant `0` over a payload of random bytes. Participants selected
//! as failing (from the tree layout) stay silent for the whole simulation. After each round, the
//! certificate is verified independently and timings are recorded. A JSON summary is printed once
//! all rounds complete.

use clap::{value_parser, Arg, Command};
use commonware_runtime::{deterministic, Runner};
use std::{path::PathBuf, process};
use tracing::{error, Level};

mod config;
mod simulation;

fn main() {
    // Parse arguments
    let matches = Command::new("commonware-ftcosi-simulator")
        .about("Simulate fault-tolerant collective signing rounds")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the YAML simulation config"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .required(false)
                .default_value("info")
                .value_parser(value_parser!(Level))
                .help("Maximum level of logs to display"),
        )
        .get_matches();

    // Create logger
    let level = matches
        .get_one::<Level>("log-level")
        .copied()
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    // Load config
    let Some(path) = matches.get_one::<PathBuf>("config") else {
        error!("missing config");
        process::exit(1);
    };
    let config = match config::Config::load(path) {
        Ok(config) => config,
        Err(err) => {
            error!(?err, "unable to load config");
            process::exit(1);
        }
    };

    // Run simulation
    let runner = deterministic::Runner::seeded(config.seed);
    let report = runner.start(|context| simulation::run(context, config));
    let report = match report {
        Ok(report) => report,
        Err(err) => {
            error!(?err, "simulation failed");
            process::exit(1);
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(summary) => println!("{summary}"),
        Err(err) => {
            error!(?err, "unable to serialize report");
            process::exit(1);
        }
    }
}
