//! Simulation settings loaded from YAML.

use commonware_ftcosi::Threshold;
use serde::{Deserialize, Serialize};
use std::{fs, num::NonZeroUsize, path::Path, time::Duration};
use thiserror::Error;

/// Errors that can occur while loading or applying a [Config].
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("network error: {0}")]
    Network(#[from] commonware_p2p::simulated::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] commonware_ftcosi::Error),
}

/// Protocols that can be simulated.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Simulation {
    #[default]
    Ftcosi,
}

/// Minimum participation required for a round to succeed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Participation {
    Count(usize),
    Fraction { numerator: u32, denominator: u32 },
    Majority,
    Complete,
}

impl Default for Participation {
    fn default() -> Self {
        Self::Fraction {
            numerator: 2,
            denominator: 3,
        }
    }
}

impl From<Participation> for Threshold {
    fn from(value: Participation) -> Self {
        match value {
            Participation::Count(count) => Threshold::Count(count),
            Participation::Fraction {
                numerator,
                denominator,
            } => Threshold::Fraction {
                numerator,
                denominator,
            },
            Participation::Majority => Threshold::Majority,
            Participation::Complete => Threshold::Complete,
        }
    }
}

fn default_subtree_timeout_fraction() -> f64 {
    0.5
}

fn default_rounds() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    1_000
}

fn default_payload_size() -> usize {
    1_024
}

fn default_latency_ms() -> u64 {
    50
}

/// Settings for a simulation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub simulation: Simulation,
    pub hosts: usize,
    pub subtrees: usize,
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default)]
    pub failing_subleaders: usize,
    #[serde(default)]
    pub failing_leaves: usize,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub threshold: Participation,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_subtree_timeout_fraction")]
    pub subtree_timeout_fraction: f64,
    #[serde(default)]
    pub branching: Option<NonZeroUsize>,
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default)]
    pub seed: u64,
}

impl Config {
    /// Load a [Config] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.hosts < 2 {
            return Err(Error::Invalid(format!(
                "hosts must be at least 2 (found {})",
                self.hosts
            )));
        }
        if self.subtrees == 0 || self.subtrees >= self.hosts {
            return Err(Error::Invalid(format!(
                "subtrees must be in [1, {}] (found {})",
                self.hosts - 1,
                self.subtrees
            )));
        }
        if self.failing_subleaders > self.subtrees {
            return Err(Error::Invalid(format!(
                "failing_subleaders ({}) exceeds subtrees ({})",
                self.failing_subleaders, self.subtrees
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Invalid("timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Global timeout of each round.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
