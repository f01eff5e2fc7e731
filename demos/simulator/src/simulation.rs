//! Run rounds of collective signing over the simulated p2p network.

use crate::config::{Config, Error, Simulation};
use bytes::Bytes;
use commonware_cryptography::{
    bls12381::primitives::{ops, variant::MinSig},
    ed25519, PrivateKeyExt as _, Signer as _,
};
use commonware_ftcosi::{
    scheme::Signer, topology::Tree, Config as EngineConfig, Engine, FaultMode, Mailbox, Request,
    Roster, Threshold,
};
use commonware_macros::select;
use commonware_p2p::simulated::{self, Link, Network};
use commonware_runtime::{deterministic, Clock, Metrics};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use serde::Serialize;
use std::{collections::BTreeMap, time::Instant};
use tracing::{info, warn};

const NAMESPACE: &[u8] = b"ftcosi_simulator";

/// Outcome of a single round.
#[derive(Debug, Serialize)]
pub struct Round {
    pub round: usize,
    pub certified: bool,
    pub participants: Option<usize>,
    pub error: Option<String>,
    /// Virtual time from starting the run until its outcome is delivered.
    pub round_no_verify_ms: u64,
    /// Wall-clock time spent verifying the certificate independently.
    pub verification_us: u64,
    pub full_round_ms: u64,
}

/// Results of a simulation.
#[derive(Debug, Serialize)]
pub struct Report {
    pub config: Config,
    pub silent: Vec<u32>,
    pub rounds: Vec<Round>,
    pub succeeded: usize,
    pub mean_round_no_verify_ms: f64,
}

/// Run the configured simulation.
pub async fn run(context: deterministic::Context, config: Config) -> Result<Report, Error> {
    match config.simulation {
        Simulation::Ftcosi => ftcosi(context, config).await,
    }
}

/// Select silent participants from the tree layout: the first `failing_subleaders` subleaders
/// and then the first `failing_leaves` members of the remaining subtrees (in roster order).
fn silent(
    tree: &Tree,
    failing_subleaders: usize,
    failing_leaves: usize,
) -> Result<Vec<u32>, Error> {
    let subtrees = tree.subtrees();
    let mut silent: Vec<u32> = subtrees
        .iter()
        .take(failing_subleaders)
        .map(|subtree| subtree.leader)
        .collect();
    let leaves: Vec<u32> = subtrees
        .iter()
        .skip(failing_subleaders)
        .flat_map(|subtree| subtree.members.iter().copied())
        .collect();
    if leaves.len() < failing_leaves {
        return Err(Error::Invalid(format!(
            "failing_leaves ({failing_leaves}) exceeds available leaves ({})",
            leaves.len()
        )));
    }
    silent.extend(leaves.into_iter().take(failing_leaves));
    silent.sort();
    Ok(silent)
}

async fn ftcosi(context: deterministic::Context, config: Config) -> Result<Report, Error> {
    // Generate participants
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut participants = Vec::with_capacity(config.hosts);
    let mut privates = Vec::with_capacity(config.hosts);
    for seed in 0..config.hosts {
        let identity = ed25519::PrivateKey::from_seed(seed as u64).public_key();
        let (private, public) = ops::keypair::<_, MinSig>(&mut rng);
        participants.push((identity, public));
        privates.push(private);
    }
    let roster = Roster::<ed25519::PublicKey, MinSig>::new(participants)?;
    let policy = Threshold::from(config.threshold);

    // Choose faulty participants (every round is rooted at participant 0)
    let tree = Tree::new(config.hosts, 0, config.subtrees, config.branching)?;
    let silent = silent(&tree, config.failing_subleaders, config.failing_leaves)?;
    info!(hosts = config.hosts, subtrees = config.subtrees, ?silent, "starting simulation");

    // Connect all participants
    let (network, mut oracle) = Network::new(
        context.with_label("network"),
        simulated::Config {
            max_size: config.payload_size + 1024 * 1024,
        },
    );
    network.start();
    let mut links = Vec::with_capacity(config.hosts);
    for identity in roster.identities() {
        links.push(oracle.register(identity.clone(), 0).await?);
    }
    for from in roster.identities() {
        for to in roster.identities() {
            if from == to {
                continue;
            }
            let link = Link {
                latency: config.latency_ms as f64,
                jitter: config.jitter_ms as f64,
                success_rate: 1.0,
            };
            oracle.add_link(from.clone(), to.clone(), link).await?;
        }
    }

    // Start engines
    let mut mailboxes: BTreeMap<u32, Mailbox<MinSig>> = BTreeMap::new();
    for (index, link) in links.into_iter().enumerate() {
        let index = index as u32;
        let fault = if silent.contains(&index) {
            FaultMode::Silent
        } else {
            FaultMode::Honest
        };
        let cfg = EngineConfig {
            identity: roster.identities()[index as usize].clone(),
            signer: Signer::new(privates[index as usize].clone()),
            roster: roster.clone(),
            namespace: NAMESPACE.to_vec(),
            policy,
            subtree_timeout_fraction: config.subtree_timeout_fraction,
            branching: config.branching,
            fault,
            mailbox_size: 16,
            max_message_size: config.payload_size,
            max_tracked_runs: 64,
            priority: false,
        };
        let (engine, mailbox) = Engine::new(context.with_label(&format!("node_{index}")), cfg)?;
        engine.start(link);
        mailboxes.insert(index, mailbox);
    }
    let Some(root) = mailboxes.get_mut(&0) else {
        return Err(Error::Invalid("missing root".into()));
    };

    // Run rounds
    let timeout = config.timeout();
    let mut rounds = Vec::with_capacity(config.rounds);
    for round in 0..config.rounds {
        let mut payload = vec![0u8; config.payload_size];
        rng.fill_bytes(&mut payload);
        let payload = Bytes::from(payload);

        let start = context.current();
        let mut completion = root
            .start(Request {
                message: payload.clone(),
                subtrees: config.subtrees,
                timeout,
            })
            .await?;
        let outcome = select! {
            outcome = completion.wait() => {
                Some(outcome)
            },
            _ = context.sleep(timeout * 2) => {
                None
            },
        };
        let round_no_verify = context.current().duration_since(start).unwrap_or_default();

        let mut result = Round {
            round,
            certified: false,
            participants: None,
            error: None,
            round_no_verify_ms: round_no_verify.as_millis() as u64,
            verification_us: 0,
            full_round_ms: round_no_verify.as_millis() as u64,
        };
        match outcome {
            Some(Ok(certificate)) => {
                let verification = Instant::now();
                let verified =
                    certificate.verify(roster.publics(), NAMESPACE, &payload, &policy);
                let verification = verification.elapsed();
                result.participants = Some(certificate.mask.count());
                result.verification_us = verification.as_micros() as u64;
                result.full_round_ms = (round_no_verify + verification).as_millis() as u64;
                match verified {
                    Ok(()) => result.certified = true,
                    Err(err) => result.error = Some(err.to_string()),
                }
            }
            Some(Err(err)) => result.error = Some(err.to_string()),
            None => result.error = Some("round did not complete".into()),
        }
        if result.certified {
            info!(
                round,
                participants = ?result.participants,
                elapsed = ?round_no_verify,
                "round certified"
            );
        } else {
            warn!(round, error = ?result.error, "round failed");
        }
        rounds.push(result);
    }

    let succeeded = rounds.iter().filter(|round| round.certified).count();
    let mean_round_no_verify_ms = if rounds.is_empty() {
        0.0
    } else {
        rounds
            .iter()
            .map(|round| round.round_no_verify_ms as f64)
            .sum::<f64>()
            / rounds.len() as f64
    };
    Ok(Report {
        config,
        silent,
        rounds,
        succeeded,
        mean_round_no_verify_ms,
    })
}
