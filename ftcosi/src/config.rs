use crate::{policy::Policy, scheme::Signer, topology::Roster, Error};
use bytes::Bytes;
use commonware_cryptography::{bls12381::primitives::variant::Variant, PublicKey};
use std::{num::NonZeroUsize, time::Duration};

/// How a node behaves when it is asked to contribute to a run.
///
/// Used to inject faults in tests and simulations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FaultMode {
    /// Follow the protocol.
    #[default]
    Honest,
    /// Drop every proposal (neither forward it nor contribute).
    Silent,
    /// Forward proposals and sign, but never send a contribution upward.
    Withhold,
    /// Send every contribution upward only after the given delay.
    Delayed(Duration),
}

/// Configuration for the [crate::Engine].
pub struct Config<P: PublicKey, V: Variant, Pol: Policy> {
    /// Network identity of this node.
    pub identity: P,

    /// Signs proposals with this node's BLS key material.
    pub signer: Signer<V>,

    /// Participants (in the order used for participation masks).
    pub roster: Roster<P, V>,

    /// Namespace used to sign proposals.
    ///
    /// Prevents replaying signatures from other applications.
    pub namespace: Vec<u8>,

    /// Decides whether a collected set of participants is sufficient (when this node is the root).
    pub policy: Pol,

    /// Fraction of a run's global timeout that subleaders wait for shares.
    ///
    /// Must be in `(0, 1)` so that every subtree reports before the root gives up.
    pub subtree_timeout_fraction: f64,

    /// Branching factor of members below each subleader (`None` attaches all members
    /// directly to the subleader).
    pub branching: Option<NonZeroUsize>,

    /// Behavior of this node when asked to contribute.
    pub fault: FaultMode,

    /// Size of the mailbox used to start runs.
    pub mailbox_size: usize,

    /// Maximum size of a proposal.
    pub max_message_size: usize,

    /// Number of completed runs remembered (to discard late messages).
    pub max_tracked_runs: usize,

    /// Whether messages are sent with priority.
    pub priority: bool,
}

impl<P: PublicKey, V: Variant, Pol: Policy> Config<P, V, Pol> {
    /// Returns an error if the configuration cannot be used to run the protocol.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.subtree_timeout_fraction > 0.0 && self.subtree_timeout_fraction < 1.0) {
            return Err(Error::Configuration(format!(
                "subtree timeout fraction must be in (0, 1) (found {})",
                self.subtree_timeout_fraction
            )));
        }
        if self.roster.index(&self.identity).is_none() {
            return Err(Error::Configuration(format!(
                "identity {} not in roster",
                self.identity
            )));
        }
        if self.mailbox_size == 0 {
            return Err(Error::Configuration("mailbox size must be positive".into()));
        }
        if self.max_tracked_runs == 0 {
            return Err(Error::Configuration(
                "max tracked runs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A request to collectively sign a message (with this node as the root).
#[derive(Clone, Debug)]
pub struct Request {
    /// The message to sign.
    pub message: Bytes,
    /// Number of subtrees to partition the roster into.
    pub subtrees: usize,
    /// How long the root waits for subtree reports.
    pub timeout: Duration,
}

impl Request {
    /// Returns an error if the request cannot be started over a roster of `roster_size`
    /// participants.
    pub fn validate(&self, roster_size: usize, max_message_size: usize) -> Result<(), Error> {
        if self.timeout.is_zero() {
            return Err(Error::Configuration("timeout must be positive".into()));
        }
        if u64::try_from(self.timeout.as_millis()).is_err() {
            return Err(Error::Configuration(format!(
                "timeout too large ({:?})",
                self.timeout
            )));
        }
        if self.message.len() > max_message_size {
            return Err(Error::Configuration(format!(
                "message too large ({} > {max_message_size})",
                self.message.len()
            )));
        }
        if roster_size < 2 {
            return Err(Error::Configuration(format!(
                "roster must have at least 2 participants (found {roster_size})"
            )));
        }
        if self.subtrees == 0 || self.subtrees > roster_size - 1 {
            return Err(Error::Configuration(format!(
                "subtrees must be in [1, {}] (found {})",
                roster_size - 1,
                self.subtrees
            )));
        }
        Ok(())
    }
}
