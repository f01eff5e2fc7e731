use thiserror::Error;

/// Reasons an aggregate signature can fail cryptographic verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("empty aggregate")]
    EmptyAggregate,
    #[error("mask covers {0} members but roster has {1}")]
    RosterMismatch(usize, usize),
    #[error("invalid signature")]
    InvalidSignature,
}

/// Errors that can be surfaced to the caller of a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The run could not be started with the provided parameters.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Local key material is unavailable.
    #[error("local key material unavailable")]
    LocalSigning,
    /// The policy rejected the collected participants.
    #[error("insufficient participation: {participants} participants ({policy})")]
    InsufficientParticipation { participants: usize, policy: String },
    /// Sufficient participants were collected but the aggregate does not verify.
    #[error("verification failed: {0}")]
    VerificationFailed(#[from] VerificationError),
    /// The outcome of a run was already consumed.
    #[error("outcome already consumed")]
    AlreadyConsumed,
    /// The engine dropped the run before producing an outcome.
    #[error("canceled")]
    Canceled,
    /// The engine is not running.
    #[error("engine closed")]
    Closed,
}
