//! Single-delivery outcome of a run.

use crate::{scheme::Certificate, Error};
use commonware_cryptography::bls12381::primitives::variant::Variant;
use futures::channel::oneshot;

pub(crate) type Outcome<V> = Result<Certificate<V>, Error>;

/// Resolves to the outcome of a run exactly once.
///
/// Reading the outcome a second time returns [Error::AlreadyConsumed] (instead of blocking).
pub struct Completion<V: Variant> {
    receiver: Option<oneshot::Receiver<Outcome<V>>>,
}

impl<V: Variant> Completion<V> {
    /// Create a new [Completion] and the sender used to resolve it.
    pub(crate) fn new() -> (oneshot::Sender<Outcome<V>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (
            sender,
            Self {
                receiver: Some(receiver),
            },
        )
    }

    /// Wait for the outcome of the run.
    ///
    /// If the engine drops the run without resolving it, returns [Error::Canceled].
    pub async fn wait(&mut self) -> Outcome<V> {
        let receiver = self.receiver.take().ok_or(Error::AlreadyConsumed)?;
        receiver.await.unwrap_or(Err(Error::Canceled))
    }

    /// Returns `true` if the outcome was already read.
    pub fn is_consumed(&self) -> bool {
        self.receiver.is_none()
    }
}
