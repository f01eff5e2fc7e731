use crate::{completion::Completion, config::Request, Error};
use commonware_cryptography::bls12381::primitives::variant::Variant;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};

/// Messages that can be sent to a [Mailbox].
pub enum Message<V: Variant> {
    Start {
        request: Request,
        responder: oneshot::Sender<Result<Completion<V>, Error>>,
    },
}

/// A mailbox used to start runs on an [crate::Engine].
#[derive(Clone)]
pub struct Mailbox<V: Variant> {
    sender: mpsc::Sender<Message<V>>,
}

impl<V: Variant> Mailbox<V> {
    /// Creates a new [Mailbox] with the given [mpsc::Sender].
    pub(crate) fn new(sender: mpsc::Sender<Message<V>>) -> Self {
        Self { sender }
    }

    /// Start a new run (rooted at this node) to collectively sign `request.message`.
    ///
    /// Returns an error immediately if the request is invalid (or the engine is not running).
    /// Otherwise, returns a [Completion] that resolves to the outcome of the run.
    pub async fn start(&mut self, request: Request) -> Result<Completion<V>, Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Start { request, responder })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)?
    }
}
