use crate::{
    completion::{Completion, Outcome},
    config::{Config, FaultMode, Request},
    ingress::{Mailbox, Message as MailboxMessage},
    metrics::Metrics,
    policy::Policy,
    scheme::{self, Aggregate, Signer},
    token::{Protocol, Token},
    topology::{Roster, Tree},
    wire::{self, Message, Partial, Proposal, Share},
    Error,
};
use bytes::Bytes;
use commonware_cryptography::{bls12381::primitives::variant::Variant, PublicKey};
use commonware_macros::select;
use commonware_p2p::{
    utils::codec::{wrap, WrappedSender},
    Receiver, Recipients, Sender,
};
use commonware_runtime::{Clock, Handle, Metrics as RuntimeMetrics, Spawner};
use futures::{
    channel::{mpsc, oneshot},
    future::{self, Either},
    StreamExt,
};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    num::NonZeroUsize,
    time::SystemTime,
};
use tracing::{debug, error, info, trace, warn};

/// State of a run rooted at this node.
struct Root<V: Variant> {
    tree: Tree,
    message: Bytes,
    deadline: SystemTime,

    /// This node's own share (if it could sign).
    share: Option<V::Signature>,

    /// Reports received from subleaders, keyed by subtree.
    reports: BTreeMap<u32, Aggregate<V>>,

    responder: oneshot::Sender<Outcome<V>>,
}

/// State of a run in which this node leads a subtree.
struct Subtree<V: Variant> {
    subtree: u32,
    root: u32,
    members: Vec<u32>,
    message: Bytes,
    deadline: SystemTime,

    /// This node's own share (if it could sign).
    share: Option<V::Signature>,

    /// Shares received from members.
    shares: BTreeMap<u32, V::Signature>,
}

impl<V: Variant> Subtree<V> {
    fn complete(&self) -> bool {
        self.shares.len() == self.members.len()
    }
}

/// An in-flight run (at most one role per node and run).
enum Run<V: Variant> {
    Root(Root<V>),
    Subtree(Subtree<V>),
}

impl<V: Variant> Run<V> {
    fn deadline(&self) -> SystemTime {
        match self {
            Self::Root(root) => root.deadline,
            Self::Subtree(subtree) => subtree.deadline,
        }
    }
}

/// Hosts every role a node can play in a run: root, subleader, or member.
///
/// Each [Engine] runs as a single task that owns all of its run state (keyed by [Token]).
pub struct Engine<E: Clock + Spawner + RuntimeMetrics, P: PublicKey, V: Variant, Pol: Policy> {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    context: E,
    mailbox: mpsc::Receiver<MailboxMessage<V>>,

    ////////////////////////////////////////
    // Configuration
    ////////////////////////////////////////
    index: u32,
    signer: Signer<V>,
    roster: Roster<P, V>,
    namespace: Vec<u8>,
    policy: Pol,
    subtree_timeout_fraction: f64,
    branching: Option<NonZeroUsize>,
    fault: FaultMode,
    max_message_size: usize,
    max_tracked_runs: usize,
    priority: bool,
    codec: wire::Config,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    next_round: u64,
    active: BTreeMap<Token, Run<V>>,

    /// Runs that are no longer active (in the order they finished).
    finished: VecDeque<Token>,
    finished_set: BTreeSet<Token>,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: Metrics,
}

impl<E: Clock + Spawner + RuntimeMetrics, P: PublicKey, V: Variant, Pol: Policy>
    Engine<E, P, V, Pol>
{
    /// Creates a new engine with the given context and configuration.
    ///
    /// Returns the engine and a mailbox used to start runs (or an error if the configuration
    /// is invalid).
    pub fn new(context: E, cfg: Config<P, V, Pol>) -> Result<(Self, Mailbox<V>), Error> {
        cfg.validate()?;
        let index = cfg
            .roster
            .index(&cfg.identity)
            .ok_or_else(|| Error::Configuration("identity not in roster".into()))?;
        let (sender, mailbox) = mpsc::channel(cfg.mailbox_size);
        let metrics = Metrics::init(&context);
        let codec = wire::Config {
            max_message_size: cfg.max_message_size,
            roster_size: cfg.roster.len(),
        };
        Ok((
            Self {
                context,
                mailbox,
                index,
                signer: cfg.signer,
                roster: cfg.roster,
                namespace: cfg.namespace,
                policy: cfg.policy,
                subtree_timeout_fraction: cfg.subtree_timeout_fraction,
                branching: cfg.branching,
                fault: cfg.fault,
                max_message_size: cfg.max_message_size,
                max_tracked_runs: cfg.max_tracked_runs,
                priority: cfg.priority,
                codec,
                next_round: 0,
                active: BTreeMap::new(),
                finished: VecDeque::new(),
                finished_set: BTreeSet::new(),
                metrics,
            },
            Mailbox::new(sender),
        ))
    }

    /// Starts the engine with the given network.
    pub fn start(
        self,
        network: (impl Sender<PublicKey = P>, impl Receiver<PublicKey = P>),
    ) -> Handle<()> {
        self.context
            .with_label("engine")
            .spawn(|_| self.run(network))
    }

    async fn run(mut self, network: (impl Sender<PublicKey = P>, impl Receiver<PublicKey = P>)) {
        let (mut sender, mut receiver) =
            wrap::<_, _, Message<V>>(self.codec, network.0, network.1);
        let mut shutdown = self.context.stopped();
        loop {
            // Wait for the nearest deadline (if any run is active)
            let deadline = match self.active.values().map(Run::deadline).min() {
                Some(deadline) => Either::Left(self.context.sleep_until(deadline)),
                None => Either::Right(future::pending()),
            };

            select! {
                _ = &mut shutdown => {
                    debug!("shutdown");
                    break;
                },
                _ = deadline => {
                    self.expire(&mut sender).await;
                },
                mail = self.mailbox.next() => {
                    let Some(mail) = mail else {
                        debug!("mailbox closed");
                        break;
                    };
                    match mail {
                        MailboxMessage::Start { request, responder } => {
                            let result = self.start_run(&mut sender, request).await;
                            let _ = responder.send(result);
                        }
                    }
                },
                msg = receiver.recv() => {
                    let (peer, msg) = match msg {
                        Ok(msg) => msg,
                        Err(err) => {
                            debug!(?err, "receiver closed");
                            break;
                        }
                    };
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(err) => {
                            warn!(?err, ?peer, "failed to decode message");
                            self.metrics.invalid.inc();
                            continue;
                        }
                    };
                    trace!(token = %msg.token(), ?peer, "network");
                    match msg {
                        Message::Proposal(proposal) => {
                            self.handle_proposal(&mut sender, peer, proposal).await;
                        }
                        Message::Share(share) => {
                            self.handle_share(&mut sender, peer, share).await;
                        }
                        Message::Partial(partial) => {
                            self.handle_partial(peer, partial);
                        }
                    }
                },
            }
        }
    }

    ////////////////////////////////////////
    // Root
    ////////////////////////////////////////

    async fn start_run<Sr: Sender<PublicKey = P>>(
        &mut self,
        sender: &mut WrappedSender<Sr, Message<V>>,
        request: Request,
    ) -> Result<Completion<V>, Error> {
        request.validate(self.roster.len(), self.max_message_size)?;
        let Some(deadline) = self.context.current().checked_add(request.timeout) else {
            return Err(Error::Configuration(format!(
                "timeout too large ({:?})",
                request.timeout
            )));
        };
        let tree = Tree::new(
            self.roster.len(),
            self.index,
            request.subtrees,
            self.branching,
        )?;
        let round = self.next_round;
        self.next_round += 1;
        let token = Token::new(Protocol::FtCosi, self.roster.digest(), &tree, round);
        let subtree_timeout = request.timeout.mul_f64(self.subtree_timeout_fraction);
        info!(
            %token,
            round,
            subtrees = request.subtrees,
            timeout = ?request.timeout,
            "starting run"
        );
        self.metrics.started.inc();

        // Contribute our own share (a failure only excludes us from the mask)
        let share = match self.signer.sign(&self.namespace, &request.message) {
            Ok(share) => Some(share),
            Err(err) => {
                warn!(%token, ?err, "unable to sign proposal");
                None
            }
        };

        // Dispatch the proposal to every subleader
        let proposal = Message::<V>::Proposal(Proposal {
            token,
            round,
            leader: self.index,
            subtrees: request.subtrees as u32,
            subtree_timeout,
            payload: request.message.clone(),
        });
        self.send(sender, tree.children(self.index), proposal).await;

        // Track the run
        let (responder, completion) = Completion::new();
        self.active.insert(
            token,
            Run::Root(Root {
                tree,
                message: request.message,
                deadline,
                share,
                reports: BTreeMap::new(),
                responder,
            }),
        );
        Ok(completion)
    }

    fn handle_partial(&mut self, peer: P, partial: Partial<V>) {
        let token = partial.token;
        let Some(Run::Root(root)) = self.active.get_mut(&token) else {
            debug!(%token, ?peer, "discarding partial for inactive run");
            return;
        };

        // Ensure the partial comes from the subtree's subleader
        let Some(subtree) = root.tree.subtree(partial.subtree) else {
            warn!(%token, ?peer, subtree = partial.subtree, "invalid subtree");
            self.metrics.invalid.inc();
            return;
        };
        if self.roster.identity(subtree.leader) != Some(&peer) {
            warn!(%token, ?peer, subtree = partial.subtree, "partial not sent by subleader");
            self.metrics.invalid.inc();
            return;
        }
        if root.reports.contains_key(&partial.subtree) {
            debug!(%token, ?peer, subtree = partial.subtree, "duplicate partial");
            return;
        }

        // Ensure the partial only covers the subtree and verifies
        if !partial.aggregate.mask().iter().all(|index| subtree.contains(index)) {
            warn!(%token, ?peer, subtree = partial.subtree, "partial outside of subtree");
            self.metrics.invalid.inc();
            return;
        }
        if !partial.aggregate.is_empty() {
            if let Err(err) =
                partial
                    .aggregate
                    .verify(self.roster.publics(), &self.namespace, &root.message)
            {
                warn!(%token, ?peer, subtree = partial.subtree, ?err, "invalid partial");
                self.metrics.invalid.inc();
                return;
            }
        }
        debug!(
            %token,
            subtree = partial.subtree,
            participants = partial.aggregate.count(),
            "received partial"
        );
        self.metrics.partials.inc();
        root.reports.insert(partial.subtree, partial.aggregate);

        // Finalize once every subtree has reported
        if root.reports.len() == root.tree.subtrees().len() {
            if let Some(Run::Root(root)) = self.active.remove(&token) {
                self.finalize_root(token, root);
            }
        }
    }

    fn finalize_root(&mut self, token: Token, root: Root<V>) {
        // Fold our own share and every report into a single aggregate
        let roster_size = self.roster.len();
        let mut aggregate = match &root.share {
            Some(share) => Aggregate::from_shares(roster_size, [(self.index, share)]),
            None => Aggregate::empty(roster_size),
        };
        let mut expected = aggregate.count();
        for report in root.reports.values() {
            expected += report.count();
            aggregate.merge(report);
        }
        assert_eq!(aggregate.count(), expected, "subtree masks overlap");

        // Check the aggregate against the policy
        let outcome = scheme::verify(
            &aggregate,
            self.roster.publics(),
            &self.namespace,
            &root.message,
            &self.policy,
        );
        match &outcome {
            Ok(certificate) => {
                info!(
                    %token,
                    participants = certificate.mask.count(),
                    reports = root.reports.len(),
                    "run succeeded"
                );
                self.metrics.succeeded.inc();
            }
            Err(err @ Error::VerificationFailed(_)) => {
                error!(%token, ?err, "run failed");
                self.metrics.failed.inc();
            }
            Err(err) => {
                warn!(%token, ?err, "run failed");
                self.metrics.failed.inc();
            }
        }
        let _ = root.responder.send(outcome);
        self.remember(token);
    }

    ////////////////////////////////////////
    // Subleaders and Members
    ////////////////////////////////////////

    async fn handle_proposal<Sr: Sender<PublicKey = P>>(
        &mut self,
        sender: &mut WrappedSender<Sr, Message<V>>,
        peer: P,
        proposal: Proposal,
    ) {
        let token = proposal.token;
        if self.active.contains_key(&token) || self.finished_set.contains(&token) {
            debug!(%token, ?peer, "duplicate proposal");
            return;
        }

        // Rebuild the tree and ensure the proposal belongs to it
        if proposal.leader == self.index {
            warn!(%token, ?peer, "proposal claims to be rooted at us");
            self.metrics.invalid.inc();
            return;
        }
        let tree = match Tree::new(
            self.roster.len(),
            proposal.leader,
            proposal.subtrees as usize,
            self.branching,
        ) {
            Ok(tree) => tree,
            Err(err) => {
                warn!(%token, ?peer, ?err, "invalid tree");
                self.metrics.invalid.inc();
                return;
            }
        };
        if Token::new(Protocol::FtCosi, self.roster.digest(), &tree, proposal.round) != token {
            warn!(%token, ?peer, "token mismatch");
            self.metrics.invalid.inc();
            return;
        }
        let parent = tree.parent(self.index);
        if parent.and_then(|parent| self.roster.identity(parent)) != Some(&peer) {
            warn!(%token, ?peer, "proposal not sent by parent");
            self.metrics.invalid.inc();
            return;
        }
        let Some(deadline) = self.context.current().checked_add(proposal.subtree_timeout) else {
            warn!(%token, ?peer, timeout = ?proposal.subtree_timeout, "invalid subtree timeout");
            self.metrics.invalid.inc();
            return;
        };
        if self.fault == FaultMode::Silent {
            debug!(%token, "dropping proposal");
            self.remember(token);
            return;
        }
        debug!(%token, round = proposal.round, leader = proposal.leader, "received proposal");

        // Forward the proposal to our children
        let children = tree.children(self.index);
        if !children.is_empty() {
            let forward = Message::<V>::Proposal(proposal.clone());
            self.send(sender, children, forward).await;
        }

        // Sign the proposal (a failure only excludes us from the mask)
        let share = match self.signer.sign(&self.namespace, &proposal.payload) {
            Ok(share) => Some(share),
            Err(err) => {
                warn!(%token, ?err, "unable to sign proposal");
                None
            }
        };

        // If we lead a subtree, start collecting shares
        if let Some(position) = tree.led_by(self.index) {
            let Some(subtree) = tree.subtree(position) else {
                return;
            };
            let run = Subtree {
                subtree: position,
                root: tree.root(),
                members: subtree.members.clone(),
                message: proposal.payload,
                deadline,
                share,
                shares: BTreeMap::new(),
            };
            if run.complete() {
                self.finalize_subtree(sender, token, run).await;
            } else {
                self.active.insert(token, Run::Subtree(run));
            }
            return;
        }

        // Otherwise, send our share to our subleader
        self.remember(token);
        let Some(share) = share else {
            return;
        };
        let Some(subleader) = tree
            .assignment(self.index)
            .and_then(|position| tree.subtree(position))
            .map(|subtree| subtree.leader)
        else {
            return;
        };
        let share = Message::<V>::Share(Share {
            token,
            index: self.index,
            signature: share,
        });
        self.send_upward(sender, subleader, share).await;
    }

    async fn handle_share<Sr: Sender<PublicKey = P>>(
        &mut self,
        sender: &mut WrappedSender<Sr, Message<V>>,
        peer: P,
        share: Share<V>,
    ) {
        let token = share.token;
        let Some(Run::Subtree(run)) = self.active.get_mut(&token) else {
            debug!(%token, ?peer, "discarding share for inactive run");
            return;
        };

        // Ensure the share comes from a member of our subtree
        if run.members.binary_search(&share.index).is_err()
            || self.roster.identity(share.index) != Some(&peer)
        {
            warn!(%token, ?peer, index = share.index, "share not sent by member");
            self.metrics.invalid.inc();
            return;
        }
        if run.shares.contains_key(&share.index) {
            debug!(%token, index = share.index, "duplicate share");
            return;
        }
        let Some(public) = self.roster.public(share.index) else {
            return;
        };
        if !scheme::verify_share::<V>(public, &self.namespace, &run.message, &share.signature) {
            warn!(%token, ?peer, index = share.index, "invalid share");
            self.metrics.invalid.inc();
            return;
        }
        debug!(%token, index = share.index, "received share");
        self.metrics.shares.inc();
        run.shares.insert(share.index, share.signature);

        // Report once every member has responded
        if run.complete() {
            if let Some(Run::Subtree(run)) = self.active.remove(&token) {
                self.finalize_subtree(sender, token, run).await;
            }
        }
    }

    async fn finalize_subtree<Sr: Sender<PublicKey = P>>(
        &mut self,
        sender: &mut WrappedSender<Sr, Message<V>>,
        token: Token,
        run: Subtree<V>,
    ) {
        let shares = run
            .share
            .as_ref()
            .map(|share| (self.index, share))
            .into_iter()
            .chain(run.shares.iter().map(|(index, share)| (*index, share)));
        let aggregate = Aggregate::<V>::from_shares(self.roster.len(), shares);
        debug!(
            %token,
            subtree = run.subtree,
            participants = aggregate.count(),
            expected = run.members.len() + 1,
            "reporting partial"
        );
        self.remember(token);

        // Always report (even if empty) so the root knows the subtree is done
        let partial = Message::<V>::Partial(Partial {
            token,
            subtree: run.subtree,
            aggregate,
        });
        self.send_upward(sender, run.root, partial).await;
    }

    ////////////////////////////////////////
    // Helpers
    ////////////////////////////////////////

    /// Finalize every run whose deadline has passed.
    async fn expire<Sr: Sender<PublicKey = P>>(
        &mut self,
        sender: &mut WrappedSender<Sr, Message<V>>,
    ) {
        let now = self.context.current();
        let expired: Vec<Token> = self
            .active
            .iter()
            .filter(|(_, run)| run.deadline() <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            self.metrics.timeouts.inc();
            match self.active.remove(&token) {
                Some(Run::Root(root)) => {
                    warn!(
                        %token,
                        reports = root.reports.len(),
                        expected = root.tree.subtrees().len(),
                        "collection timeout"
                    );
                    self.finalize_root(token, root);
                }
                Some(Run::Subtree(run)) => {
                    warn!(
                        %token,
                        subtree = run.subtree,
                        shares = run.shares.len(),
                        expected = run.members.len(),
                        "collection timeout"
                    );
                    self.finalize_subtree(sender, token, run).await;
                }
                None => {}
            }
        }
    }

    /// Send a contribution to `recipient`, subject to our [FaultMode].
    async fn send_upward<Sr: Sender<PublicKey = P>>(
        &mut self,
        sender: &mut WrappedSender<Sr, Message<V>>,
        recipient: u32,
        message: Message<V>,
    ) {
        match self.fault {
            FaultMode::Honest => self.send(sender, &[recipient], message).await,
            FaultMode::Silent | FaultMode::Withhold => {
                debug!(recipient, "withholding contribution");
            }
            FaultMode::Delayed(delay) => {
                let Some(identity) = self.roster.identity(recipient).cloned() else {
                    return;
                };
                let mut sender = sender.clone();
                let priority = self.priority;
                self.context
                    .with_label("delayed")
                    .spawn(move |context| async move {
                        context.sleep(delay).await;
                        if let Err(err) = sender
                            .send(Recipients::One(identity), message, priority)
                            .await
                        {
                            debug!(?err, "failed to send delayed contribution");
                        }
                    });
            }
        }
    }

    async fn send<Sr: Sender<PublicKey = P>>(
        &self,
        sender: &mut WrappedSender<Sr, Message<V>>,
        recipients: &[u32],
        message: Message<V>,
    ) {
        let recipients: Vec<P> = recipients
            .iter()
            .filter_map(|index| self.roster.identity(*index).cloned())
            .collect();
        if recipients.is_empty() {
            return;
        }
        if let Err(err) = sender
            .send(Recipients::Some(recipients), message, self.priority)
            .await
        {
            debug!(?err, "failed to send message");
        }
    }

    /// Remember that `token` is no longer active (so late messages are discarded).
    fn remember(&mut self, token: Token) {
        if !self.finished_set.insert(token) {
            return;
        }
        self.finished.push_back(token);
        while self.finished.len() > self.max_tracked_runs {
            if let Some(oldest) = self.finished.pop_front() {
                self.finished_set.remove(&oldest);
            }
        }
    }
}

