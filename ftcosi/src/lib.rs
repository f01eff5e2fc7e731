//! Collectively sign messages with BLS12-381 over a fault-tolerant tree.
//!
//! Any participant in a [Roster] can start a run (becoming the root of a [topology::Tree]) to
//! collect a single aggregate signature over a message from every other participant. The root
//! partitions all other participants into size-balanced subtrees and sends the proposal to the
//! leader of each subtree (a subleader). Subleaders forward the proposal to their members,
//! collect signature shares until every member responds or a subtree timeout elapses, and report
//! a [Aggregate] (the aggregate signature and a [Mask] of who contributed) to the root. The root
//! merges every report that arrives before its own (longer) timeout with its own share and
//! accepts the result only if its [Policy] is satisfied and the aggregate verifies.
//!
//! Because every subleader reports exactly once (even if no member responded), the root can
//! finish as soon as all subtrees have reported instead of always waiting for its timeout.
//! Participants that do not respond (or respond too late) are simply absent from the final
//! [Mask].
//!
//! # Status
//!
//! `commonware-ftcosi` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.
//!
//! # Example
//!
//! ```rust
//! use commonware_ftcosi::{
//!     scheme::{verify, Signer},
//!     Aggregate, Mask, Policy, Threshold,
//! };
//! use commonware_cryptography::bls12381::primitives::{ops, variant::MinSig};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // Generate keys for 4 participants
//! let mut rng = StdRng::seed_from_u64(0);
//! let (privates, publics): (Vec<_>, Vec<_>) =
//!     (0..4).map(|_| ops::keypair::<_, MinSig>(&mut rng)).unzip();
//!
//! // Three participants sign
//! let shares: Vec<_> = privates[..3]
//!     .iter()
//!     .map(|private| Signer::<MinSig>::new(private.clone()).sign(b"ns", b"msg").unwrap())
//!     .collect();
//! let aggregate = Aggregate::<MinSig>::from_shares(
//!     4,
//!     shares.iter().enumerate().map(|(i, share)| (i as u32, share)),
//! );
//! assert_eq!(aggregate.mask(), &Mask::from_indices(4, [0, 1, 2]));
//!
//! // Accept if at least two thirds participated
//! let certificate = verify(&aggregate, &publics, b"ns", b"msg", &Threshold::TWO_THIRDS).unwrap();
//! assert!(Threshold::TWO_THIRDS.accept(&certificate.mask, 4));
//! ```

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

mod completion;
mod config;
mod engine;
mod error;
mod ingress;
pub mod mask;
mod metrics;
pub mod policy;
pub mod scheme;
pub mod token;
pub mod topology;
pub mod wire;

pub use completion::Completion;
pub use config::{Config, FaultMode, Request};
pub use engine::Engine;
pub use error::{Error, VerificationError};
pub use ingress::Mailbox;
pub use mask::Mask;
pub use policy::{Policy, Threshold};
pub use scheme::{Aggregate, Certificate};
pub use token::{Protocol, Token};
pub use topology::Roster;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheme::Signer, wire::Message};
    use bytes::Bytes;
    use commonware_codec::{Decode, Encode};
    use commonware_cryptography::{
        bls12381::primitives::{group, ops, variant::MinSig},
        ed25519, PrivateKeyExt as _, Signer as _,
    };
    use commonware_macros::{select, test_traced};
    use commonware_p2p::{simulated, Receiver as _, Recipients, Sender as _};
    use commonware_runtime::{deterministic, Clock, Metrics as _, Runner};
    use rand::{rngs::StdRng, SeedableRng};
    use std::{collections::BTreeMap, num::NonZeroUsize, time::Duration};

    const NAMESPACE: &[u8] = b"ftcosi_test";
    const TIMEOUT: Duration = Duration::from_secs(1);

    type PublicKey = ed25519::PublicKey;
    type Link = (simulated::Sender<PublicKey>, simulated::Receiver<PublicKey>);

    /// Describes the participants of a test network.
    struct Setup {
        n: usize,
        policy: Threshold,
        branching: Option<NonZeroUsize>,
        faults: Vec<(u32, FaultMode)>,
        unavailable: Vec<u32>,
        mismatched: Vec<u32>,
        manual: Vec<u32>,
    }

    impl Setup {
        fn new(n: usize, policy: Threshold) -> Self {
            Self {
                n,
                policy,
                branching: None,
                faults: Vec::new(),
                unavailable: Vec::new(),
                mismatched: Vec::new(),
                manual: Vec::new(),
            }
        }
    }

    /// A running network of engines (and the links of participants driven by the test).
    struct Network {
        oracle: simulated::Oracle<PublicKey>,
        roster: Roster<PublicKey, MinSig>,
        privates: Vec<group::Private>,
        mailboxes: BTreeMap<u32, Mailbox<MinSig>>,
        manual: BTreeMap<u32, Link>,
    }

    async fn start(context: &deterministic::Context, setup: &Setup) -> Network {
        // Generate keys
        let mut rng = StdRng::seed_from_u64(setup.n as u64);
        let mut participants = Vec::with_capacity(setup.n);
        let mut privates = Vec::with_capacity(setup.n);
        for seed in 0..setup.n {
            let identity = ed25519::PrivateKey::from_seed(seed as u64).public_key();
            let (private, public) = ops::keypair::<_, MinSig>(&mut rng);
            participants.push((identity, public));
            privates.push(private);
        }
        let roster = Roster::<PublicKey, MinSig>::new(participants).unwrap();

        // Connect all participants
        let (network, mut oracle) = simulated::Network::new(
            context.with_label("network"),
            simulated::Config {
                max_size: 1024 * 1024,
            },
        );
        network.start();
        let mut links = Vec::with_capacity(setup.n);
        for identity in roster.identities() {
            links.push(oracle.register(identity.clone(), 0).await.unwrap());
        }
        for from in roster.identities() {
            for to in roster.identities() {
                if from == to {
                    continue;
                }
                let link = simulated::Link {
                    latency: 10.0,
                    jitter: 1.0,
                    success_rate: 1.0,
                };
                oracle
                    .add_link(from.clone(), to.clone(), link)
                    .await
                    .unwrap();
            }
        }

        // Start engines
        let mut mailboxes = BTreeMap::new();
        let mut manual = BTreeMap::new();
        for (index, link) in links.into_iter().enumerate() {
            let index = index as u32;
            if setup.manual.contains(&index) {
                manual.insert(index, link);
                continue;
            }
            let signer = if setup.unavailable.contains(&index) {
                Signer::unavailable()
            } else if setup.mismatched.contains(&index) {
                let (other, _) = ops::keypair::<_, MinSig>(&mut rng);
                Signer::new(other)
            } else {
                Signer::new(privates[index as usize].clone())
            };
            let fault = setup
                .faults
                .iter()
                .find(|(faulty, _)| *faulty == index)
                .map(|(_, fault)| *fault)
                .unwrap_or_default();
            let cfg = Config {
                identity: roster.identity(index).unwrap().clone(),
                signer,
                roster: roster.clone(),
                namespace: NAMESPACE.to_vec(),
                policy: setup.policy,
                subtree_timeout_fraction: 0.5,
                branching: setup.branching,
                fault,
                mailbox_size: 16,
                max_message_size: 1024,
                max_tracked_runs: 16,
                priority: false,
            };
            let (engine, mailbox) =
                Engine::new(context.with_label(&format!("node_{index}")), cfg).unwrap();
            engine.start(link);
            mailboxes.insert(index, mailbox);
        }
        Network {
            oracle,
            roster,
            privates,
            mailboxes,
            manual,
        }
    }

    fn request(message: &'static [u8], subtrees: usize) -> Request {
        Request {
            message: Bytes::from_static(message),
            subtrees,
            timeout: TIMEOUT,
        }
    }

    fn codec(n: usize) -> wire::Config {
        wire::Config {
            max_message_size: 1024,
            roster_size: n,
        }
    }

    /// Wait for the next proposal delivered to a manually driven participant.
    async fn next_proposal(link: &mut Link, n: usize) -> (PublicKey, wire::Proposal) {
        loop {
            let (peer, msg) = link.1.recv().await.unwrap();
            let msg = Message::<MinSig>::decode_cfg(msg, &codec(n)).unwrap();
            if let Message::Proposal(proposal) = msg {
                return (peer, proposal);
            }
        }
    }

    #[test_traced]
    fn test_all_honest() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            let policy = Threshold::Majority;
            let mut network = start(&context, &Setup::new(7, policy)).await;

            let begin = context.current();
            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"hello", 2)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask.count(), 7);
            certificate
                .verify(network.roster.publics(), NAMESPACE, b"hello", &policy)
                .unwrap();

            // Every subtree reported, so the root did not wait for its timeout
            assert!(context.current().duration_since(begin).unwrap() < TIMEOUT);

            // The outcome can only be read once
            assert_eq!(completion.wait().await, Err(Error::AlreadyConsumed));

            let metrics = context.encode();
            assert!(metrics.contains("node_0_started_total 1"));
            assert!(metrics.contains("node_0_succeeded_total 1"));
        });
    }

    #[test_traced]
    fn test_silent_leaves() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // 9 participants, 3 subtrees: [1, 2, 3], [4, 5, 6], [7, 8]
            let policy = Threshold::TWO_THIRDS;
            let mut setup = Setup::new(9, policy);
            setup.faults = vec![
                (2, FaultMode::Silent),
                (6, FaultMode::Silent),
                (8, FaultMode::Silent),
            ];
            let mut network = start(&context, &setup).await;

            let begin = context.current();
            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"block", 3)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask, Mask::from_indices(9, [0, 1, 3, 4, 5, 7]));
            certificate
                .verify(network.roster.publics(), NAMESPACE, b"block", &policy)
                .unwrap();

            // Subleaders report after the subtree timeout (not the global timeout)
            let elapsed = context.current().duration_since(begin).unwrap();
            assert!(elapsed >= TIMEOUT / 2);
            assert!(elapsed < TIMEOUT);
        });
    }

    #[test_traced]
    fn test_insufficient_participation() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            let mut setup = Setup::new(9, Threshold::TWO_THIRDS);
            setup.faults = vec![
                (2, FaultMode::Silent),
                (3, FaultMode::Withhold),
                (5, FaultMode::Silent),
                (8, FaultMode::Withhold),
            ];
            let mut network = start(&context, &setup).await;

            let begin = context.current();
            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"block", 3)).await.unwrap();
            let result = completion.wait().await;
            assert!(matches!(
                result,
                Err(Error::InsufficientParticipation {
                    participants: 5,
                    ..
                })
            ));
            assert!(context.current().duration_since(begin).unwrap() < TIMEOUT);

            let metrics = context.encode();
            assert!(metrics.contains("node_0_failed_total 1"));
        });
    }

    #[test_traced]
    fn test_silent_subleader() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // The members of a silent subleader never receive the proposal
            let policy = Threshold::TWO_THIRDS;
            let mut setup = Setup::new(9, policy);
            setup.faults = vec![(4, FaultMode::Silent)];
            let mut network = start(&context, &setup).await;

            let begin = context.current();
            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"block", 3)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask, Mask::from_indices(9, [0, 1, 2, 3, 7, 8]));

            // The root waited for its full timeout (but not much longer)
            let elapsed = context.current().duration_since(begin).unwrap();
            assert!(elapsed >= TIMEOUT);
            assert!(elapsed < TIMEOUT + Duration::from_millis(100));
            let metrics = context.encode();
            assert!(metrics.contains("node_0_timeouts_total 1"));
        });
    }

    #[test_traced]
    fn test_delayed_past_subtree_timeout() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // 7 participants, 2 subtrees: [1, 2, 3], [4, 5, 6]
            let policy = Threshold::Count(3);
            let mut setup = Setup::new(7, policy);
            setup.faults = vec![
                (3, FaultMode::Delayed(Duration::from_millis(800))),
                (4, FaultMode::Delayed(Duration::from_secs(2))),
            ];
            let mut network = start(&context, &setup).await;

            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"late", 2)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask, Mask::from_indices(7, [0, 1, 2]));

            // Late contributions arrive after the run finished (and are discarded)
            context.sleep(Duration::from_secs(3)).await;

            // A new run is unaffected
            let mut completion = mailbox.start(request(b"next", 2)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask.count(), 3);
        });
    }

    #[test_traced]
    fn test_unavailable_key_material() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            let policy = Threshold::Majority;
            let mut setup = Setup::new(7, policy);
            setup.unavailable = vec![0, 5];
            let mut network = start(&context, &setup).await;

            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"hello", 2)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask, Mask::from_indices(7, [1, 2, 3, 4, 6]));
        });
    }

    #[test_traced]
    fn test_branching() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // Each subtree of 7 is a binary tree of depth 2 below its subleader
            let policy = Threshold::Complete;
            let mut setup = Setup::new(15, policy);
            setup.branching = NonZeroUsize::new(2);
            let mut network = start(&context, &setup).await;

            let begin = context.current();
            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"deep", 2)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask.count(), 15);
            assert!(context.current().duration_since(begin).unwrap() < TIMEOUT);
        });
    }

    #[test_traced]
    fn test_concurrent_runs() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            let policy = Threshold::Complete;
            let mut network = start(&context, &Setup::new(7, policy)).await;

            // Start runs at two different roots (and two at the same root)
            let mut first = network
                .mailboxes
                .get_mut(&0)
                .unwrap()
                .start(request(b"first", 2))
                .await
                .unwrap();
            let mut second = network
                .mailboxes
                .get_mut(&4)
                .unwrap()
                .start(request(b"second", 3))
                .await
                .unwrap();
            let mut third = network
                .mailboxes
                .get_mut(&0)
                .unwrap()
                .start(request(b"third", 6))
                .await
                .unwrap();

            let publics = network.roster.publics();
            for (completion, message) in [
                (&mut first, b"first".as_slice()),
                (&mut second, b"second".as_slice()),
                (&mut third, b"third".as_slice()),
            ] {
                let certificate = completion.wait().await.unwrap();
                assert_eq!(certificate.mask.count(), 7);
                certificate
                    .verify(publics, NAMESPACE, message, &policy)
                    .unwrap();
            }
        });
    }

    #[test_traced]
    fn test_invalid_request() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            let mut network = start(&context, &Setup::new(7, Threshold::Majority)).await;
            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            for subtrees in [0, 7] {
                assert!(matches!(
                    mailbox.start(request(b"hello", subtrees)).await,
                    Err(Error::Configuration(_))
                ));
            }
            let zero = Request {
                timeout: Duration::ZERO,
                ..request(b"hello", 2)
            };
            assert!(matches!(
                mailbox.start(zero).await,
                Err(Error::Configuration(_))
            ));
            let huge = Request {
                timeout: Duration::from_secs(u64::MAX),
                ..request(b"hello", 2)
            };
            assert!(matches!(
                mailbox.start(huge).await,
                Err(Error::Configuration(_))
            ));

            // The engine keeps serving valid requests
            let mut completion = mailbox.start(request(b"hello", 2)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask.count(), 7);
        });
    }

    #[test_traced]
    fn test_mismatched_key_material() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // The root signs with a key that does not match its roster entry
            let mut setup = Setup::new(7, Threshold::Majority);
            setup.mismatched = vec![0];
            let mut network = start(&context, &setup).await;

            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"hello", 2)).await.unwrap();
            let result = completion.wait().await;
            assert!(matches!(result, Err(Error::VerificationFailed(_))));

            let metrics = context.encode();
            assert!(metrics.contains("node_0_failed_total 1"));
        });
    }

    #[test_traced]
    fn test_unreachable_subleader() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // 9 participants, 3 subtrees: [1, 2, 3], [4, 5, 6], [7, 8]
            let policy = Threshold::TWO_THIRDS;
            let mut network = start(&context, &Setup::new(9, policy)).await;
            let root = network.roster.identity(0).unwrap().clone();
            let subleader = network.roster.identity(4).unwrap().clone();
            network.oracle.remove_link(root, subleader).await.unwrap();

            let begin = context.current();
            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"block", 3)).await.unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask, Mask::from_indices(9, [0, 1, 2, 3, 7, 8]));
            assert!(context.current().duration_since(begin).unwrap() >= TIMEOUT);
        });
    }

    #[test_traced]
    fn test_replayed_proposal() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // 3 participants, 1 subtree: subleader 1 (driven by the test) with member 2
            let mut setup = Setup::new(3, Threshold::Complete);
            setup.manual = vec![1];
            let mut network = start(&context, &setup).await;
            let member = network.roster.identity(2).unwrap().clone();

            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let _completion = mailbox.start(request(b"hello", 1)).await.unwrap();
            let mut link = network.manual.remove(&1).unwrap();
            let (_, proposal) = next_proposal(&mut link, 3).await;

            // Forward the same proposal to the member three times
            let forward: Bytes = Message::<MinSig>::Proposal(proposal.clone())
                .encode()
                .into();
            for _ in 0..3 {
                link.0
                    .send(Recipients::One(member.clone()), forward.clone(), false)
                    .await
                    .unwrap();
            }

            // The member signs only once
            let mut shares = 0;
            loop {
                select! {
                    msg = link.1.recv() => {
                        let (peer, msg) = msg.unwrap();
                        assert_eq!(peer, member);
                        let msg = Message::<MinSig>::decode_cfg(msg, &codec(3)).unwrap();
                        let Message::Share(share) = msg else {
                            panic!("unexpected message");
                        };
                        assert_eq!(share.token, proposal.token);
                        assert_eq!(share.index, 2);
                        shares += 1;
                    },
                    _ = context.sleep(Duration::from_millis(500)) => {
                        break;
                    },
                }
            }
            assert_eq!(shares, 1);
        });
    }

    #[test_traced]
    fn test_invalid_and_duplicate_shares() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // 4 participants, 1 subtree: subleader 1 with members 2 and 3 (driven by the test)
            let policy = Threshold::Complete;
            let mut setup = Setup::new(4, policy);
            setup.manual = vec![2, 3];
            let mut network = start(&context, &setup).await;
            let subleader = network.roster.identity(1).unwrap().clone();

            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"hello", 1)).await.unwrap();

            // Both members receive the proposal from the subleader
            let mut link_2 = network.manual.remove(&2).unwrap();
            let mut link_3 = network.manual.remove(&3).unwrap();
            let (peer, proposal) = next_proposal(&mut link_3, 4).await;
            assert_eq!(peer, subleader);
            let (_, proposal_2) = next_proposal(&mut link_2, 4).await;
            assert_eq!(proposal, proposal_2);

            let share = |index: u32, message: &[u8]| -> Bytes {
                let signer = Signer::<MinSig>::new(network.privates[index as usize].clone());
                Message::<MinSig>::Share(wire::Share {
                    token: proposal.token,
                    index,
                    signature: signer.sign(NAMESPACE, message).unwrap(),
                })
                .encode()
                .into()
            };

            // Member 3 sends an invalid share, then a valid share (twice)
            let invalid = share(3, b"tampered");
            let valid = share(3, &proposal.payload[..]);
            for msg in [invalid, valid.clone(), valid] {
                link_3
                    .0
                    .send(Recipients::One(subleader.clone()), msg, false)
                    .await
                    .unwrap();
                context.sleep(Duration::from_millis(50)).await;
            }

            // Member 3 cannot submit a share on behalf of member 2
            link_3
                .0
                .send(Recipients::One(subleader.clone()), share(2, &proposal.payload[..]), false)
                .await
                .unwrap();
            context.sleep(Duration::from_millis(50)).await;

            // Member 2 sends its share
            link_2
                .0
                .send(Recipients::One(subleader.clone()), share(2, &proposal.payload[..]), false)
                .await
                .unwrap();

            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask.count(), 4);
            let metrics = context.encode();
            assert!(metrics.contains("node_1_shares_total 2"));
            assert!(metrics.contains("node_1_invalid_total 2"));
        });
    }

    #[test_traced]
    fn test_invalid_and_late_partials() {
        let runner = deterministic::Runner::timed(Duration::from_secs(30));
        runner.start(|context| async move {
            // 4 participants, 2 subtrees: [1, 2] (driven by the test), [3]
            let policy = Threshold::Count(3);
            let mut setup = Setup::new(4, policy);
            setup.manual = vec![1];
            let mut network = start(&context, &setup).await;
            let root = network.roster.identity(0).unwrap().clone();

            let mailbox = network.mailboxes.get_mut(&0).unwrap();
            let mut completion = mailbox.start(request(b"hello", 2)).await.unwrap();
            let mut link = network.manual.remove(&1).unwrap();
            let (_, proposal) = next_proposal(&mut link, 4).await;

            let signer = Signer::<MinSig>::new(network.privates[1].clone());
            let own = signer.sign(NAMESPACE, &proposal.payload).unwrap();
            let partial = |subtree: u32, aggregate: Aggregate<MinSig>| -> Bytes {
                Message::<MinSig>::Partial(wire::Partial {
                    token: proposal.token,
                    subtree,
                    aggregate,
                })
                .encode()
                .into()
            };

            // A partial claiming a participant outside of the subtree is rejected
            let other = Signer::<MinSig>::new(network.privates[3].clone())
                .sign(NAMESPACE, &proposal.payload)
                .unwrap();
            let outside = Aggregate::from_shares(4, [(1, &own), (3, &other)]);
            link.0
                .send(Recipients::One(root.clone()), partial(0, outside), false)
                .await
                .unwrap();
            context.sleep(Duration::from_millis(50)).await;

            // A partial for another subtree is rejected
            let valid = Aggregate::from_shares(4, [(1, &own)]);
            link.0
                .send(Recipients::One(root.clone()), partial(1, valid.clone()), false)
                .await
                .unwrap();
            context.sleep(Duration::from_millis(50)).await;

            // A valid partial completes the run (0, 1, and 3 participate)
            link.0
                .send(Recipients::One(root.clone()), partial(0, valid.clone()), false)
                .await
                .unwrap();
            let certificate = completion.wait().await.unwrap();
            assert_eq!(certificate.mask, Mask::from_indices(4, [0, 1, 3]));

            // A late partial is discarded without being counted as invalid
            link.0
                .send(Recipients::One(root.clone()), partial(0, valid), false)
                .await
                .unwrap();
            context.sleep(Duration::from_millis(50)).await;
            let metrics = context.encode();
            assert!(metrics.contains("node_0_invalid_total 2"));
            assert!(metrics.contains("node_0_partials_total 2"));
        });
    }

    #[test_traced]
    fn test_engine_rejects_foreign_identity() {
        let runner = deterministic::Runner::timed(Duration::from_secs(5));
        runner.start(|context| async move {
            let mut rng = StdRng::seed_from_u64(0);
            let participants: Vec<_> = (0..3)
                .map(|seed| {
                    let identity = ed25519::PrivateKey::from_seed(seed).public_key();
                    let (_, public) = ops::keypair::<_, MinSig>(&mut rng);
                    (identity, public)
                })
                .collect();
            let cfg = Config {
                identity: ed25519::PrivateKey::from_seed(10).public_key(),
                signer: Signer::<MinSig>::unavailable(),
                roster: Roster::new(participants).unwrap(),
                namespace: NAMESPACE.to_vec(),
                policy: Threshold::Majority,
                subtree_timeout_fraction: 0.5,
                branching: None,
                fault: FaultMode::Honest,
                mailbox_size: 16,
                max_message_size: 1024,
                max_tracked_runs: 16,
                priority: false,
            };
            assert!(matches!(
                Engine::new(context, cfg),
                Err(Error::Configuration(_))
            ));
        });
    }
}
