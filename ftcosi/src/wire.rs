//! Types sent over the wire.

use crate::{scheme::Aggregate, token::Token};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::bls12381::primitives::variant::Variant;
use std::time::Duration;

/// Tag of a [Message::Proposal].
const PROPOSAL: u8 = 0;
/// Tag of a [Message::Share].
const SHARE: u8 = 1;
/// Tag of a [Message::Partial].
const PARTIAL: u8 = 2;

/// Configuration used when decoding a [Message].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Maximum size of a proposal payload.
    pub max_message_size: usize,
    /// Size of the roster (every mask must cover exactly this many members).
    pub roster_size: usize,
}

/// A proposal to collectively sign, sent from the root down the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub token: Token,
    pub round: u64,
    /// Roster index of the root of the tree.
    pub leader: u32,
    /// Number of subtrees the root partitioned the roster into.
    pub subtrees: u32,
    /// How long subleaders collect shares before reporting.
    pub subtree_timeout: Duration,
    pub payload: Bytes,
}

/// A single member's signature over a proposal, sent to its subleader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Share<V: Variant> {
    pub token: Token,
    /// Roster index of the signer.
    pub index: u32,
    pub signature: V::Signature,
}

/// A subtree's aggregate, sent from a subleader to the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partial<V: Variant> {
    pub token: Token,
    /// Position of the subtree in the tree.
    pub subtree: u32,
    pub aggregate: Aggregate<V>,
}

/// Message exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message<V: Variant> {
    Proposal(Proposal),
    Share(Share<V>),
    Partial(Partial<V>),
}

impl<V: Variant> Message<V> {
    /// Returns the [Token] of the run the message belongs to.
    pub fn token(&self) -> &Token {
        match self {
            Self::Proposal(proposal) => &proposal.token,
            Self::Share(share) => &share.token,
            Self::Partial(partial) => &partial.token,
        }
    }
}

impl<V: Variant> Write for Message<V> {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Proposal(proposal) => {
                PROPOSAL.write(writer);
                proposal.token.write(writer);
                proposal.round.write(writer);
                proposal.leader.write(writer);
                proposal.subtrees.write(writer);
                u64::try_from(proposal.subtree_timeout.as_millis())
                    .unwrap_or(u64::MAX)
                    .write(writer);
                (proposal.payload.len() as u32).write(writer);
                writer.put_slice(&proposal.payload);
            }
            Self::Share(share) => {
                SHARE.write(writer);
                share.token.write(writer);
                share.index.write(writer);
                share.signature.write(writer);
            }
            Self::Partial(partial) => {
                PARTIAL.write(writer);
                partial.token.write(writer);
                partial.subtree.write(writer);
                partial.aggregate.write(writer);
            }
        }
    }
}

impl<V: Variant> Read for Message<V> {
    type Cfg = Config;

    fn read_cfg(reader: &mut impl Buf, cfg: &Config) -> Result<Self, CodecError> {
        let tag = u8::read(reader)?;
        let token = Token::read(reader)?;
        match tag {
            PROPOSAL => {
                let round = u64::read(reader)?;
                let leader = u32::read(reader)?;
                let subtrees = u32::read(reader)?;
                let subtree_timeout = Duration::from_millis(u64::read(reader)?);
                let len = u32::read(reader)? as usize;
                if len > cfg.max_message_size {
                    return Err(CodecError::Invalid("Proposal", "payload too large"));
                }
                if reader.remaining() < len {
                    return Err(CodecError::EndOfBuffer);
                }
                let payload = reader.copy_to_bytes(len);
                Ok(Self::Proposal(Proposal {
                    token,
                    round,
                    leader,
                    subtrees,
                    subtree_timeout,
                    payload,
                }))
            }
            SHARE => {
                let index = u32::read(reader)?;
                let signature = V::Signature::read(reader)?;
                Ok(Self::Share(Share {
                    token,
                    index,
                    signature,
                }))
            }
            PARTIAL => {
                let subtree = u32::read(reader)?;
                let aggregate = Aggregate::<V>::read_cfg(reader, &cfg.roster_size)?;
                Ok(Self::Partial(Partial {
                    token,
                    subtree,
                    aggregate,
                }))
            }
            tag => Err(CodecError::InvalidEnum(tag)),
        }
    }
}

impl<V: Variant> EncodeSize for Message<V> {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + Token::SIZE
            + match self {
                Self::Proposal(proposal) => {
                    u64::SIZE
                        + u32::SIZE
                        + u32::SIZE
                        + u64::SIZE
                        + u32::SIZE
                        + proposal.payload.len()
                }
                Self::Share(_) => u32::SIZE + V::Signature::SIZE,
                Self::Partial(partial) => u32::SIZE + partial.aggregate.encode_size(),
            }
    }
}
