//! Identify a single execution of a collective signing protocol.

use crate::topology::Tree;
use bytes::{Buf, BufMut};
use commonware_codec::{Error as CodecError, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::{sha256::Digest, Hasher, Sha256};
use commonware_utils::hex;
use std::fmt;

/// Protocols that can be executed over a [Tree].
///
/// The tag of a protocol is committed to in every [Token], so messages from one protocol can
/// never be mistaken for messages of another (even over the same roster and round).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protocol {
    /// Fault-tolerant collective BLS signing.
    FtCosi = 0,
}

impl Protocol {
    /// Returns the tag of the protocol.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Returns the human-readable name of the protocol.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FtCosi => "ftcosi",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a single run, used to route every message to the correct in-flight run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(Digest);

impl Token {
    /// Derive the [Token] of a run of `protocol` over the roster committed to by `roster`,
    /// laid out as `tree`, in `round`.
    pub fn new(protocol: Protocol, roster: &Digest, tree: &Tree, round: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&[protocol.tag()]);
        hasher.update(roster.as_ref());
        hasher.update(tree.digest().as_ref());
        hasher.update(&round.to_be_bytes());
        Self(hasher.finalize())
    }

    /// Returns the underlying digest.
    pub fn digest(&self) -> &Digest {
        &self.0
    }
}

impl Write for Token {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Token {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(Digest::read(buf)?))
    }
}

impl FixedSize for Token {
    const SIZE: usize = Digest::SIZE;
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(self.0.as_ref()))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the prefix is needed to tell runs apart in logs
        write!(f, "{}", hex(&self.0.as_ref()[..8]))
    }
}
