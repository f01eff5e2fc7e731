//! Sign, aggregate, and verify collective signatures over BLS12-381.
//!
//! Every participant signs the same message (under a shared namespace), so signatures can be
//! aggregated by point addition and verified with a single pairing check against the sum of the
//! participants' public keys (selected by a [Mask]).
//!
//! # Warning
//!
//! Aggregating public keys is only safe if every public key in the roster was checked for
//! a proof-of-possession before it was admitted (otherwise an attacker can construct a rogue key
//! that cancels out other participants).

use crate::{mask::Mask, policy::Policy, Error, VerificationError};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::bls12381::primitives::{
    group::{self, Element},
    ops,
    variant::Variant,
};
use std::marker::PhantomData;

/// Produces signature shares with a participant's local key material.
#[derive(Clone)]
pub struct Signer<V: Variant> {
    private: Option<group::Private>,
    _variant: PhantomData<V>,
}

impl<V: Variant> Signer<V> {
    /// Create a new [Signer] from a private key.
    pub fn new(private: group::Private) -> Self {
        Self {
            private: Some(private),
            _variant: PhantomData,
        }
    }

    /// Create a [Signer] without key material (every attempt to sign will fail).
    pub fn unavailable() -> Self {
        Self {
            private: None,
            _variant: PhantomData,
        }
    }

    /// Returns the public key of the [Signer] (if key material is available).
    pub fn public(&self) -> Option<V::Public> {
        self.private.as_ref().map(ops::compute_public::<V>)
    }

    /// Sign `message` under `namespace`.
    pub fn sign(&self, namespace: &[u8], message: &[u8]) -> Result<V::Signature, Error> {
        let private = self.private.as_ref().ok_or(Error::LocalSigning)?;
        Ok(ops::sign_message::<V>(private, Some(namespace), message))
    }
}

/// Verify a single signature share against the public key of its signer.
pub fn verify_share<V: Variant>(
    public: &V::Public,
    namespace: &[u8],
    message: &[u8],
    share: &V::Signature,
) -> bool {
    ops::verify_message::<V>(public, Some(namespace), message, share).is_ok()
}

/// Aggregate the public keys of all participants set in `mask`.
///
/// Indices in `mask` that are outside of `publics` are ignored.
pub fn aggregate_public_keys<V: Variant>(publics: &[V::Public], mask: &Mask) -> V::Public {
    ops::aggregate_public_keys::<V, _>(mask.iter().filter_map(|index| publics.get(index as usize)))
}

/// Verify an aggregate signature against an aggregate public key.
pub fn verify_aggregate<V: Variant>(
    signature: &V::Signature,
    public: &V::Public,
    namespace: &[u8],
    message: &[u8],
) -> bool {
    ops::verify_message::<V>(public, Some(namespace), message, signature).is_ok()
}

/// An aggregate signature over some subset of a roster.
///
/// The empty aggregate (no participants) carries no signature, so it can never be mistaken for
/// a real signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate<V: Variant> {
    mask: Mask,
    signature: Option<V::Signature>,
}

impl<V: Variant> Aggregate<V> {
    /// The empty aggregate over a roster of `roster_size` members.
    pub fn empty(roster_size: usize) -> Self {
        Self {
            mask: Mask::new(roster_size),
            signature: None,
        }
    }

    /// Aggregate a set of signature shares tagged with their roster index.
    ///
    /// Shares for an index that was already folded in (or that is outside of the roster)
    /// are ignored.
    pub fn from_shares<'a, I>(roster_size: usize, shares: I) -> Self
    where
        I: IntoIterator<Item = (u32, &'a V::Signature)>,
        V::Signature: 'a,
    {
        let mut mask = Mask::new(roster_size);
        let mut included = Vec::new();
        for (index, share) in shares {
            if mask.set(index as usize) {
                included.push(share);
            }
        }
        if included.is_empty() {
            return Self::empty(roster_size);
        }
        Self {
            mask,
            signature: Some(ops::aggregate_signatures::<V, _>(included)),
        }
    }

    /// Fold `other` into `self`.
    ///
    /// # Panics
    ///
    /// Panics if `other` includes a participant that is already included in `self`.
    pub fn merge(&mut self, other: &Self) {
        assert!(
            self.mask.is_disjoint(&other.mask),
            "aggregates must have disjoint participants"
        );
        self.mask.union(&other.mask);
        self.signature = match (self.signature, other.signature) {
            (Some(mut signature), Some(other)) => {
                signature.add(&other);
                Some(signature)
            }
            (signature, None) => signature,
            (None, other) => other,
        };
    }

    /// Returns the participants included in the aggregate.
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Returns the aggregate signature (or `None` if the aggregate is empty).
    pub fn signature(&self) -> Option<&V::Signature> {
        self.signature.as_ref()
    }

    /// Returns the number of participants included in the aggregate.
    pub fn count(&self) -> usize {
        self.mask.count()
    }

    /// Returns `true` if no participant is included.
    pub fn is_empty(&self) -> bool {
        self.signature.is_none()
    }

    /// Verify the aggregate against the public keys of its participants (ignoring any
    /// participation policy).
    pub fn verify(
        &self,
        publics: &[V::Public],
        namespace: &[u8],
        message: &[u8],
    ) -> Result<(), VerificationError> {
        if self.mask.len() != publics.len() {
            return Err(VerificationError::RosterMismatch(
                self.mask.len(),
                publics.len(),
            ));
        }
        let Some(signature) = &self.signature else {
            return Err(VerificationError::EmptyAggregate);
        };
        let public = aggregate_public_keys::<V>(publics, &self.mask);
        if !verify_aggregate::<V>(signature, &public, namespace, message) {
            return Err(VerificationError::InvalidSignature);
        }
        Ok(())
    }
}

impl<V: Variant> Write for Aggregate<V> {
    fn write(&self, buf: &mut impl BufMut) {
        self.mask.write(buf);
        match &self.signature {
            Some(signature) => {
                buf.put_u8(1);
                signature.write(buf);
            }
            None => buf.put_u8(0),
        }
    }
}

impl<V: Variant> Read for Aggregate<V> {
    /// The roster size.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, roster_size: &usize) -> Result<Self, CodecError> {
        let mask = Mask::read_cfg(buf, roster_size)?;
        let signature = match u8::read(buf)? {
            0 => None,
            1 => Some(V::Signature::read(buf)?),
            tag => return Err(CodecError::InvalidEnum(tag)),
        };
        if signature.is_none() != mask.is_clear() {
            return Err(CodecError::Invalid(
                "Aggregate",
                "signature presence does not match mask",
            ));
        }
        Ok(Self { mask, signature })
    }
}

impl<V: Variant> EncodeSize for Aggregate<V> {
    fn encode_size(&self) -> usize {
        self.mask.encode_size()
            + 1
            + self.signature.as_ref().map_or(0, |_| V::Signature::SIZE)
    }
}

/// A collective signature accepted by a [Policy].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate<V: Variant> {
    /// The participants whose shares are included in `signature`.
    pub mask: Mask,
    /// The aggregate signature.
    pub signature: V::Signature,
}

impl<V: Variant> Certificate<V> {
    /// Verify the certificate (see [verify]).
    pub fn verify<P: Policy>(
        &self,
        publics: &[V::Public],
        namespace: &[u8],
        message: &[u8],
        policy: &P,
    ) -> Result<(), Error> {
        let aggregate = Aggregate::<V> {
            mask: self.mask.clone(),
            signature: Some(self.signature),
        };
        verify(&aggregate, publics, namespace, message, policy).map(|_| ())
    }
}

impl<V: Variant> Write for Certificate<V> {
    fn write(&self, buf: &mut impl BufMut) {
        self.mask.write(buf);
        self.signature.write(buf);
    }
}

impl<V: Variant> Read for Certificate<V> {
    /// The roster size.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, roster_size: &usize) -> Result<Self, CodecError> {
        let mask = Mask::read_cfg(buf, roster_size)?;
        let signature = V::Signature::read(buf)?;
        Ok(Self { mask, signature })
    }
}

impl<V: Variant> EncodeSize for Certificate<V> {
    fn encode_size(&self) -> usize {
        self.mask.encode_size() + V::Signature::SIZE
    }
}

/// Verify an [Aggregate] under `policy`, returning a [Certificate] if it is accepted.
///
/// Both conditions must hold for the aggregate to be accepted:
/// - at least one participant contributed and `policy` accepts the participants in the
///   aggregate's mask (otherwise [Error::InsufficientParticipation]).
/// - the aggregate signature verifies against the aggregate of the participants' public
///   keys (otherwise [Error::VerificationFailed]).
pub fn verify<V: Variant, P: Policy>(
    aggregate: &Aggregate<V>,
    publics: &[V::Public],
    namespace: &[u8],
    message: &[u8],
    policy: &P,
) -> Result<Certificate<V>, Error> {
    if aggregate.mask.len() != publics.len() {
        return Err(VerificationError::RosterMismatch(aggregate.mask.len(), publics.len()).into());
    }
    if aggregate.is_empty() || !policy.accept(&aggregate.mask, publics.len()) {
        return Err(Error::InsufficientParticipation {
            participants: aggregate.count(),
            policy: policy.to_string(),
        });
    }
    aggregate.verify(publics, namespace, message)?;
    let signature = aggregate
        .signature
        .ok_or(Error::VerificationFailed(VerificationError::EmptyAggregate))?;
    Ok(Certificate {
        mask: aggregate.mask.clone(),
        signature,
    })
}
