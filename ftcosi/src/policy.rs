//! Decide whether a set of participants is sufficient to accept a signature.

use crate::mask::Mask;
use std::fmt;

/// Evaluates whether the participants recorded in a [Mask] are sufficient to accept
/// an aggregate signature.
///
/// Implementations must be pure and monotonic: if a mask is accepted, every superset
/// of that mask must also be accepted.
pub trait Policy: Clone + fmt::Display + Send + Sync + 'static {
    /// Returns `true` if the participants in `mask` are sufficient for a roster of
    /// `roster_size` members.
    fn accept(&self, mask: &Mask, roster_size: usize) -> bool;
}

/// A [Policy] that accepts any mask with at least some number of participants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Threshold {
    /// A fixed number of participants, independent of the roster size.
    Count(usize),

    /// At least `ceil(n * numerator / denominator)` participants.
    Fraction { numerator: u32, denominator: u32 },

    /// More than half of the roster (`floor(n / 2) + 1`).
    Majority,

    /// Every member of the roster.
    Complete,
}

impl Threshold {
    /// At least two thirds of the roster (rounded up).
    pub const TWO_THIRDS: Self = Self::Fraction {
        numerator: 2,
        denominator: 3,
    };

    /// Returns the number of participants required for a roster of `n` members.
    pub fn minimum(&self, n: usize) -> usize {
        match *self {
            Self::Count(count) => count,
            Self::Fraction {
                numerator,
                denominator,
            } => {
                let denominator = denominator.max(1) as u64;
                ((n as u64) * numerator as u64).div_ceil(denominator) as usize
            }
            Self::Majority => n / 2 + 1,
            Self::Complete => n,
        }
    }
}

impl Policy for Threshold {
    fn accept(&self, mask: &Mask, roster_size: usize) -> bool {
        if mask.len() != roster_size {
            return false;
        }
        mask.count() >= self.minimum(roster_size)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "at least {count}"),
            Self::Fraction {
                numerator,
                denominator,
            } => write!(f, "at least ⌈{numerator}n/{denominator}⌉"),
            Self::Majority => write!(f, "more than n/2"),
            Self::Complete => write!(f, "all n"),
        }
    }
}

/// A [Policy] that additionally requires a fixed set of roster indices to participate.
///
/// Useful when some roles (i.e. the leader) must always be part of an accepted signature.
#[derive(Clone, Debug)]
pub struct Required<P: Policy> {
    indices: Vec<u32>,
    inner: P,
}

impl<P: Policy> Required<P> {
    /// Wrap `inner`, additionally requiring every index in `indices`.
    pub fn new(indices: Vec<u32>, inner: P) -> Self {
        Self { indices, inner }
    }
}

impl<P: Policy> Policy for Required<P> {
    fn accept(&self, mask: &Mask, roster_size: usize) -> bool {
        self.indices
            .iter()
            .all(|index| mask.get(*index as usize).unwrap_or(false))
            && self.inner.accept(mask, roster_size)
    }
}

impl<P: Policy> fmt::Display for Required<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} including {:?}", self.inner, self.indices)
    }
}
