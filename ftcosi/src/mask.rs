//! Participation masks over roster indices.
//!
//! A [Mask] records exactly which members of a roster contributed to an aggregate. It is a
//! [BitVec] whose length always equals the roster size.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, Write};
use commonware_utils::BitVec;
use std::fmt;

/// A fixed-length set of roster indices.
#[derive(Clone, PartialEq, Eq)]
pub struct Mask(BitVec);

impl Mask {
    /// Creates an empty mask over a roster of `len` members.
    pub fn new(len: usize) -> Self {
        Self(BitVec::zeroes(len))
    }

    /// Creates a mask over a roster of `len` members with every index in `indices` set.
    ///
    /// Indices outside of the roster are ignored.
    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = u32>) -> Self {
        let mut mask = Self::new(len);
        for index in indices {
            mask.set(index as usize);
        }
        mask
    }

    /// Returns the size of the roster this mask covers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the mask covers an empty roster.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether `index` is set (or `None` if `index` is outside of the roster).
    pub fn get(&self, index: usize) -> Option<bool> {
        self.0.get(index)
    }

    /// Sets `index`, returning `true` if it was not already set.
    ///
    /// Indices outside of the roster are ignored (and return `false`).
    pub fn set(&mut self, index: usize) -> bool {
        match self.0.get(index) {
            Some(false) => {
                self.0.set(index);
                true
            }
            _ => false,
        }
    }

    /// Returns the number of set indices.
    pub fn count(&self) -> usize {
        self.0.count_ones()
    }

    /// Returns `true` if no index is set.
    pub fn is_clear(&self) -> bool {
        self.count() == 0
    }

    /// Returns `true` if no index is set in both `self` and `other`.
    pub fn is_disjoint(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut both = self.0.clone();
        both.and(&other.0);
        both.count_ones() == 0
    }

    /// Returns `true` if every index set in `self` is also set in `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut missing = other.0.clone();
        missing.invert();
        missing.and(&self.0);
        missing.count_ones() == 0
    }

    /// Sets every index that is set in `other`.
    ///
    /// # Panics
    ///
    /// Panics if the masks cover rosters of different sizes.
    pub fn union(&mut self, other: &Self) {
        assert_eq!(self.len(), other.len(), "mask length mismatch");
        self.0.or(&other.0);
    }

    /// Returns an iterator over all set indices (in ascending order).
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, bit)| *bit)
            .map(|(index, _)| index as u32)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mask(")?;
        for bit in self.0.iter() {
            write!(f, "{}", if bit { '1' } else { '0' })?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count(), self.len())
    }
}

impl Write for Mask {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Mask {
    /// The expected roster size.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, expected: &usize) -> Result<Self, CodecError> {
        let bits = BitVec::read_cfg(buf, &RangeCfg::from(*expected..=*expected))?;
        Ok(Self(bits))
    }
}

impl EncodeSize for Mask {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}
