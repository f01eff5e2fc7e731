//! Rosters and the trees built over them.
//!
//! # Layout
//!
//! A [Tree] is rooted at a leader chosen from the [Roster]. All other members, in roster
//! order, are split into contiguous, size-balanced chunks (the first `(n - 1) % k` chunks
//! receive one extra member). The first member of each chunk is the subleader of that
//! [Subtree] and a direct child of the root. The remaining members of a chunk hang below the
//! subleader, either all as direct children or as a `branching`-ary tree (in roster order).
//!
//! ```txt
//!                 root (leader)
//!         /             |            \
//!   subleader 1    subleader 2    subleader 3
//!    /   |   \       /    \          /   \
//!  ...  ...  ...   ...    ...      ...   ...
//! ```
//!
//! Because the layout is a pure function of the roster size, the leader, the number of
//! subtrees, and the branching factor, every participant derives an identical [Tree] without
//! exchanging it.

use crate::Error;
use bytes::BufMut;
use commonware_codec::Encode;
use commonware_cryptography::{
    bls12381::primitives::variant::Variant, sha256::Digest, Hasher, PublicKey, Sha256,
};
use std::{collections::BTreeMap, num::NonZeroUsize};

/// An ordered set of participants (identified by a network public key) and their BLS public keys.
///
/// The position of a participant in the roster determines its bit in any participation mask.
#[derive(Clone, Debug)]
pub struct Roster<P: PublicKey, V: Variant> {
    identities: Vec<P>,
    publics: Vec<V::Public>,
    indices: BTreeMap<P, u32>,
    digest: Digest,
}

impl<P: PublicKey, V: Variant> Roster<P, V> {
    /// Create a new [Roster] from an ordered list of participants.
    ///
    /// Returns an error if the list is empty or contains a duplicate identity.
    pub fn new(participants: Vec<(P, V::Public)>) -> Result<Self, Error> {
        if participants.is_empty() {
            return Err(Error::Configuration("roster is empty".into()));
        }
        let mut hasher = Sha256::new();
        let mut identities = Vec::with_capacity(participants.len());
        let mut publics = Vec::with_capacity(participants.len());
        let mut indices = BTreeMap::new();
        for (index, (identity, public)) in participants.into_iter().enumerate() {
            if indices.insert(identity.clone(), index as u32).is_some() {
                return Err(Error::Configuration(format!(
                    "duplicate roster identity: {identity}"
                )));
            }
            hasher.update(&identity.encode());
            hasher.update(&public.encode());
            identities.push(identity);
            publics.push(public);
        }
        Ok(Self {
            identities,
            publics,
            indices,
            digest: hasher.finalize(),
        })
    }

    /// Returns the number of participants.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns `true` if the roster has no participants (never the case for a constructed roster).
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Returns the network identity of the participant at `index`.
    pub fn identity(&self, index: u32) -> Option<&P> {
        self.identities.get(index as usize)
    }

    /// Returns the BLS public key of the participant at `index`.
    pub fn public(&self, index: u32) -> Option<&V::Public> {
        self.publics.get(index as usize)
    }

    /// Returns the BLS public keys of all participants (in roster order).
    pub fn publics(&self) -> &[V::Public] {
        &self.publics
    }

    /// Returns the network identities of all participants (in roster order).
    pub fn identities(&self) -> &[P] {
        &self.identities
    }

    /// Returns the roster index of `identity`.
    pub fn index(&self, identity: &P) -> Option<u32> {
        self.indices.get(identity).copied()
    }

    /// Returns a digest committing to every participant (and their order).
    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

/// A subleader and the members it aggregates for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subtree {
    /// The roster index of the subleader.
    pub leader: u32,
    /// The roster indices of all other members (in roster order).
    pub members: Vec<u32>,
}

impl Subtree {
    /// Returns the number of participants in the subtree (including the subleader).
    pub fn size(&self) -> usize {
        self.members.len() + 1
    }

    /// Returns `true` if `index` is the subleader or a member of the subtree.
    pub fn contains(&self, index: u32) -> bool {
        self.leader == index || self.members.binary_search(&index).is_ok()
    }

    /// Returns an iterator over all participants in the subtree (starting with the subleader).
    pub fn participants(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.leader).chain(self.members.iter().copied())
    }
}

/// A rooted hierarchy over a [Roster] that determines how a proposal is disseminated and how
/// signatures are collected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    root: u32,
    subtrees: Vec<Subtree>,
    parents: Vec<Option<u32>>,
    children: Vec<Vec<u32>>,
    assignments: Vec<Option<u32>>,
    digest: Digest,
}

impl Tree {
    /// Build a [Tree] over a roster of `size` participants rooted at `root` with `subtrees`
    /// subleaders.
    ///
    /// Returns an error if there are fewer than 2 participants, if `root` is not in the roster,
    /// or if `subtrees` is zero or exceeds the number of non-root participants.
    pub fn new(
        size: usize,
        root: u32,
        subtrees: usize,
        branching: Option<NonZeroUsize>,
    ) -> Result<Self, Error> {
        if size < 2 {
            return Err(Error::Configuration(format!(
                "tree requires at least 2 participants (found {size})"
            )));
        }
        if root as usize >= size {
            return Err(Error::Configuration(format!(
                "root {root} not in roster of {size}"
            )));
        }
        let others: Vec<u32> = (0..size as u32).filter(|index| *index != root).collect();
        if subtrees == 0 || subtrees > others.len() {
            return Err(Error::Configuration(format!(
                "cannot partition {} participants into {subtrees} subtrees",
                others.len()
            )));
        }

        // Partition non-root participants into balanced chunks (earlier chunks take the remainder)
        let base = others.len() / subtrees;
        let extra = others.len() % subtrees;
        let mut parents = vec![None; size];
        let mut children = vec![Vec::new(); size];
        let mut assignments = vec![None; size];
        let mut layout = Vec::with_capacity(subtrees);
        let mut offset = 0;
        for subtree in 0..subtrees {
            let length = base + usize::from(subtree < extra);
            let chunk = &others[offset..offset + length];
            offset += length;

            // The first participant of a chunk is its subleader
            let leader = chunk[0];
            parents[leader as usize] = Some(root);
            children[root as usize].push(leader);
            for (position, index) in chunk.iter().enumerate() {
                assignments[*index as usize] = Some(subtree as u32);
                if position == 0 {
                    continue;
                }
                let parent = match branching {
                    Some(branching) => chunk[(position - 1) / branching.get()],
                    None => leader,
                };
                parents[*index as usize] = Some(parent);
                children[parent as usize].push(*index);
            }
            layout.push(Subtree {
                leader,
                members: chunk[1..].to_vec(),
            });
        }

        // Commit to the layout
        let mut hasher = Sha256::new();
        let mut buf = Vec::with_capacity(8 + 4 * size);
        buf.put_u32(size as u32);
        buf.put_u32(root);
        for parent in &parents {
            buf.put_u32(parent.map_or(u32::MAX, |parent| parent));
        }
        for subtree in &layout {
            buf.put_u32(subtree.leader);
            buf.put_u32(subtree.members.len() as u32);
        }
        hasher.update(&buf);

        Ok(Self {
            root,
            subtrees: layout,
            parents,
            children,
            assignments,
            digest: hasher.finalize(),
        })
    }

    /// Returns the roster index of the root.
    pub fn root(&self) -> u32 {
        self.root
    }

    /// Returns the number of participants in the tree.
    pub fn size(&self) -> usize {
        self.parents.len()
    }

    /// Returns the direct children of `index` (in roster order).
    pub fn children(&self, index: u32) -> &[u32] {
        self.children
            .get(index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the parent of `index` (`None` for the root or an unknown index).
    pub fn parent(&self, index: u32) -> Option<u32> {
        self.parents.get(index as usize).copied().flatten()
    }

    /// Returns all subtrees (in the order their subleaders appear in the roster).
    pub fn subtrees(&self) -> &[Subtree] {
        &self.subtrees
    }

    /// Returns the subtree at position `subtree`.
    pub fn subtree(&self, subtree: u32) -> Option<&Subtree> {
        self.subtrees.get(subtree as usize)
    }

    /// Returns the position of the subtree containing `index` (`None` for the root).
    pub fn assignment(&self, index: u32) -> Option<u32> {
        self.assignments.get(index as usize).copied().flatten()
    }

    /// Returns the position of the subtree led by `index` (if `index` is a subleader).
    pub fn led_by(&self, index: u32) -> Option<u32> {
        let subtree = self.assignment(index)?;
        (self.subtrees[subtree as usize].leader == index).then_some(subtree)
    }

    /// Returns a digest committing to the layout.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}
