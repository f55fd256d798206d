use core::num::NonZeroU16;
use derive_more::{Deref, Display};
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// Identifier of an instance type (an instrument number).
///
/// Access sets and weights are registered per type, and the ordered
/// sequence of type ids of a chain is the cache key of its graph.
pub type InstrId = NonZeroU16;

/// Position of a node in a graph's node array.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{_0}")]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Id of the node at `index`.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Index of the node in its graph.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered sequence of instance type ids of one chain.
///
/// Two chains with the same signature share one cached graph regardless
/// of which live instance objects they contain.
#[derive(Debug, Deref, Clone, PartialEq, Eq, Hash)]
pub struct ChainSignature(Box<[InstrId]>);

impl ChainSignature {
    /// Collect the signature of `chain`.
    pub fn of<I: crate::instance::Instance>(chain: &[I]) -> Self {
        chain.iter().map(I::instr_id).collect()
    }
}

impl FromIterator<InstrId> for ChainSignature {
    fn from_iter<T: IntoIterator<Item = InstrId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<InstrId>> for ChainSignature {
    fn from(ids: Vec<InstrId>) -> Self {
        Self(ids.into_boxed_slice())
    }
}

impl PartialEq<[InstrId]> for ChainSignature {
    fn eq(&self, other: &[InstrId]) -> bool {
        *self.0 == *other
    }
}

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
/// `IndexSet` type with fast hasher.
pub type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
