use crate::{
    access::classify,
    graph::{Graph, Member, Node},
    instance::Instance,
    semantics::SemanticRegistry,
    table::LinkTable,
    types::InstrId,
};
use thiserror::Error;
use tracing::{debug, error};

/// Error kind for graph construction failures.
///
/// A chain whose hazards are unknown cannot be scheduled: treating a
/// missing type as "touches nothing" would silently drop orderings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    /// The chain contains a type with no registered access sets.
    #[error("no semantic information for instrument {instr} at chain position {position}")]
    MissingSemantics {
        /// Offending type.
        instr: InstrId,
        /// First chain position holding it.
        position: usize,
    },
}

impl Graph {
    /// Build the graph of a chain with the given type signature.
    ///
    /// - One individual node per chain position, in chain order. Build
    ///   order is chain order.
    /// - `table[(i, j)]` for every `i < j` is the classification of node
    ///   `i`'s access sets against node `j`'s. Entries with `i >= j` stay
    ///   [`Link::None`](crate::access::Link::None), so the table starts
    ///   upper-triangular.
    /// - Nodes without strong predecessors are the initial roots, and the
    ///   lowest of them is the baseline first root.
    ///
    /// The graph is returned reset and ready for its first pass.
    ///
    /// # Errors
    /// If some type in `signature` is not registered.
    pub fn build(signature: &[InstrId], registry: &SemanticRegistry) -> Result<Self, BuildError> {
        // Phase 1: one node per instance, keeping the chain position so the
        // node can be rebound to a different chain with the same signature.
        let nodes = signature
            .iter()
            .enumerate()
            .map(|(position, &instr)| {
                let Some(semantics) = registry.get(instr) else {
                    error!(%instr, position, "chain contains an instrument without semantic information");
                    return Err(BuildError::MissingSemantics { instr, position });
                };
                Ok(Node::Individual(Member {
                    position,
                    semantics: semantics.clone(),
                }))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Phase 2: the full pairwise table over build order.
        let count = nodes.len();
        let mut table = LinkTable::new(count);
        for (row, earlier) in nodes.iter().enumerate() {
            let earlier = earlier.members()[0].semantics.access();
            for (col, later) in nodes.iter().enumerate().skip(row + 1) {
                let later = later.members()[0].semantics.access();
                table[(row, col)] = classify(earlier, later);
            }
        }

        // Phase 3: roots, in-degrees and the serial max-roots pass.
        let graph = Self::from_parts(nodes, table, count);
        debug!(
            nodes = graph.count(),
            weight = graph.weight(),
            max_roots = graph.max_roots(),
            "built graph"
        );
        Ok(graph)
    }

    /// Build the graph for the chain's current instances.
    ///
    /// # Errors
    /// If some instance's type is not registered.
    pub fn build_chain<I: Instance>(chain: &[I], registry: &SemanticRegistry) -> Result<Self, BuildError> {
        let signature: Vec<InstrId> = chain.iter().map(I::instr_id).collect();
        Self::build(&signature, registry)
    }
}
