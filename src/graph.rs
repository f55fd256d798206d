mod build;
mod consume;
mod dump;
mod optimize;
mod pass;

/// Error returned by [`Graph::build`] when a chain cannot be scheduled.
pub use crate::graph::build::BuildError;
pub use crate::graph::pass::{Dispatch, Pass};
use crate::{
    semantics::TypeSemantics,
    sync::{Condvar, Mutex, lock},
    table::LinkTable,
    types::{InstrId, NodeId},
};
use core::slice;
use std::sync::Arc;

/// Scheduling graph for one instance chain.
///
/// Key responsibilities:
/// - Owns the node array and the pairwise link table, both immutable
///   once building and optimization are done.
/// - Keeps the build-time baseline (in-degrees, roots, first root) that
///   every pass starts from.
/// - Holds the runtime consumption state behind one graph-wide mutex, and
///   a condition variable on which workers wait for roots.
///
/// A graph is built once per distinct chain signature, optionally
/// optimized once, and reused across passes. Each reuse starts with
/// [`Graph::reset`].
#[must_use]
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    table: LinkTable,
    baseline: Baseline,
    chain_len: usize,
    weight: u64,
    max_roots: usize,
    state: Mutex<ConsumeState>,
    ready: Condvar,
}

/// One instance position of the chain, together with its type semantics.
#[derive(Debug, Clone)]
pub struct Member {
    position: usize,
    semantics: Arc<TypeSemantics>,
}

impl Member {
    /// Position of the bound instance in the chain.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Type of the instance at that position.
    #[must_use]
    pub fn instr_id(&self) -> InstrId {
        self.semantics.id()
    }

    /// Type semantics the node was built from.
    #[must_use]
    pub fn semantics(&self) -> &TypeSemantics {
        &self.semantics
    }
}

/// A single dispatch unit.
#[derive(Debug, Clone)]
pub enum Node {
    /// Exactly one instance.
    Individual(Member),
    /// Several mutually independent instances run back to back by one
    /// worker. Produced only by the optimizer.
    Batch(Vec<Member>),
}

impl Node {
    /// Instances covered by the node, in execution order.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        match self {
            Self::Individual(member) => slice::from_ref(member),
            Self::Batch(members) => members,
        }
    }

    /// Sum of member weights.
    #[must_use]
    pub fn weight(&self) -> u64 {
        self.members()
            .iter()
            .map(|member| u64::from(member.semantics.weight()))
            .sum()
    }

    /// `true` for optimizer-produced batches.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

/// Runtime state every pass starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Baseline {
    in_degree: Vec<u32>,
    roots: Vec<bool>,
    first_root: Option<usize>,
}

impl Baseline {
    fn of(table: &LinkTable) -> Self {
        let in_degree: Vec<u32> = (0..table.side())
            .map(|col| table.strong_in_degree(col))
            .collect();
        let roots: Vec<bool> = in_degree.iter().map(|&degree| degree == 0).collect();
        let first_root = roots.iter().position(|&root| root);
        Self {
            in_degree,
            roots,
            first_root,
        }
    }
}

/// Progress of one node within the current pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Progress {
    Pending,
    Claimed,
    Completed,
}

#[derive(Debug)]
struct ConsumeState {
    /// Unresolved strong predecessors per node.
    in_degree: Vec<u32>,
    /// Ready and not yet handed out.
    roots: Vec<bool>,
    /// Ready nodes already accounted for in `permits`.
    seen: Vec<bool>,
    progress: Vec<Progress>,
    /// The ready node the next admitted worker takes.
    first_root: Option<usize>,
    /// Nodes not yet handed out this pass.
    remaining: usize,
    /// Workers that may proceed past the gate. Equals the number of seen
    /// ready roots.
    permits: usize,
    /// A [`Pass`] currently borrows the graph.
    bound: bool,
}

impl ConsumeState {
    fn idle(baseline: &Baseline) -> Self {
        let count = baseline.in_degree.len();
        let mut state = Self {
            in_degree: Vec::new(),
            roots: Vec::new(),
            seen: Vec::new(),
            progress: Vec::new(),
            first_root: None,
            remaining: 0,
            permits: 0,
            bound: false,
        };
        state.restore(baseline, count);
        state
    }

    fn restore(&mut self, baseline: &Baseline, count: usize) {
        self.in_degree.clone_from(&baseline.in_degree);
        self.roots.clone_from(&baseline.roots);
        self.seen.clear();
        self.seen.resize(count, false);
        self.progress.clear();
        self.progress.resize(count, Progress::Pending);
        self.first_root = baseline.first_root;
        self.remaining = count;
        self.permits = 0;
        if let Some(first) = self.first_root {
            self.seen[first] = true;
            self.permits = 1;
        }
    }

    fn is_idle(&self) -> bool {
        self.progress.iter().all(|&progress| progress == Progress::Pending)
    }
}

/// Point-in-time copy of a graph's consumption state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeSnapshot {
    /// Unresolved strong predecessors per node.
    pub in_degree: Vec<u32>,
    /// Nodes that are ready and not yet handed out.
    pub roots: Vec<bool>,
    /// Nodes not yet handed out.
    pub remaining: usize,
    /// Ready node the next worker will take.
    pub first_root: Option<NodeId>,
}

impl Graph {
    fn from_parts(nodes: Vec<Node>, table: LinkTable, chain_len: usize) -> Self {
        assert_eq!(nodes.len(), table.side(), "Graph::from_parts: [1]");
        let weight = nodes.iter().map(Node::weight).sum();
        let baseline = Baseline::of(&table);
        let state = Mutex::new(ConsumeState::idle(&baseline));
        let mut graph = Self {
            nodes,
            table,
            baseline,
            chain_len,
            weight,
            max_roots: 0,
            state,
            ready: Condvar::new(),
        };
        graph.compute_max_roots();
        graph
    }

    /// Recompute roots and in-degrees after the table changed.
    fn rebuild_baseline(&mut self) {
        self.baseline = Baseline::of(&self.table);
        self.compute_max_roots();
    }

    /// Drain the graph on the calling thread, recording the largest number
    /// of simultaneously ready roots.
    fn compute_max_roots(&mut self) {
        self.reset();
        let mut max_roots = 0;
        loop {
            let available = lock(&self.state, "Graph::compute_max_roots")
                .roots
                .iter()
                .filter(|&&root| root)
                .count();
            max_roots = max_roots.max(available);
            let Some(id) = self.consume() else {
                break;
            };
            self.consume_update(id);
        }
        self.max_roots = max_roots;
        self.reset();
    }

    /// Number of nodes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// `true` for a graph built from an empty chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, indexed by [`NodeId`].
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node `id`.
    ///
    /// # Panics
    /// If `id` does not belong to this graph.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Pairwise link table.
    #[must_use]
    pub fn table(&self) -> &LinkTable {
        &self.table
    }

    /// Number of chain positions the graph covers. Differs from
    /// [`Graph::count`] once the optimizer has merged nodes.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.chain_len
    }

    /// Sum of all member weights.
    #[must_use]
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Largest number of simultaneously ready roots observed while
    /// draining the graph serially.
    #[must_use]
    pub fn max_roots(&self) -> usize {
        self.max_roots
    }

    /// Node that holds chain position `position`.
    #[must_use]
    pub fn node_of_position(&self, position: usize) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.members().iter().any(|m| m.position == position))
            .map(NodeId)
    }
}
