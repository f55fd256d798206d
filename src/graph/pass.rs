use crate::{
    graph::{Graph, Node},
    instance::Instance,
    sync::lock,
    types::NodeId,
};
use derive_more::Debug;

/// A graph bound to the live instances of one pass.
///
/// Nodes refer to chain positions, so binding rebinds every node to the
/// instance now occupying its position. The graph is marked busy while
/// the pass exists; resetting or rebinding it in that time is a protocol
/// violation.
#[derive(Debug)]
pub struct Pass<'g, 'c, I> {
    graph: &'g Graph,
    #[debug(skip)]
    chain: &'c [I],
}

/// A node handed to a worker together with its bound instances.
#[derive(Debug)]
pub struct Dispatch<'g, 'c, I> {
    id: NodeId,
    node: &'g Node,
    #[debug(skip)]
    chain: &'c [I],
}

impl Graph {
    /// Bind the graph to `chain` for one pass.
    ///
    /// # Panics
    /// - If `chain` does not have the signature the graph was built for.
    /// - If the graph is already bound, or has been consumed from since the
    ///   last [`Graph::reset`].
    pub fn bind<'g, 'c, I: Instance>(&'g self, chain: &'c [I]) -> Pass<'g, 'c, I> {
        assert_eq!(
            chain.len(),
            self.chain_len,
            "Graph::bind: chain has {} instances, graph was built for {}",
            chain.len(),
            self.chain_len
        );
        for node in &self.nodes {
            for member in node.members() {
                assert_eq!(
                    chain[member.position].instr_id(),
                    member.instr_id(),
                    "Graph::bind: chain position {} has a different instrument",
                    member.position
                );
            }
        }
        let mut state = lock(&self.state, "Graph::bind");
        // Misuse must not poison the graph for its next pass.
        if state.bound {
            drop(state);
            panic!("Graph::bind: graph is already bound to a pass");
        }
        if !(state.is_idle() && state.remaining == self.nodes.len()) {
            drop(state);
            panic!("Graph::bind: graph was not reset since its last pass");
        }
        state.bound = true;
        Pass { graph: self, chain }
    }
}

impl<'g, 'c, I> Pass<'g, 'c, I> {
    /// Graph being drained.
    #[must_use]
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Chain the graph is bound to.
    #[must_use]
    pub fn chain(&self) -> &'c [I] {
        self.chain
    }
}

impl<'g, 'c, I: Instance> Pass<'g, 'c, I> {
    /// Take the next ready node. See [`Graph::consume`].
    #[must_use]
    pub fn consume(&self) -> Option<Dispatch<'g, 'c, I>> {
        let id = self.graph.consume()?;
        Some(Dispatch {
            id,
            node: self.graph.node(id),
            chain: self.chain,
        })
    }

    /// Report a dispatched node as finished. See [`Graph::consume_update`].
    pub fn consume_update(&self, dispatch: &Dispatch<'g, 'c, I>) {
        self.graph.consume_update(dispatch.id);
    }
}

impl<I> Drop for Pass<'_, '_, I> {
    fn drop(&mut self) {
        // A poisoned lock means a worker panicked; leave the graph marked
        // busy rather than panic again while unwinding.
        if let Ok(mut state) = self.graph.state.lock() {
            state.bound = false;
        }
    }
}

impl<'g, 'c, I: Instance> Dispatch<'g, 'c, I> {
    /// Index of the node in its graph.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The dispatched node.
    #[must_use]
    pub fn node(&self) -> &'g Node {
        self.node
    }

    /// Bound instances in execution order.
    pub fn instances(&self) -> impl ExactSizeIterator<Item = &'c I> + use<'g, 'c, I> {
        let chain = self.chain;
        self.node
            .members()
            .iter()
            .map(move |member| &chain[member.position])
    }
}
