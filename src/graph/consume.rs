use crate::{
    graph::{ConsumeSnapshot, Graph, Progress},
    sync::{lock, wait},
    types::NodeId,
};
use tracing::{error, trace};

impl Graph {
    /// Restore the build-time baseline so the graph can serve another pass.
    ///
    /// Resetting twice in a row yields identical state.
    ///
    /// # Panics
    /// If a [`Pass`](crate::graph::Pass) currently borrows the graph.
    pub fn reset(&self) {
        let mut state = lock(&self.state, "Graph::reset");
        if state.bound {
            // Unlock first: the pass holding the graph keeps draining.
            drop(state);
            panic!("Graph::reset: graph is bound to a running pass");
        }
        state.restore(&self.baseline, self.nodes.len());
    }

    /// Take the next ready node, blocking until one is available.
    ///
    /// Returns `None` once every node of the pass has been handed out; the
    /// worker that observes this wakes all other waiters so they observe
    /// it too.
    ///
    /// Admission is a counting gate: `permits` equals the number of ready
    /// roots that have been announced, so exactly as many workers proceed
    /// as there are roots to take. The admitted worker takes `first_root`,
    /// then scans for the next ready root. A root that no earlier scan or
    /// update had announced grows the gate by one and wakes one waiter.
    ///
    /// # Panics
    /// If the gate admits a worker while no root is designated, which means
    /// the bookkeeping is corrupt.
    #[must_use]
    pub fn consume(&self) -> Option<NodeId> {
        let mut state = lock(&self.state, "Graph::consume");
        loop {
            if state.remaining == 0 {
                drop(state);
                self.ready.notify_all();
                return None;
            }
            if state.permits > 0 {
                break;
            }
            state = wait(&self.ready, state, "Graph::consume");
        }
        state.permits -= 1;

        let Some(root) = state.first_root.take() else {
            let remaining = state.remaining;
            drop(state);
            error!(remaining, "expected a root to consume, found none\n{self}");
            panic!("Graph::consume: expected a root to consume, found none ({remaining} remaining)");
        };
        debug_assert!(state.roots[root], "Graph::consume: [1]");
        debug_assert_eq!(state.progress[root], Progress::Pending, "Graph::consume: [2]");
        state.roots[root] = false;
        state.progress[root] = Progress::Claimed;
        state.remaining -= 1;

        if state.remaining > 0 {
            if let Some(next) = state.roots.iter().position(|&ready| ready) {
                state.first_root = Some(next);
                if !state.seen[next] {
                    state.seen[next] = true;
                    state.permits += 1;
                    self.ready.notify_one();
                }
            }
        } else {
            self.ready.notify_all();
        }
        trace!(node = root, remaining = state.remaining, "consumed");
        Some(NodeId(root))
    }

    /// Report that node `id` finished executing.
    ///
    /// Decrements the in-degree of every strong successor. Each successor
    /// whose in-degree reaches zero becomes a ready root, grows the gate by
    /// one and wakes one waiter; the first of them becomes `first_root` if
    /// no root is currently designated. All successors are processed before
    /// the call returns, so every root the node unlocks is visible to the
    /// next `consume`.
    ///
    /// # Panics
    /// If `id` is out of range, was not handed out by [`Graph::consume`] in
    /// this pass, or was already reported.
    pub fn consume_update(&self, id: NodeId) {
        let NodeId(node) = id;
        assert!(
            node < self.nodes.len(),
            "Graph::consume_update: node {node} outside the graph ({} nodes)",
            self.nodes.len()
        );
        // The table is immutable after build and optimization; only the
        // counters below need the lock.
        let row = self.table.row(node);

        let mut state = lock(&self.state, "Graph::consume_update");
        assert_eq!(
            state.progress[node],
            Progress::Claimed,
            "Graph::consume_update: node {node} was not consumed in this pass"
        );
        state.progress[node] = Progress::Completed;
        for (col, link) in row.iter().enumerate() {
            if !link.is_strong() {
                continue;
            }
            let degree = &mut state.in_degree[col];
            *degree = degree.checked_sub(1).expect("Graph::consume_update: [1]");
            if *degree == 0 {
                state.roots[col] = true;
                state.seen[col] = true;
                state.permits += 1;
                if state.first_root.is_none() {
                    state.first_root = Some(col);
                }
                trace!(node, root = col, "found root");
                self.ready.notify_one();
            }
        }
    }

    /// Stop handing out nodes and release every waiter.
    ///
    /// Used when a worker panicked mid-pass: the nodes it would have
    /// unlocked never become roots, so the remaining workers would block
    /// forever. The graph must be reset before its next pass.
    pub(crate) fn abandon(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.remaining = 0;
            state.first_root = None;
            state.permits = 0;
        }
        self.ready.notify_all();
    }

    /// `true` once every node of the current pass has been handed out.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        lock(&self.state, "Graph::is_finished").remaining == 0
    }

    /// Copy of the current consumption state.
    #[must_use]
    pub fn snapshot(&self) -> ConsumeSnapshot {
        let state = lock(&self.state, "Graph::snapshot");
        ConsumeSnapshot {
            in_degree: state.in_degree.clone(),
            roots: state.roots.clone(),
            remaining: state.remaining,
            first_root: state.first_root.map(NodeId),
        }
    }
}
