use crate::{
    graph::{Graph, Member, Node},
    table::{LinkTable, Matrix},
};
use core::num::NonZeroUsize;
use tracing::{debug, trace};

impl Graph {
    /// Merge blocks of mutually independent nodes into one batch per worker.
    ///
    /// Rows are scanned from the top. At each `starting_row` the search
    /// looks for the largest `target > workers` such that at least `target`
    /// columns at or after `starting_row` receive no strong link from the
    /// rows `starting_row..starting_row + target`. Candidates are then
    /// admitted in column order only while no strong path connects them to
    /// an already admitted candidate, which keeps the rewritten graph
    /// acyclic. When a block of `target` nodes survives, it is spread over
    /// `workers` streams (heaviest remaining node to the stream with fewest
    /// nodes), each stream becomes one [`Node::Batch`], and scanning resumes
    /// after the last inserted batch. Otherwise `starting_row` advances by
    /// one.
    ///
    /// Roots, in-degrees and `max_roots` are recomputed afterwards. Returns
    /// the number of blocks merged.
    ///
    /// The packing is a deterministic heuristic, not an optimal one.
    pub fn optimize(&mut self, workers: NonZeroUsize) -> usize {
        let workers = workers.get();
        let before = self.nodes.len();
        let mut merged = 0;
        let mut starting_row = 0;
        let mut scan = Scan::of(&self.table);
        while starting_row + workers < self.nodes.len() {
            match self.find_block(&mut scan, starting_row, workers) {
                Some(block) => {
                    let streams = self.balance(&block, workers);
                    let last_batch = self.merge(&block, streams);
                    scan = Scan::of(&self.table);
                    merged += 1;
                    starting_row = last_batch + 1;
                }
                None => starting_row += 1,
            }
        }
        if merged > 0 {
            self.rebuild_baseline();
            debug!(
                blocks = merged,
                before,
                after = self.nodes.len(),
                max_roots = self.max_roots,
                "optimized graph"
            );
        }
        merged
    }

    /// Columns of the largest mergeable block starting at `starting_row`.
    fn find_block(&self, scan: &mut Scan, starting_row: usize, workers: usize) -> Option<Vec<usize>> {
        let count = self.nodes.len();
        let Scan { runs, reach } = scan;
        // A column qualifies for `target` when its run covers the whole
        // window `starting_row..starting_row + target`.
        let runs = &runs.row(starting_row)[starting_row..];
        // `covering[t]`: number of columns whose run is at least `t`.
        let mut covering = vec![0usize; count - starting_row + 2];
        for &run in runs {
            covering[run] += 1;
        }
        for t in (0..covering.len() - 1).rev() {
            covering[t] += covering[t + 1];
        }

        for target in (workers + 1..=count - starting_row).rev() {
            if covering[target] < target {
                continue;
            }
            let reach = reach.get_or_insert_with(|| self.table.strong_reachability());
            let mut block = Vec::with_capacity(target);
            for (offset, &run) in runs.iter().enumerate() {
                if run < target {
                    continue;
                }
                let col = starting_row + offset;
                if block
                    .iter()
                    .all(|&member| !reach[(member, col)] && !reach[(col, member)])
                {
                    block.push(col);
                    if block.len() == target {
                        trace!(starting_row, target, ?block, "found block");
                        return Some(block);
                    }
                }
            }
        }
        None
    }

    /// Spread `block` over `workers` streams: repeatedly hand the heaviest
    /// remaining node to the stream holding the fewest nodes. Ties go to the
    /// earlier node and the lower stream.
    fn balance(&self, block: &[usize], workers: usize) -> Vec<Vec<usize>> {
        let mut pending: Vec<(usize, u64)> = block
            .iter()
            .map(|&node| (node, self.nodes[node].weight()))
            .collect();
        let mut streams: Vec<Vec<usize>> = vec![Vec::new(); workers];
        while !pending.is_empty() {
            let heaviest = pending
                .iter()
                .enumerate()
                .fold(0, |best, (idx, &(_, weight))| {
                    if weight > pending[best].1 { idx } else { best }
                });
            let (node, _) = pending.remove(heaviest);
            let stream = streams
                .iter_mut()
                .min_by_key(|stream| stream.len())
                .expect("Graph::balance: [1]");
            stream.push(node);
        }
        streams
    }

    /// Replace the nodes of `block` with one batch per stream.
    ///
    /// Batches take the slots of the first `streams.len()` block members in
    /// node order; the remaining block slots are closed up and every other
    /// node keeps its relative order. The table is rewritten through the
    /// old-to-new index map, keeping the strongest link wherever several
    /// entries collapse onto one cell. Returns the index of the last batch.
    fn merge(&mut self, block: &[usize], streams: Vec<Vec<usize>>) -> usize {
        let old_count = self.nodes.len();
        let mut in_block = vec![false; old_count];
        for &node in block {
            in_block[node] = true;
        }
        let mut stream_of = vec![usize::MAX; old_count];
        for (stream, nodes) in streams.iter().enumerate() {
            for &node in nodes {
                stream_of[node] = stream;
            }
        }

        let mut old_nodes: Vec<Option<Node>> = self.nodes.drain(..).map(Some).collect();
        let mut batches: Vec<Node> = streams
            .iter()
            .map(|nodes| {
                let members: Vec<Member> = nodes
                    .iter()
                    .flat_map(|&node| {
                        old_nodes[node]
                            .take()
                            .expect("Graph::merge: [1]")
                            .members()
                            .to_vec()
                    })
                    .collect();
                Node::Batch(members)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        // Old index -> new index. Block members point at their batch.
        let mut map = vec![usize::MAX; old_count];
        let mut batch_slots = Vec::with_capacity(streams.len());
        let mut nodes = Vec::with_capacity(old_count - block.len() + streams.len());
        for (old, slot) in old_nodes.into_iter().enumerate() {
            if in_block[old] {
                if let Some(batch) = batches.pop() {
                    batch_slots.push(nodes.len());
                    nodes.push(batch);
                }
            } else {
                map[old] = nodes.len();
                nodes.push(slot.expect("Graph::merge: [2]"));
            }
        }
        assert!(batches.is_empty(), "Graph::merge: [3]");
        for (old, &stream) in stream_of.iter().enumerate() {
            if stream != usize::MAX {
                map[old] = batch_slots[stream];
            }
        }

        let mut table = LinkTable::new(nodes.len());
        for row in 0..old_count {
            for (col, &link) in self.table.row(row).iter().enumerate() {
                let (new_row, new_col) = (map[row], map[col]);
                if new_row != new_col {
                    let cell = &mut table[(new_row, new_col)];
                    *cell = cell.merge(link);
                }
            }
        }
        trace!(?streams, ?batch_slots, "merged block");

        self.nodes = nodes;
        self.table = table;
        *batch_slots.last().expect("Graph::merge: [4]")
    }
}

/// Per-table data shared by every `find_block` call until the next merge.
struct Scan {
    /// `runs[(row, col)]`: number of consecutive rows from `row` down
    /// whose link into `col` is not strong.
    runs: Matrix<usize>,
    /// Strong reachability, computed on the first window that passes the
    /// run count filter.
    reach: Option<Matrix<bool>>,
}

impl Scan {
    fn of(table: &LinkTable) -> Self {
        let side = table.side();
        let mut runs = Matrix::<usize>::new(side);
        for row in (0..side).rev() {
            for col in 0..side {
                runs[(row, col)] = if table[(row, col)].is_strong() {
                    0
                } else if row + 1 < side {
                    runs[(row + 1, col)] + 1
                } else {
                    1
                };
            }
        }
        Self { runs, reach: None }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::{
        access::{AccessSets, Link},
        semantics::{SemanticRegistry, TypeSemantics},
        types::InstrId,
    };
    use core::num::NonZeroU16;

    fn iid(x: u16) -> InstrId {
        NonZeroU16::new(x).unwrap()
    }

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    /// Type 1 writes `gk`, types 2..=9 are independent of each other and
    /// of type 1, type 10 reads `gk`.
    fn registry() -> SemanticRegistry {
        let mut registry = SemanticRegistry::new();
        registry.register(TypeSemantics::new(iid(1), "src", AccessSets::new().writes(["gk"]), 1));
        for id in 2..=9 {
            registry.register(TypeSemantics::new(
                iid(id),
                format!("voice{id}"),
                AccessSets::new().reads([format!("own{id}")]),
                u32::from(id),
            ));
        }
        registry.register(TypeSemantics::new(iid(10), "sink", AccessSets::new().reads(["gk"]), 1));
        registry
    }

    #[test]
    fn independent_voices_collapse_into_one_batch_per_worker() {
        let signature: Vec<_> = (2..=9).map(iid).collect();
        let mut graph = Graph::build(&signature, &registry()).unwrap();
        let weight = graph.weight();
        assert_eq!(graph.optimize(workers(2)), 1);
        assert_eq!(graph.count(), 2);
        assert!(graph.nodes().iter().all(Node::is_batch));
        assert_eq!(graph.weight(), weight);
        let members: usize = graph.nodes().iter().map(|n| n.members().len()).sum();
        assert_eq!(members, 8);
        assert_eq!(graph.max_roots(), 2);
    }

    #[test]
    fn balancing_alternates_heaviest_first() {
        let signature: Vec<_> = (2..=9).map(iid).collect();
        let mut graph = Graph::build(&signature, &registry()).unwrap();
        graph.optimize(workers(2));
        let weights: Vec<u64> = graph.nodes().iter().map(Node::weight).collect();
        // 9+7+5+3 and 8+6+4+2.
        assert_eq!(weights, vec![24, 20]);
    }

    #[test]
    fn strong_links_survive_merging() {
        let mut signature = vec![iid(1)];
        signature.extend((2..=7).map(iid));
        signature.push(iid(10));
        let unmerged = Graph::build(&signature, &registry()).unwrap();
        let mut graph = Graph::build(&signature, &registry()).unwrap();
        graph.optimize(workers(2));
        assert!(graph.count() < unmerged.count());
        for row in 0..unmerged.count() {
            for col in 0..unmerged.count() {
                if unmerged.table()[(row, col)] == Link::Strong {
                    let from = graph.node_of_position(row).unwrap().index();
                    let to = graph.node_of_position(col).unwrap().index();
                    assert_ne!(from, to);
                    assert_eq!(graph.table()[(from, to)], Link::Strong);
                }
            }
        }
        // Still acyclic: a serial drain hands out every node.
        let mut drained = 0;
        while let Some(id) = graph.consume() {
            graph.consume_update(id);
            drained += 1;
        }
        assert_eq!(drained, graph.count());
    }

    #[test]
    fn run_lengths_count_non_strong_rows_downwards() {
        let mut signature = vec![iid(1)];
        signature.extend((2..=5).map(iid));
        signature.extend([iid(10), iid(1), iid(10)]);
        let graph = Graph::build(&signature, &registry()).unwrap();
        let scan = Scan::of(graph.table());
        let count = graph.count();
        for start in 0..count {
            for col in 0..count {
                let direct = (start..count)
                    .take_while(|&row| !graph.table()[(row, col)].is_strong())
                    .count();
                assert_eq!(scan.runs[(start, col)], direct, "({start}, {col})");
            }
        }
        assert!(scan.reach.is_none());
    }

    #[test]
    fn long_mixed_chain_merges_and_stays_acyclic() {
        let signature: Vec<_> = (0..400u16).map(|idx| iid(idx % 10 + 1)).collect();
        let unmerged = Graph::build(&signature, &registry()).unwrap();
        let mut graph = Graph::build(&signature, &registry()).unwrap();
        assert!(graph.optimize(workers(4)) > 0);
        assert!(graph.count() < unmerged.count());
        assert_eq!(graph.weight(), unmerged.weight());
        let mut drained = 0;
        while let Some(id) = graph.consume() {
            graph.consume_update(id);
            drained += 1;
        }
        assert_eq!(drained, graph.count());
    }

    #[test]
    fn too_few_nodes_are_left_alone() {
        let signature: Vec<_> = (2..=4).map(iid).collect();
        let mut graph = Graph::build(&signature, &registry()).unwrap();
        assert_eq!(graph.optimize(workers(4)), 0);
        assert_eq!(graph.count(), 3);
        assert!(graph.nodes().iter().all(|n| !n.is_batch()));
    }

    #[test]
    fn strongly_ordered_chain_is_not_merged() {
        let mut registry = SemanticRegistry::new();
        for id in 1..=6u16 {
            registry.register(TypeSemantics::new(
                iid(id),
                format!("stage{id}"),
                AccessSets::new()
                    .read_writes(["ga"])
                    .writes([format!("s{id}")])
                    .reads([format!("s{}", id - 1)]),
                1,
            ));
        }
        let signature: Vec<_> = (1..=6).map(iid).collect();
        let mut graph = Graph::build(&signature, &registry).unwrap();
        assert_eq!(graph.optimize(workers(2)), 0);
        assert_eq!(graph.max_roots(), 1);
    }
}
