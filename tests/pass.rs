#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use core::num::NonZeroU16;
use pass_dag::{
    access::{AccessSets, Link},
    cache::{CacheConfig, GraphCache},
    config::{Config, SchedulerConfig},
    graph::Graph,
    instance::Instance,
    scheduler::Scheduler,
    semantics::{SemanticRegistry, TypeSemantics},
    types::{InstrId, NodeId},
};
use proptest::prelude::*;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

fn iid(x: u16) -> InstrId {
    NonZeroU16::new(x).unwrap()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Event {
    Start(NodeId),
    Done(NodeId),
}

/// Drain `graph` with `workers` threads, logging when each node starts
/// and when it finishes.
fn drain(graph: &Graph, workers: usize) -> Vec<Event> {
    let log = Mutex::new(Vec::new());
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                while let Some(id) = graph.consume() {
                    log.lock().unwrap().push(Event::Start(id));
                    thread::yield_now();
                    log.lock().unwrap().push(Event::Done(id));
                    graph.consume_update(id);
                }
            });
        }
    });
    log.into_inner().unwrap()
}

fn check_log(graph: &Graph, log: &[Event]) {
    let position = |event: Event| log.iter().position(|&e| e == event);
    for node in 0..graph.count() {
        let starts = log
            .iter()
            .filter(|&&e| matches!(e, Event::Start(id) if id.index() == node))
            .count();
        assert_eq!(starts, 1, "node {node} ran {starts} times");
    }
    assert_eq!(log.len(), 2 * graph.count());
    for from in 0..graph.count() {
        for to in 0..graph.count() {
            if graph.table()[(from, to)] == Link::Strong {
                let done = position(Event::Done(NodeId::from_index(from))).unwrap();
                let start = position(Event::Start(NodeId::from_index(to))).unwrap();
                assert!(done < start, "#{to} started before #{from} finished");
            }
        }
    }
}

/// Access of one type to one global: 0 none, 1 read, 2 write, 3 read-write.
fn arb_registry(types: u16, globals: usize) -> impl Strategy<Value = SemanticRegistry> {
    proptest::collection::vec(
        (proptest::collection::vec(0u8..4, globals), 1u32..20),
        types as usize,
    )
    .prop_map(|specs| {
        let mut registry = SemanticRegistry::new();
        for (idx, (access, weight)) in specs.into_iter().enumerate() {
            let mut sets = AccessSets::new();
            for (global, kind) in access.into_iter().enumerate() {
                let var = [format!("g{global}")];
                sets = match kind {
                    1 => sets.reads(var),
                    2 => sets.writes(var),
                    3 => sets.read_writes(var),
                    _ => sets,
                };
            }
            let id = u16::try_from(idx + 1).unwrap();
            registry.register(TypeSemantics::new(iid(id), format!("t{id}"), sets, weight));
        }
        registry
    })
}

fn arb_case() -> impl Strategy<Value = (SemanticRegistry, Vec<InstrId>, usize)> {
    (
        arb_registry(5, 4),
        proptest::collection::vec((1u16..=5).prop_map(iid), 0..14),
        1usize..5,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_node_runs_once_after_its_strong_predecessors(
        (registry, signature, workers) in arb_case()
    ) {
        let graph = Graph::build(&signature, &registry).unwrap();
        for _ in 0..2 {
            let log = drain(&graph, workers);
            check_log(&graph, &log);
            prop_assert!(graph.is_finished());
            graph.reset();
        }
    }

    #[test]
    fn optimized_graphs_drain_correctly(
        (registry, signature, workers) in arb_case()
    ) {
        let mut graph = Graph::build(&signature, &registry).unwrap();
        graph.optimize(core::num::NonZeroUsize::new(workers).unwrap());
        let log = drain(&graph, workers);
        check_log(&graph, &log);
        let members: usize = graph.nodes().iter().map(|node| node.members().len()).sum();
        prop_assert_eq!(members, signature.len());
    }

    #[test]
    fn reset_twice_is_reset_once(
        (registry, signature, _workers) in arb_case()
    ) {
        let graph = Graph::build(&signature, &registry).unwrap();
        let baseline = graph.snapshot();
        if let Some(id) = graph.consume() {
            graph.consume_update(id);
        }
        graph.reset();
        let once = graph.snapshot();
        graph.reset();
        prop_assert_eq!(&graph.snapshot(), &once);
        prop_assert_eq!(once, baseline);
    }
}

#[test]
fn example_chain_unlocks_b_after_a() {
    let mut registry = SemanticRegistry::new();
    registry.register(TypeSemantics::new(iid(1), "a", AccessSets::new().writes(["gk"]), 1));
    registry.register(TypeSemantics::new(iid(2), "b", AccessSets::new().reads(["gk"]), 1));
    registry.register(TypeSemantics::new(iid(3), "c", AccessSets::new().reads(["gother"]), 1));
    let graph = Graph::build(&[iid(1), iid(2), iid(3)], &registry).unwrap();

    assert_eq!(graph.snapshot().roots, vec![true, false, true]);
    assert_eq!(graph.max_roots(), 2);

    let a = graph.consume().unwrap();
    assert_eq!(a.index(), 0);
    assert!(!graph.snapshot().roots[1]);
    graph.consume_update(a);
    assert!(graph.snapshot().roots[1]);

    let mut rest = vec![graph.consume().unwrap(), graph.consume().unwrap()];
    for &id in &rest {
        graph.consume_update(id);
    }
    assert!(graph.consume().is_none());
    rest.sort();
    assert_eq!(rest, vec![NodeId::from_index(1), NodeId::from_index(2)]);
}

#[derive(Debug)]
struct Voice {
    instr: InstrId,
    runs: AtomicUsize,
}

impl Voice {
    fn new(instr: u16) -> Self {
        Self {
            instr: iid(instr),
            runs: AtomicUsize::new(0),
        }
    }
}

impl Instance for Voice {
    fn instr_id(&self) -> InstrId {
        self.instr
    }
}

#[test]
fn chains_with_equal_signatures_share_one_graph() {
    let mut registry = SemanticRegistry::new();
    registry.register(TypeSemantics::new(iid(1), "src", AccessSets::new().writes(["gk"]), 1));
    registry.register(TypeSemantics::new(iid(2), "dst", AccessSets::new().reads(["gk"]), 1));
    let mut cache = GraphCache::new(CacheConfig::default());

    let first: Vec<Voice> = [1, 2, 2].into_iter().map(Voice::new).collect();
    let second: Vec<Voice> = [1, 2, 2].into_iter().map(Voice::new).collect();

    let mut graphs = Vec::new();
    for chain in [&first, &second] {
        let signature: Vec<InstrId> = chain.iter().map(Instance::instr_id).collect();
        let graph = cache
            .fetch(&signature, || Graph::build(&signature, &registry))
            .unwrap();
        let pass = graph.bind(chain);
        thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    while let Some(dispatch) = pass.consume() {
                        for voice in dispatch.instances() {
                            voice.runs.fetch_add(1, Ordering::Relaxed);
                        }
                        pass.consume_update(&dispatch);
                    }
                });
            }
        });
        drop(pass);
        assert!(graph.is_finished());
        graphs.push(graph);
    }

    assert!(Arc::ptr_eq(&graphs[0], &graphs[1]));
    for voice in first.iter().chain(&second) {
        assert_eq!(voice.runs.load(Ordering::Relaxed), 1);
    }
}

struct Engine;

impl Config for Engine {
    type Instance = Voice;
}

#[test]
fn scheduler_runs_every_instance_of_every_pass() {
    let mut scheduler = Scheduler::<Engine>::new(SchedulerConfig {
        workers: 3,
        ..SchedulerConfig::default()
    })
    .unwrap();
    scheduler.register_type(iid(1), "bus", AccessSets::new().read_writes(["gabus"]));
    scheduler.register_type(iid(2), "voice", AccessSets::new().reads(["gkpitch"]));
    scheduler.register_type(iid(3), "mixer", AccessSets::new().reads(["gabus"]));

    let chain: Vec<Voice> = [2, 2, 2, 2, 2, 2, 2, 1, 3].into_iter().map(Voice::new).collect();
    for _ in 0..10 {
        let summary = scheduler
            .run_pass(&chain, |voice| {
                voice.runs.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(summary.instances, chain.len());
    }
    for voice in &chain {
        assert_eq!(voice.runs.load(Ordering::Relaxed), 10);
    }
    let stats = scheduler.cache_stats();
    assert_eq!((stats.entries, stats.hits), (1, 9));
    assert_eq!(stats.optimized, 1);
}
