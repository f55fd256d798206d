//! Dependency-graph scheduler for the instances of a synthesis pass.
//!
//! Every pass of an audio engine runs a chain of instances, each belonging
//! to a type with known access sets over shared globals. This crate decides
//! which instances may run concurrently and drains the chain across worker
//! threads without ever running two hazard-linked instances out of order.
//! It:
//! - Classifies every ordered pair of instances as strongly linked (a
//!   write is involved), weakly linked (shared read-write only) or
//!   unrelated, and builds the pairwise link table of a chain.
//! - Optionally merges runs of mutually independent instances into one
//!   batch per worker, so short instances do not pay a hand-off each.
//! - Hands ready nodes to workers through a counting gate on one
//!   graph-wide lock, waking exactly one waiter per newly discovered root
//!   and all waiters once the pass is drained.
//! - Caches built graphs by chain signature, so a recurring sequence of
//!   types is scheduled without rebuilding, and evicts cold shapes by
//!   usage and age decay.
//!
//! Key modules:
//! - `access`: access sets and the link classifier.
//! - `graph`: graph building, optimization, consumption and binding to a
//!   chain's live instances.
//! - `cache`: the graph cache and its statistics.
//! - `scheduler`: the service object tying registry, weights, thresholds,
//!   cache and worker pool together.
//!
//! Quick start:
//! 1. Implement [`Instance`](instance::Instance) for your live instance
//!    handle and bind it with [`Config`](config::Config).
//! 2. Create a [`Scheduler`](scheduler::Scheduler) and register the access
//!    sets of every type.
//! 3. Call [`Scheduler::run_pass`](scheduler::Scheduler::run_pass) once per
//!    pass with the current chain.
//!
//! Graphs can also be driven by hand: [`Graph::build`](graph::Graph::build),
//! then [`Graph::consume`](graph::Graph::consume) and
//! [`Graph::consume_update`](graph::Graph::consume_update) from any number
//! of threads.

/// Access sets of instance types and the pairwise link classifier.
pub mod access;
/// Graphs keyed by chain signature, with usage and age decay.
pub mod cache;
/// Public interface to configure the scheduler.
///
/// Exposes the `Config` trait, which binds the instance type, and the
/// TOML-loadable `SchedulerConfig`.
pub mod config;
/// Worker pool draining bound passes.
pub mod executor;
/// The scheduling graph of one chain.
///
/// Contains building (pairwise classification, roots, in-degrees), the
/// batch optimizer, the concurrent consumption protocol and binding of a
/// cached graph to a pass's live instances.
pub mod graph;
/// The live-instance interface.
pub mod instance;
/// Scheduler service: registry, weights, thresholds, cache and pool.
pub mod scheduler;
/// Per-type access sets and weights.
pub mod semantics;
mod sync;
/// Dense square matrix used for the link table.
pub mod table;
/// Thresholds deciding between parallel and serial passes.
pub mod thresholds;
/// Core identifiers and collection aliases.
pub mod types;
mod utils;
/// Per-type weights from a file and from measured execution times.
pub mod weights;
