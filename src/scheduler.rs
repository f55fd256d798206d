use crate::{
    access::AccessSets,
    cache::{CacheStats, GraphCache},
    config::{Config, ConfigError, SchedulerConfig},
    executor::{Executor, WorkerReport},
    graph::{BuildError, Graph},
    semantics::{SemanticRegistry, TypeSemantics},
    thresholds::Thresholds,
    types::{ChainSignature, HashSet, InstrId},
    weights::WeightTable,
};
use core::{marker::PhantomData, num::NonZeroUsize};
use derive_more::Debug;
use rayon::ThreadPoolBuildError;
use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use tracing::{debug, error, info};

/// Error kind for scheduler startup and pass preparation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    /// Settings or one of the configured files are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A chain could not be turned into a graph.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// The worker pool could not be started.
    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

/// Outcome of one [`Scheduler::run_pass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Nodes dispatched. Smaller than `instances` when batches were used.
    pub nodes: usize,
    /// Instances executed.
    pub instances: usize,
    /// `true` when the pool drained the pass, `false` when it ran on the
    /// calling thread.
    pub parallel: bool,
    /// Workers that executed at least one node.
    pub active_workers: usize,
}

/// Owns everything a pass needs: type semantics, weights, thresholds, the
/// graph cache and the worker pool.
///
/// Several schedulers can coexist in one process; none of them shares
/// state with another. Passes on one scheduler run one at a time.
#[must_use]
#[derive(Debug)]
pub struct Scheduler<C: Config> {
    config: SchedulerConfig,
    workers: NonZeroUsize,
    /// Replaced copy-on-write when measured weights change, so graphs are
    /// built from one consistent set of weights.
    registry: Mutex<Arc<SemanticRegistry>>,
    weights: Mutex<WeightTable>,
    thresholds: Thresholds,
    cache: Mutex<GraphCache>,
    executor: Executor,
    #[debug(skip)]
    running: Mutex<()>,
    #[debug(skip)]
    _marker: PhantomData<fn() -> C>,
}

/// None of the guarded values is left half-updated by a panic: user code
/// only runs while `running` is held, and that guards nothing.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: Config> Scheduler<C> {
    /// Start a scheduler: load the configured weights and thresholds files
    /// and spawn the worker pool.
    ///
    /// # Errors
    /// If the settings are invalid, a configured file cannot be loaded, or
    /// the pool cannot be started.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let workers = config.worker_count()?;
        let weights = match &config.weights_path {
            Some(path) => WeightTable::load(path).inspect_err(|err| error!(%err, "cannot load weights"))?,
            None => WeightTable::new(),
        };
        let thresholds = match &config.thresholds_path {
            Some(path) => Thresholds::load(path).inspect_err(|err| error!(%err, "cannot load thresholds"))?,
            None => Thresholds::default(),
        };
        let source = config
            .thresholds_path
            .as_deref()
            .map_or_else(|| "default".into(), |path| path.display().to_string());
        info!(
            %source,
            weight_min = thresholds.weight_min,
            weight_max = thresholds.weight_max,
            roots_avail_min = thresholds.roots_avail_min,
            roots_avail_max = thresholds.roots_avail_max,
            "parallel scheduling thresholds"
        );
        let executor = Executor::new(workers).inspect_err(|err| error!(%err, "cannot start worker pool"))?;
        info!(
            workers = workers.get(),
            optimize = config.optimize,
            weights = weights.len(),
            "scheduler started"
        );
        Ok(Self {
            cache: Mutex::new(GraphCache::new(config.cache.clone())),
            config,
            workers,
            registry: Mutex::new(Arc::new(SemanticRegistry::new())),
            weights: Mutex::new(weights),
            thresholds,
            executor,
            running: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    /// Settings the scheduler runs with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registered type semantics, as the next pass will see them.
    #[must_use]
    pub fn registry(&self) -> Arc<SemanticRegistry> {
        relock(&self.registry).clone()
    }

    /// Thresholds in effect.
    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Register access sets and weight of a type.
    ///
    /// Replacing the semantics of an already registered type drops every
    /// cached graph, since they were built from the old access sets.
    pub fn register(&mut self, semantics: TypeSemantics) -> Option<Arc<TypeSemantics>> {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        let replaced = Arc::make_mut(registry).register(semantics);
        if let Some(old) = &replaced {
            debug!(instr = %old.id(), name = old.name(), "type semantics replaced, clearing graph cache");
            relock(&self.cache).clear();
        }
        replaced
    }

    /// Register a type, weighing it from the weight table.
    pub fn register_type(&mut self, id: InstrId, name: &str, access: AccessSets) -> Option<Arc<TypeSemantics>> {
        let weight = relock(&self.weights).fetch(name);
        self.register(TypeSemantics::new(id, name, access, weight))
    }

    /// Graph for `chain`, reset and ready to be bound.
    ///
    /// Built, and optimized if enabled, on the first sight of the chain's
    /// signature; served from the cache afterwards. Waits for a running
    /// pass to finish, since that pass may be bound to the same graph.
    ///
    /// # Errors
    /// If the chain holds a type without registered semantics.
    pub fn prepare(&self, chain: &[C::Instance]) -> Result<Arc<Graph>, SchedulerError> {
        let _running = relock(&self.running);
        self.fetch_graph(chain)
    }

    /// Cache lookup behind [`Scheduler::prepare`]. The caller holds
    /// `running`.
    fn fetch_graph(&self, chain: &[C::Instance]) -> Result<Arc<Graph>, SchedulerError> {
        let signature = ChainSignature::of(chain);
        let registry = self.registry();
        let graph = relock(&self.cache).fetch(&signature, || {
            let mut graph = Graph::build(&signature, &registry)?;
            if self.config.optimize {
                graph.optimize(self.workers);
            }
            Ok(graph)
        })?;
        Ok(graph)
    }

    /// Run one pass over `chain`, calling `perform` once per instance.
    ///
    /// Instances linked by a strong hazard run in chain order; all others
    /// may run concurrently on the pool. Passes whose graph falls outside
    /// the thresholds run on the calling thread instead.
    ///
    /// # Errors
    /// If the chain holds a type without registered semantics.
    ///
    /// # Panics
    /// If `perform` panics. The panic is resumed after every worker has
    /// stopped.
    pub fn run_pass<F>(&self, chain: &[C::Instance], perform: F) -> Result<PassSummary, SchedulerError>
    where
        F: Fn(&C::Instance) + Sync,
    {
        let _running = relock(&self.running);
        let graph = self.fetch_graph(chain)?;
        let parallel = self.workers.get() > 1 && self.thresholds.should_parallelize(&graph);
        let measure = self.config.measure_play_time;

        let pass = graph.bind(chain);
        let reports = if parallel {
            self.executor.run_parallel(&pass, &perform, measure)
        } else {
            vec![Executor::run_serial(&pass, &perform, measure)]
        };
        drop(pass);

        if measure {
            self.record_play_times(&reports);
        }
        let summary = PassSummary {
            nodes: reports.iter().map(|report| report.nodes).sum(),
            instances: reports.iter().map(|report| report.instances).sum(),
            parallel,
            active_workers: reports.iter().filter(|report| report.nodes > 0).count(),
        };
        debug!(?summary, weight = graph.weight(), max_roots = graph.max_roots(), "pass finished");
        Ok(summary)
    }

    /// Fold the pass's measurements into the weight table, then carry every
    /// weight that moved over to the registry. Cached graphs were balanced
    /// with the old weights and are dropped in that case.
    fn record_play_times(&self, reports: &[WorkerReport]) {
        let registry = self.registry();
        let mut weights = relock(&self.weights);
        let mut measured = HashSet::default();
        for &(instr, seconds) in reports.iter().flat_map(|report| &report.samples) {
            if let Some(semantics) = registry.get(instr) {
                weights.set(semantics.name(), seconds);
                measured.insert(instr);
            }
        }

        let moved: Vec<(InstrId, u32)> = registry
            .iter()
            .filter(|semantics| measured.contains(&semantics.id()))
            .filter_map(|semantics| {
                let weight = weights.fetch(semantics.name());
                (weight != semantics.weight()).then_some((semantics.id(), weight))
            })
            .collect();
        drop(weights);
        if moved.is_empty() {
            return;
        }

        let mut updated = SemanticRegistry::clone(&registry);
        for &(instr, weight) in &moved {
            updated.reweigh(instr, weight);
        }
        *relock(&self.registry) = Arc::new(updated);
        relock(&self.cache).clear();
        debug!(types = moved.len(), "measured weights changed, clearing graph cache");
    }

    /// Cache occupancy and distribution statistics.
    pub fn cache_stats(&self) -> CacheStats {
        relock(&self.cache).stats()
    }

    /// Dump every cached graph to `writer`.
    ///
    /// # Errors
    /// If writing fails.
    pub fn write_cache_entries<W: io::Write>(&self, writer: W) -> io::Result<()> {
        relock(&self.cache).write_entries(writer)
    }

    /// Drop every cached graph.
    pub fn clear_cache(&self) {
        relock(&self.cache).clear();
    }

    /// Current weight of the type called `name`.
    pub fn weight_fetch(&self, name: &str) -> u32 {
        relock(&self.weights).fetch(name)
    }

    /// Fold a measured execution time of `name` into the weight table.
    pub fn weight_set(&self, name: &str, play_time: f64) {
        relock(&self.weights).set(name, play_time);
    }

    /// Write the weight table in the weights file format, with weights
    /// normalised from measured play times.
    ///
    /// # Errors
    /// If writing fails.
    pub fn write_weights<W: io::Write>(&self, writer: W) -> io::Result<()> {
        relock(&self.weights).write_to(writer)
    }
}

impl<C: Config> Drop for Scheduler<C> {
    fn drop(&mut self) {
        let stats = relock(&self.cache).stats();
        debug!(entries = stats.entries, hits = stats.hits, misses = stats.misses, "scheduler stopped");
    }
}
