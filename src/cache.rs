use crate::{
    graph::{BuildError, Graph, Node},
    types::{ChainSignature, InstrId},
    utils::hash_signature,
};
use core::fmt::{self, Display, Formatter};
use serde::Deserialize;
use std::{io, sync::Arc};
use tracing::{debug, info, trace};

/// Tuning of the graph cache.
///
/// The defaults keep a new entry alive for about ten sweeps on its age
/// credit alone; after that it survives only while hits keep its usage
/// counter above `min_uses`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Number of hash buckets.
    pub buckets: usize,
    /// Lookups between two decay sweeps.
    pub sweep_interval: u64,
    /// A sweep is skipped while the cache holds fewer entries.
    pub sweep_min_entries: usize,
    /// Right shift applied to usage and age counters on every sweep.
    pub decay_shift: u32,
    /// Usage floor below which an entry may be evicted.
    pub min_uses: u64,
    /// Age floor below which an entry may be evicted.
    pub min_age: u64,
    /// Age credit of a freshly inserted entry.
    pub age_start: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            buckets: 128,
            sweep_interval: 10_000,
            sweep_min_entries: 128,
            decay_shift: 1,
            min_uses: 5000,
            min_age: 256,
            age_start: 131_072,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    hash: u32,
    signature: ChainSignature,
    graph: Arc<Graph>,
    uses: u64,
    age: u64,
}

/// Built graphs keyed by chain signature.
///
/// Lookups hash the signature into a fixed number of buckets; each bucket
/// holds its entries newest first and resolves collisions by comparing
/// signatures. Every `sweep_interval` lookups, usage and age counters of
/// all entries decay and entries that fell below both floors are dropped.
#[must_use]
#[derive(Debug)]
pub struct GraphCache {
    config: CacheConfig,
    buckets: Vec<Vec<CacheEntry>>,
    len: usize,
    since_sweep: u64,
    lookups: u64,
    hits: u64,
    misses: u64,
    evicted: u64,
}

impl GraphCache {
    /// Empty cache. A configured bucket count of zero is treated as one.
    pub fn new(config: CacheConfig) -> Self {
        let buckets = (0..config.buckets.max(1)).map(|_| Vec::new()).collect();
        Self {
            config,
            buckets,
            len: 0,
            since_sweep: 0,
            lookups: 0,
            hits: 0,
            misses: 0,
            evicted: 0,
        }
    }

    /// Settings the cache was created with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of cached graphs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Graph for `signature`, ready for a new pass.
    ///
    /// On a hit the cached graph is reset and its usage counter grows. On a
    /// miss `build` produces the graph, which is stored with one use and
    /// the initial age credit at the head of its bucket.
    ///
    /// # Errors
    /// Whatever `build` returns. Nothing is cached in that case.
    ///
    /// # Panics
    /// If the cached graph is still bound to a running pass.
    pub fn fetch<F>(&mut self, signature: &[InstrId], build: F) -> Result<Arc<Graph>, BuildError>
    where
        F: FnOnce() -> Result<Graph, BuildError>,
    {
        self.lookups += 1;
        self.since_sweep += 1;
        if self.since_sweep >= self.config.sweep_interval {
            self.sweep();
            self.since_sweep = 0;
        }

        let hash = hash_signature(signature);
        let bucket = self.bucket_of(hash);
        if let Some(entry) = self.buckets[bucket]
            .iter_mut()
            .find(|entry| entry.hash == hash && entry.signature == *signature)
        {
            entry.uses += 1;
            entry.graph.reset();
            self.hits += 1;
            trace!(bucket, uses = entry.uses, "cache hit");
            return Ok(entry.graph.clone());
        }

        let graph = Arc::new(build()?);
        self.buckets[bucket].insert(
            0,
            CacheEntry {
                hash,
                signature: signature.iter().copied().collect(),
                graph: graph.clone(),
                uses: 1,
                age: self.config.age_start,
            },
        );
        self.len += 1;
        self.misses += 1;
        debug!(
            bucket,
            entries = self.len,
            nodes = graph.count(),
            chain = signature.len(),
            "cache miss"
        );
        Ok(graph)
    }

    /// Decay usage and age of every entry and drop the entries below both
    /// floors. Does nothing while the cache holds fewer than
    /// `sweep_min_entries` graphs.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&mut self) -> usize {
        if self.len < self.config.sweep_min_entries {
            return 0;
        }
        let CacheConfig {
            decay_shift,
            min_uses,
            min_age,
            ..
        } = self.config;
        let before = self.len;
        for bucket in &mut self.buckets {
            bucket.retain_mut(|entry| {
                entry.uses = entry.uses.checked_shr(decay_shift).unwrap_or(0);
                entry.age = entry.age.checked_shr(decay_shift).unwrap_or(0);
                entry.uses >= min_uses || entry.age >= min_age
            });
        }
        self.len = self.buckets.iter().map(Vec::len).sum();
        let evicted = before - self.len;
        self.evicted += evicted as u64;
        info!(entries = self.len, evicted, "swept graph cache");
        evicted
    }

    /// Drop every cached graph. Counters are kept.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.len = 0;
    }

    /// Occupancy and distribution statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = || self.buckets.iter().flatten();
        let chains = self.buckets.iter().filter(|bucket| !bucket.is_empty());
        CacheStats {
            entries: self.len,
            lookups: self.lookups,
            lookups_since_sweep: self.since_sweep,
            hits: self.hits,
            misses: self.misses,
            evicted: self.evicted,
            optimized: entries()
                .filter(|entry| entry.graph.nodes().iter().any(Node::is_batch))
                .count(),
            buckets: self.buckets.len(),
            buckets_used: chains.clone().count(),
            longest_chain: chains.map(Vec::len).max().unwrap_or(0),
            uses: Spread::of(entries().map(|entry| entry.uses)),
            age: Spread::of(entries().map(|entry| entry.age)),
            weight: Spread::of(entries().map(|entry| entry.graph.weight())),
            chain_len: Spread::of(entries().map(|entry| entry.signature.len() as u64)),
            max_roots: Spread::of(entries().map(|entry| entry.graph.max_roots() as u64)),
        }
    }

    /// Write every entry for offline analysis: the signature as
    /// comma-separated type ids, then graph weight and `max_roots`, then
    /// the graph dump, then a blank line.
    ///
    /// # Errors
    /// If writing fails.
    pub fn write_entries<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
        for entry in self.buckets.iter().flatten() {
            let ids: Vec<String> = entry.signature.iter().map(ToString::to_string).collect();
            writeln!(writer, "{}", ids.join(","))?;
            writeln!(
                writer,
                "weight: {}, max_roots: {}, uses: {}, age: {}",
                entry.graph.weight(),
                entry.graph.max_roots(),
                entry.uses,
                entry.age
            )?;
            writeln!(writer, "{}", entry.graph)?;
        }
        writer.flush()
    }

    fn bucket_of(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }
}

/// Minimum, mean and maximum of a set of counters. All zero when empty.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Spread {
    /// Smallest value.
    pub min: u64,
    /// Integer mean.
    pub avg: u64,
    /// Largest value.
    pub max: u64,
}

impl Spread {
    fn of(values: impl Iterator<Item = u64>) -> Self {
        let (mut min, mut max, mut sum, mut count) = (u64::MAX, 0, 0u64, 0u64);
        for value in values {
            min = min.min(value);
            max = max.max(value);
            sum = sum.saturating_add(value);
            count += 1;
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            min,
            avg: sum / count,
            max,
        }
    }
}

impl Display for Spread {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "min {} / avg {} / max {}", self.min, self.avg, self.max)
    }
}

/// Point-in-time cache statistics, see [`GraphCache::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached graphs.
    pub entries: usize,
    /// Lookups since creation.
    pub lookups: u64,
    /// Lookups since the last sweep.
    pub lookups_since_sweep: u64,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that built a graph.
    pub misses: u64,
    /// Entries dropped by sweeps.
    pub evicted: u64,
    /// Cached graphs containing at least one batch.
    pub optimized: usize,
    /// Bucket count.
    pub buckets: usize,
    /// Buckets holding at least one entry.
    pub buckets_used: usize,
    /// Entries in the fullest bucket.
    pub longest_chain: usize,
    /// Usage counters.
    pub uses: Spread,
    /// Age counters.
    pub age: Spread,
    /// Graph weights.
    pub weight: Spread,
    /// Chain lengths.
    pub chain_len: Spread,
    /// `max_roots` of the cached graphs.
    pub max_roots: Spread,
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph cache: {} entries, {} optimized", self.entries, self.optimized)?;
        writeln!(
            f,
            "lookups: {} ({} since sweep), hits: {}, misses: {}, evicted: {}",
            self.lookups, self.lookups_since_sweep, self.hits, self.misses, self.evicted
        )?;
        let avg_chain = if self.buckets_used == 0 {
            0.0
        } else {
            self.entries as f64 / self.buckets_used as f64
        };
        writeln!(
            f,
            "buckets: {} used, {} empty, longest chain {}, avg chain {avg_chain:.2}",
            self.buckets_used,
            self.buckets - self.buckets_used,
            self.longest_chain
        )?;
        writeln!(f, "uses: {}", self.uses)?;
        writeln!(f, "age: {}", self.age)?;
        writeln!(f, "weight: {}", self.weight)?;
        writeln!(f, "chain length: {}", self.chain_len)?;
        write!(f, "max_roots: {}", self.max_roots)
    }
}
