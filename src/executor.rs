use crate::{
    graph::Pass,
    instance::Instance,
    types::InstrId,
};
use core::num::NonZeroUsize;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::{thread, time::Instant};
use tracing::trace;

/// Worker pool that drains bound passes.
///
/// Every pool thread runs the same loop: take a ready node, execute its
/// instances in order, report the node finished. The consumption protocol
/// decides who gets what; the executor adds no ordering of its own.
#[must_use]
#[derive(Debug)]
pub struct Executor {
    pool: ThreadPool,
    workers: NonZeroUsize,
}

/// What one worker did during a pass.
#[derive(Debug, Default)]
pub(crate) struct WorkerReport {
    pub(crate) nodes: usize,
    pub(crate) instances: usize,
    /// Execution time in seconds per executed instance, when measured.
    pub(crate) samples: Vec<(InstrId, f64)>,
}

impl Executor {
    /// Pool with exactly `workers` threads.
    ///
    /// # Errors
    /// If the threads cannot be spawned.
    pub fn new(workers: NonZeroUsize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.get())
            .thread_name(|idx| format!("pass-dag-worker-{idx}"))
            .build()?;
        Ok(Self { pool, workers })
    }

    /// Number of pool threads.
    #[must_use]
    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Drain `pass` on every pool thread at once.
    pub(crate) fn run_parallel<I, F>(&self, pass: &Pass<'_, '_, I>, perform: &F, measure: bool) -> Vec<WorkerReport>
    where
        I: Instance,
        F: Fn(&I) + Sync,
    {
        self.pool.broadcast(|ctx| {
            trace!(worker = ctx.index(), "worker joined pass");
            drain(pass, perform, measure)
        })
    }

    /// Drain `pass` on the calling thread.
    pub(crate) fn run_serial<I, F>(pass: &Pass<'_, '_, I>, perform: &F, measure: bool) -> WorkerReport
    where
        I: Instance,
        F: Fn(&I),
    {
        drain(pass, perform, measure)
    }
}

/// Releases the other workers if this one unwinds mid-pass.
struct AbandonOnPanic<'p, 'g, 'c, I> {
    pass: &'p Pass<'g, 'c, I>,
}

impl<I> Drop for AbandonOnPanic<'_, '_, '_, I> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.pass.graph().abandon();
        }
    }
}

fn drain<I, F>(pass: &Pass<'_, '_, I>, perform: &F, measure: bool) -> WorkerReport
where
    I: Instance,
    F: Fn(&I),
{
    let _guard = AbandonOnPanic { pass };
    let mut report = WorkerReport::default();
    while let Some(dispatch) = pass.consume() {
        for instance in dispatch.instances() {
            if measure {
                let start = Instant::now();
                perform(instance);
                report
                    .samples
                    .push((instance.instr_id(), start.elapsed().as_secs_f64()));
            } else {
                perform(instance);
            }
            report.instances += 1;
        }
        report.nodes += 1;
        pass.consume_update(&dispatch);
    }
    report
}
