//! Local dispatch of per-location workers.
//!
//! Each job owns one location: it runs the holdout ensemble and writes the
//! bundle to the result store. Jobs share nothing mutable and run on a
//! bounded rayon pool. A location-scoped failure (missing inputs, failed
//! synthesis) is recorded against that location; any other error aborts the
//! whole phase.

use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{LocationId, LocationSeries};
use crate::ensemble::{EnsembleContext, run_location};
use crate::error::PipelineError;
use crate::io::ResultStore;

/// Opaque reference to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    index: usize,
    pub location_id: LocationId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Written(PathBuf),
    Failed(String),
}

/// Run one location end to end and persist its bundle.
pub fn run_worker(
    ctx: &EnsembleContext<'_>,
    store: &ResultStore,
    series: &LocationSeries,
) -> Result<PathBuf, PipelineError> {
    let bundle = run_location(ctx, series)?;
    store.write(&bundle)
}

pub struct LocalDispatcher<'a> {
    ctx: EnsembleContext<'a>,
    store: &'a ResultStore,
    pool: rayon::ThreadPool,
    pending: Vec<LocationSeries>,
    outcomes: Vec<Option<JobOutcome>>,
}

impl<'a> LocalDispatcher<'a> {
    /// `threads == 0` uses rayon's default pool size.
    pub fn new(ctx: EnsembleContext<'a>, store: &'a ResultStore, threads: usize) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build worker pool: {e}")))?;
        Ok(Self {
            ctx,
            store,
            pool,
            pending: Vec::new(),
            outcomes: Vec::new(),
        })
    }

    pub fn submit(&mut self, series: LocationSeries) -> JobHandle {
        let handle = JobHandle {
            index: self.pending.len(),
            location_id: series.location_id,
        };
        self.pending.push(series);
        handle
    }

    /// Run every submitted job that has not run yet.
    pub fn run_pending(&mut self) -> Result<(), PipelineError> {
        let start = self.outcomes.len();
        let jobs = &self.pending[start..];
        if jobs.is_empty() {
            return Ok(());
        }
        info!(jobs = jobs.len(), threads = self.pool.current_num_threads(), "Dispatching location workers.");

        let ctx = self.ctx;
        let store = self.store;
        let outcomes = self.pool.install(|| {
            jobs.par_iter()
                .map(|series| match run_worker(&ctx, store, series) {
                    Ok(path) => Ok(JobOutcome::Written(path)),
                    Err(e) if e.is_location_scoped() => {
                        warn!(location_id = %series.location_id, error = %e, "Location failed.");
                        Ok(JobOutcome::Failed(e.to_string()))
                    }
                    Err(e) => Err(e),
                })
                .collect::<Result<Vec<_>, PipelineError>>()
        })?;
        self.outcomes.extend(outcomes.into_iter().map(Some));
        Ok(())
    }

    /// Outcome of a job, running pending jobs first if needed.
    pub fn collect(&mut self, handle: JobHandle) -> Result<JobOutcome, PipelineError> {
        if handle.index >= self.outcomes.len() {
            self.run_pending()?;
        }
        self.outcomes
            .get_mut(handle.index)
            .and_then(Option::take)
            .ok_or_else(|| PipelineError::Config(format!("job for location {} was already collected", handle.location_id)))
    }
}
