//! Run lifecycle
//!
//! Build the job matrix, launch the render pool, submit every job, wait for
//! the pool to drain and tear it down. Runs exactly once per invocation.

use crate::{
    build_job_matrix, Config, EngineLauncher, JobExecutor, JobOutcome, RenderPool, WebsnapError,
};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Every job's outcome, in completion order
    pub outcomes: Vec<JobOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn from_outcomes(outcomes: Vec<JobOutcome>, elapsed: Duration) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success()).count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
            elapsed,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.success())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} captures failed ({} written in {:.1}s)",
            self.failed,
            self.total,
            self.succeeded,
            self.elapsed.as_secs_f64()
        )
    }
}

pub struct Scheduler {
    config: Config,
    output_root: PathBuf,
}

impl Scheduler {
    pub fn new(config: Config, output_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_root: output_root.into(),
        }
    }

    /// Render every page in `pages` (relative to `base_url`) with every
    /// configured device profile.
    ///
    /// Only fatal errors are returned; failed jobs are reported in the
    /// summary. The engine is not launched when there is nothing to render.
    pub async fn run<L: EngineLauncher>(
        &self,
        pages: &[String],
        base_url: &str,
        launcher: L,
    ) -> Result<RunSummary, WebsnapError> {
        let start_time = Instant::now();

        let jobs = build_job_matrix(pages, &self.config.devices, base_url)?;
        let executor = JobExecutor::new(&self.config, self.output_root.clone())?;

        info!(
            "Rendering {} pages x {} devices ({} jobs) with {} workers",
            pages.len(),
            self.config.devices.len(),
            jobs.len(),
            self.config.max_concurrency
        );

        let mut pool = RenderPool::launch(launcher, self.config.max_concurrency, executor).await?;

        let total = jobs.len();
        for job in jobs {
            pool.submit(job)?;
        }

        pool.idle().await;
        let outcomes = pool.drain_outcomes();
        if outcomes.len() != total {
            warn!("Expected {} outcomes, collected {}", total, outcomes.len());
        }

        pool.close().await?;

        let summary = RunSummary::from_outcomes(outcomes, start_time.elapsed());
        info!("Run completed: {}", summary);

        Ok(summary)
    }
}
