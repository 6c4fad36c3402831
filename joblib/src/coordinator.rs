use crate::error::Result;
use crate::extract::{DumpStats, Extraction};
use crate::job::{Job, JobState};
use crate::runner::{ExecutionResult, JobOptions, Runner};
use crate::types::JobId;
use crate::workspace::Workspace;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, info_span, Instrument};

/// Everything a finished job produced. The job's files are already gone by the time you hold one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub id: JobId,
    /// `Completed`, `Failed` or `TimedOut`.
    pub outcome: JobState,
    /// Empty when the dumper wrote no output file.
    pub dumped_code: String,
    pub stats: Option<DumpStats>,
    pub execution: ExecutionResult,
}

/// A `JobCoordinator` which runs dump jobs from staging through cleanup.
///
/// The coordinator holds no per-job state, so it can be cloned freely across request handlers.
/// Jobs never share files or buffers. The only shared piece is the optional admission
/// semaphore that caps how many dumper processes run at once.
#[derive(Clone, Debug)]
pub struct JobCoordinator {
    workspace: Workspace,
    runner: Runner,
    permits: Option<Arc<Semaphore>>,
}

impl JobCoordinator {
    pub fn new(workspace: Workspace, runner: Runner) -> Self {
        Self {
            workspace,
            runner,
            permits: None,
        }
    }

    /// Queue jobs once `max` dumpers are already running.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(max)));
        self
    }

    /// Stage `payload`, run the dumper over it, read back its output and remove the staged files.
    ///
    /// Cleanup happens on every path out of here, errors included.
    pub async fn run_job(&self, payload: &str, options: &JobOptions) -> Result<JobReport> {
        let _permit = match &self.permits {
            // the semaphore is never closed
            Some(permits) => permits.acquire().await.ok(),
            None => None,
        };

        let staged = self.workspace.stage(payload).await?;
        let mut job = Job::new(staged, options.clone());
        let id = job.id();
        let span = info_span!("job", job_id = %id);

        let driven = drive(&mut job, &self.runner).instrument(span.clone()).await;
        let outcome = job.cleanup().instrument(span).await;
        let (execution, extraction) = driven?;

        info!(
            job_id = %id,
            outcome = %outcome,
            output_bytes = extraction.dumped_code.len(),
            "job finished"
        );
        Ok(JobReport {
            id,
            outcome,
            dumped_code: extraction.dumped_code,
            stats: extraction.stats,
            execution,
        })
    }
}

async fn drive(job: &mut Job, runner: &Runner) -> Result<(ExecutionResult, Extraction)> {
    let execution = job.execute(runner).await?;
    let extraction = job.extract(&execution).await?;
    Ok((execution, extraction))
}
