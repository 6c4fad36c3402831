use crate::error::Result;
use crate::events::JobStatus;
use crate::extract::{self, Extraction};
use crate::runner::{ExecutionResult, JobOptions, Runner};
use crate::types::JobId;
use crate::workspace::StagedJob;
use std::fmt;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cleaned,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed-out",
            JobState::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// One staged request moving through `created -> running -> completed|failed|timed-out -> cleaned`.
///
/// The job owns its [`StagedJob`], so its files go away with it even if `cleanup` is never reached.
#[derive(Debug)]
pub struct Job {
    staged: StagedJob,
    options: JobOptions,
    state: JobState,
}

impl Job {
    pub fn new(staged: StagedJob, options: JobOptions) -> Self {
        Self {
            staged,
            options,
            state: JobState::Created,
        }
    }

    pub fn id(&self) -> JobId {
        self.staged.id()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        debug!(job_id = %self.id(), from = %self.state, to = %next, "job state");
        self.state = next;
    }

    pub async fn execute(&mut self, runner: &Runner) -> Result<ExecutionResult> {
        self.transition(JobState::Running);
        let result = runner
            .run(
                self.staged.input_path(),
                self.staged.output_path(),
                &self.options,
            )
            .await;
        let next = match &result {
            Ok(execution) if execution.status == JobStatus::TimedOut => JobState::TimedOut,
            Ok(execution) if execution.status.success() => JobState::Completed,
            _ => JobState::Failed,
        };
        self.transition(next);
        result
    }

    /// Read whatever the dumper left, regardless of how it exited.
    pub async fn extract(&self, execution: &ExecutionResult) -> Result<Extraction> {
        extract::extract(self.staged.output_path(), execution).await
    }

    /// Remove both staged files and return the state the job ended in before cleanup.
    pub async fn cleanup(self) -> JobState {
        let Job { staged, state, .. } = self;
        let id = staged.id();
        staged.cleanup().await;
        debug!(job_id = %id, from = %state, to = %JobState::Cleaned, "job state");
        state
    }
}
