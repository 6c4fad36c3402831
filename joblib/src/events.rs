use crate::types::OutputBlob;
use std::fmt;

/// Terminal status of one dumper process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Exited { code: i32 },
    Killed { signal: i32 },
    TimedOut,
}

impl JobStatus {
    pub fn success(&self) -> bool {
        matches!(self, JobStatus::Exited { code: 0 })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Exited { code } => write!(f, "exited with code {}", code),
            JobStatus::Killed { signal } => write!(f, "killed by signal {}", signal),
            JobStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Output {
    Stdout(OutputBlob),
    Stderr(OutputBlob),
}

