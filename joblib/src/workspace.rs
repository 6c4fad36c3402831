//! Per-job scratch files under a single ephemeral staging directory.
//!
//! A [`Workspace`] is created once at startup. Every job then calls
//! [`Workspace::stage`] and receives a [`StagedJob`], which owns the job's
//! input/output pair and removes both files when it is cleaned up or dropped.

use crate::error::{Error, Result};
use crate::types::JobId;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create the staging directory if it does not exist yet.
    ///
    /// Racing creators are fine: `create_dir_all` succeeds when the directory already exists.
    pub async fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "staging directory ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `payload` to a fresh input file named after a new job id.
    pub async fn stage(&self, payload: &str) -> Result<StagedJob> {
        let id = Uuid::new_v4();
        let staged = StagedJob {
            id,
            input: self.dir.join(format!("in_{}.lua", id)),
            output: self.dir.join(format!("out_{}.lua", id)),
            released: false,
        };
        if let Err(source) = tokio::fs::write(&staged.input, payload).await {
            // dropping `staged` removes a partially written input file
            return Err(Error::Staging {
                path: staged.input.clone(),
                source,
            });
        }
        debug!(job_id = %id, bytes = payload.len(), "staged input");
        Ok(staged)
    }
}

/// The input/output file pair of one job.
///
/// Call [`StagedJob::cleanup`] on the normal path. If the owner unwinds or returns early
/// without cleaning up, `Drop` removes the files synchronously instead.
#[derive(Debug)]
pub struct StagedJob {
    id: JobId,
    input: PathBuf,
    output: PathBuf,
    released: bool,
}

impl StagedJob {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub async fn cleanup(mut self) {
        release(&[&self.input, &self.output]).await;
        self.released = true;
    }
}

impl Drop for StagedJob {
    fn drop(&mut self) {
        if !self.released {
            release_blocking(&[&self.input, &self.output]);
        }
    }
}

/// Delete every path that exists. Missing files are ignored and other failures are only logged.
pub async fn release<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let path = path.as_ref();
        log_release(path, tokio::fs::remove_file(path).await);
    }
}

fn release_blocking<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let path = path.as_ref();
        log_release(path, fs::remove_file(path));
    }
}

fn log_release(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "released staged file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to release staged file"),
    }
}
