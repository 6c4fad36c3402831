use std::{io, path::PathBuf, result};
use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to stage input at {path}: {source}")]
    Staging { path: PathBuf, source: io::Error },
    #[error("failed to start dumper: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to wait on dumper: {0}")]
    Wait(#[source] io::Error),
    #[error("dumper output exceeded the {limit} byte limit")]
    OutputLimitExceeded { limit: usize },
    #[error("failed to read dumper output at {path}: {source}")]
    ReadOutput { path: PathBuf, source: io::Error },
}

pub type Result<T> = result::Result<T, Error>;
