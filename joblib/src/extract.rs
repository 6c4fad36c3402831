//! Reads the dumper's output file and the stats line it prints.

use crate::error::{Error, Result};
use crate::runner::ExecutionResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::{io, path::Path};

static STATS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Lines\s*:\s*(\d+)\s*\|\s*Remotes\s*:\s*(\d+)\s*\|\s*Strings\s*:\s*(\d+)")
        .expect("stats pattern is valid")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpStats {
    pub total_lines: u64,
    pub remote_calls: u64,
    pub suspicious_strings: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extraction {
    /// Empty when the dumper wrote nothing.
    pub dumped_code: String,
    pub stats: Option<DumpStats>,
}

/// Collect the output file (if any) and the stats from `result.stdout`.
pub async fn extract(output_path: &Path, result: &ExecutionResult) -> Result<Extraction> {
    let dumped_code = match tokio::fs::read(output_path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(Error::ReadOutput {
                path: output_path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Extraction {
        dumped_code,
        stats: parse_stats(&result.stdout),
    })
}

/// First `Lines: N | Remotes: N | Strings: N` in `stdout`, if any.
pub fn parse_stats(stdout: &str) -> Option<DumpStats> {
    let captures = STATS_LINE.captures(stdout)?;
    Some(DumpStats {
        total_lines: captures[1].parse().ok()?,
        remote_calls: captures[2].parse().ok()?,
        suspicious_strings: captures[3].parse().ok()?,
    })
}
