use clap::Parser;
use joblib::{Limits, ToolCommand};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;

/// Serve the Lua dumper over HTTP
#[derive(Debug, Parser)]
#[clap(name = "server", version)]
pub struct ServerArgs {
    /// Interface to bind
    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[clap(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Ephemeral directory that holds each job's input/output pair
    #[clap(long, env = "STAGING_DIR", default_value = "/tmp/lua-dumper")]
    pub staging_dir: PathBuf,

    /// Dumper program
    #[clap(long, env = "DUMPER_TOOL", default_value = "lua5.3")]
    pub tool: String,

    /// Fixed arguments placed before the job arguments
    #[clap(
        long = "tool-arg",
        env = "DUMPER_TOOL_ARGS",
        default_value = "dumper.lua",
        multiple_occurrences = true,
        allow_hyphen_values = true,
        value_delimiter = ','
    )]
    pub tool_args: Vec<String>,

    /// Working directory for the dumper
    #[clap(long, env = "DUMPER_TOOL_DIR")]
    pub tool_dir: Option<PathBuf>,

    /// Wall-clock limit per job, in seconds
    #[clap(long, env = "DUMPER_TIMEOUT_SECS", default_value = "25")]
    pub timeout_secs: u64,

    /// Limit on stdout + stderr captured per job
    #[clap(long, env = "DUMPER_MAX_OUTPUT_BYTES", default_value = "20971520")]
    pub max_output_bytes: usize,

    /// Largest accepted `code` field
    #[clap(long, env = "DUMPER_MAX_CODE_BYTES", default_value = "10485760")]
    pub max_code_bytes: usize,

    /// Cap on dumpers running at once (unbounded if unset)
    #[clap(long, env = "DUMPER_MAX_CONCURRENT_JOBS")]
    pub max_concurrent_jobs: Option<usize>,

    /// Directory served for non-API routes
    #[clap(long, env = "STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Deployment environment name, for the startup log
    #[clap(long = "env", env = "APP_ENV", default_value = "development")]
    pub environment: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl ServerArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("--timeout-secs", self.timeout_secs as usize),
            ("--max-output-bytes", self.max_output_bytes),
            ("--max-code-bytes", self.max_code_bytes),
            ("--max-concurrent-jobs", self.max_concurrent_jobs.unwrap_or(1)),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Zero(*name)),
            None => Ok(()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn tool(&self) -> ToolCommand {
        let tool = self
            .tool_args
            .iter()
            .fold(ToolCommand::new(self.tool.clone()), |tool, arg| {
                tool.arg(arg.clone())
            });
        match &self.tool_dir {
            Some(dir) => tool.current_dir(dir.clone()),
            None => tool,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            timeout: Duration::from_secs(self.timeout_secs),
            max_output_bytes: self.max_output_bytes,
        }
    }
}
