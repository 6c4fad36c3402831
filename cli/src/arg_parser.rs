use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Talk to a running Lua dumper server
#[derive(Debug, Parser)]
#[clap(name = "cli", version)]
pub struct ArgParser {
    /// Base URL of the server
    #[clap(
        short = 's',
        long = "server",
        env = "DUMPER_SERVER",
        default_value = "http://127.0.0.1:3000"
    )]
    pub server: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum SubCommand {
    /// check that the server is up
    Health,
    /// dump a Lua file
    Dump {
        /// script to submit
        file: PathBuf,

        #[clap(long)]
        /// key forwarded to the dumper
        key: Option<String>,

        #[clap(long = "place-id")]
        /// place id forwarded to the dumper (numeric ids are sent as numbers)
        place_id: Option<String>,

        #[clap(short = 'o', long = "out")]
        /// write the dumped code here instead of stdout
        out: Option<PathBuf>,
    },
}
