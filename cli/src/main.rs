mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, SubCommand};
use client_cli::ClientCli;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ArgParser::parse();
    let client = ClientCli::connect(&args.server);

    match args.sub_command {
        SubCommand::Health => client.health().await?,
        SubCommand::Dump {
            file,
            key,
            place_id,
            out,
        } => {
            client
                .dump(&file, key.as_deref(), place_id.as_deref(), out.as_deref())
                .await?
        }
    }

    Ok(())
}
