use anyhow::Result;
use clap::Parser as ClapParser;

use cli::command::{Cli, Commands};
use cli::convert::cmd_convert;
use cli::info::{cmd_capture, cmd_info};

mod cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(cli.loglevel.to_level_filter());
    env_builder.format_timestamp_secs();
    env_builder.try_init()?;

    match cli.command {
        Commands::Convert(ref args) => cmd_convert(args)?,
        Commands::Info(ref args) => cmd_info(args)?,
        Commands::Capture(ref args) => cmd_capture(args)?,
    }

    Ok(())
}
