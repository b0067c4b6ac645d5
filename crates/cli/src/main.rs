mod cli;
mod config;
mod inspect;
mod layout;
mod llm_extractor;
mod logging;
mod run;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};
use crate::run::RunOptions;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose || logging::env_flag());
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            manifest,
            output,
            memory,
            fresh,
            jobs,
        } => run::run(
            &RunOptions {
                manifest,
                output,
                memory,
                fresh,
                jobs,
            },
            &config,
        ),
        Command::Segment { layout, json } => inspect::segment(&layout, json, &config),
        Command::Find {
            layout,
            keyword,
            direction,
        } => inspect::find(&layout, &keyword, direction, &config),
        Command::Context {
            layout,
            keyword,
            window,
        } => inspect::context(&layout, &keyword, window, &config),
        Command::Memory { memory } => inspect::memory(&memory, &config),
    }
}
