use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use geofield_core::Direction;

pub const DEFAULT_MEMORY: &str = "bbox_memory.json";

#[derive(Parser, Debug)]
#[command(
    name = "geofield",
    about = "Template-calibrated field extraction from page layouts"
)]
pub struct Cli {
    /// TOML configuration file (defaults to ./geofield.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract every document listed in a manifest.
    Run {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = DEFAULT_MEMORY)]
        memory: PathBuf,
        /// Discard previously learned positions before starting.
        #[arg(long, action = ArgAction::SetTrue)]
        fresh: bool,
        #[arg(long, default_value_t = 4)]
        jobs: usize,
    },
    /// Print the text chunks of a layout file.
    Segment {
        layout: PathBuf,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Find the value next to a keyword.
    Find {
        layout: PathBuf,
        #[arg(long)]
        keyword: String,
        #[arg(long, default_value = "right")]
        direction: Direction,
    },
    /// Print the text surrounding a keyword.
    Context {
        layout: PathBuf,
        #[arg(long)]
        keyword: String,
        #[arg(long, default_value_t = 300)]
        window: usize,
    },
    /// Summarize a calibration memory file.
    Memory {
        #[arg(long, default_value = DEFAULT_MEMORY)]
        memory: PathBuf,
    },
}
