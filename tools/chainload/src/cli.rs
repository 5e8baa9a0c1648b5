use std::path::PathBuf;

use chainloader::menu::MenuInput;
use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// Scan, inspect and dry-run chainloader payloads on the host.
#[derive(Parser, Debug)]
#[command(name = "chainload", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format for all subcommands.
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub output: OutputFormat,

    /// Configuration file (defaults to ./chainload.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory standing in for the SD card root (overrides config).
    #[arg(long, global = true)]
    pub sd_root: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the payloads found under the payload directory.
    Scan,

    /// Parse an image and check its sections against the load window.
    Inspect(InspectArgs),

    /// Dry-run the whole chain against the simulated platform.
    Run(RunArgs),
}

// ── inspect ──────────────────────────────────────────────────────────

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Host path of the image.
    pub path: PathBuf,
}

// ── run ──────────────────────────────────────────────────────────────

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Payload path relative to the SD root (skips selection).
    pub path: Option<String>,

    /// Show the selection menu, as if the menu button were held.
    #[arg(long)]
    pub select: bool,

    /// Menu key presses, in order.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "confirm")]
    pub keys: Vec<Key>,
}

/// Menu key accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Key {
    Up,
    Down,
    Confirm,
}

impl From<Key> for MenuInput {
    fn from(key: Key) -> Self {
        match key {
            Key::Up => MenuInput::Up,
            Key::Down => MenuInput::Down,
            Key::Confirm => MenuInput::Confirm,
        }
    }
}
