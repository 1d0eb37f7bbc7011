//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "btlogger", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the session files
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Receive logs from nearby producers until Ctrl-C
    Run {
        /// Only connect when asked to, never to discovered candidates
        #[arg(long)]
        no_auto_connect: bool,
    },
    /// List session files
    Sessions {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the lines of a session file
    Show {
        /// Path relative to the log directory
        path: String,
    },
    /// Delete a closed session file
    Delete {
        /// Path relative to the log directory
        path: String,
    },
    /// Decode a captured notification frame given as hex
    Decode { hex: String },
    /// Print the effective configuration as TOML
    Config,
}
