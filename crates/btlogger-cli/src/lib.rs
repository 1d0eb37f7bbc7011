//! BTLogger CLI library
//!
//! Application shell around the receiver: argument parsing, layered
//! configuration, the console presentation layer and the subcommands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use console::ConsolePresentation;
pub use error::{CliError, Result};
