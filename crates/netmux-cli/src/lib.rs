//! netmux CLI library
//!
//! Argument parsing, configuration loading and the demo scenarios behind the
//! `netmux` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{CommandDispatcher, ScenarioReport};
pub use config::AppConfig;
pub use error::{CliError, Result};
