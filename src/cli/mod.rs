//! Command-line interface components
//!
//! This module contains CLI-specific code for the contributions client,
//! including argument parsing and the command handlers that wire arguments
//! into the core submission and download orchestrators.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, DeleteArgs, DownloadArgs, GlobalArgs, SubmitArgs};
pub use commands::{handle_delete, handle_download, handle_submit};
