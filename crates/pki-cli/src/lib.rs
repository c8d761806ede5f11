//! pki-admin command-line library.
//!
//! Parses the command line, dispatches to the profile engine or the
//! certificate repair orchestrator and formats their results.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format};
pub use error::CliError;
pub use output::Summary;
