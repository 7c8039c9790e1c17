//! Subcommand implementations
//!
//! Every command takes the resolved [`CliContext`](crate::context::CliContext)
//! and an [`OutputFormat`](crate::output::OutputFormat).

pub mod config;
pub mod records;
pub mod run;
pub mod status;
pub mod sweep;
pub mod sync;
