//! Duplicate-event watchdog CLI library.
//!
//! This crate provides the CLI interface for evaluating monitor timelines.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
