//! CLI subcommand implementations.

pub mod cluster_info;
pub mod evaluate;
