//! Fieldcheck CLI
//!
//! Command-line interface for managing dataset snapshots and running
//! dataset version migrations.

pub mod commands;
pub mod context;
pub mod output;
pub mod store;
