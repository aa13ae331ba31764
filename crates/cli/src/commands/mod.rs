//! CLI Commands

pub mod migrate;
pub mod plan;
pub mod snapshot;
pub mod version;
