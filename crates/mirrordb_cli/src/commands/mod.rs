//! CLI command implementations.

pub mod discover;
pub mod generate;
pub mod history;
pub mod last_sync;
pub mod paths;
pub mod schedule;
pub mod sync;
