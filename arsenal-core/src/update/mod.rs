//! Tool update engine: state checks, strategies, and upstream lookups

pub mod engine;
pub mod github;
mod strategies;

pub use engine::{ApplyMode, BatchReport, ToolState, UpdateEngine, UpdateResult};
pub use github::GitHubChecker;
