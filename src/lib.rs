//! reapctl library
//!
//! Decision engine and batch executor for reaping idle or stale EC2
//! instances in a tagged environment. The binary in `main.rs` is a thin
//! clap wrapper around `reaper::run`.

pub mod aws;
pub mod config;
pub mod error;
pub mod executor;
pub mod provider;
pub mod reaper;
pub mod retry;
pub mod selector;

// Re-export commonly used types
pub use config::{Config, Policy};
pub use reaper::{Collaborators, RunSummary};
pub use selector::{EvalReason, SelectionReport};
