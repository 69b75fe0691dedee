//! Hot-reloadable budget policy
//!
//! The store holds an immutable [`PolicySnapshot`] behind an atomic pointer.
//! Reloads parse and validate a complete new snapshot before swapping it in;
//! a bad file leaves the previous snapshot in place.

pub mod store;
pub mod watcher;

pub use store::{PolicyDocument, PolicySnapshot, PolicyState, PolicyStore};
pub use watcher::{spawn_policy_watcher, Debouncer, PolicyWatcher, WatchSettings};

use std::path::PathBuf;
use thiserror::Error;

use crate::context::token_budget::BudgetError;

/// Reasons a policy file is rejected
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("no policy file configured")]
    NoPath,

    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("policy file is empty")]
    Empty,

    #[error("failed to parse policy file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid policy for {scope}: {source}")]
    Invalid {
        scope: String,
        #[source]
        source: BudgetError,
    },

    #[error("invalid endpoint pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
}
