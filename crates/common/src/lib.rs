//! LiteServ Testkit Common Library
//!
//! Shared types, errors and version reconciliation used by the lifecycle
//! supervisor and its platform backends.

pub mod error;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use version::{reconcile, Reconciled};

/// Testkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default artifact cache directory, relative to the working directory
pub fn default_binary_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("deps").join("binaries")
}

/// Default results directory for logs and database files
pub fn default_results_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("results")
}
