//! A3S Storage Core - Foundational Types
//!
//! Error and configuration types shared by the A3S Storage crates.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{ChunkedConfig, DEFAULT_MAX_TAR_SPLIT_SIZE, DEFAULT_MAX_TOC_SIZE};
pub use error::{Result, StorageError};

/// A3S Storage version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
