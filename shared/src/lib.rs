//! # Shared Module for the BlockIAM Client
//!
//! Common types, errors, configuration and utilities used by the
//! `iam-client` crate and its `blockiam` command-line tool.
//!
//! ## Architecture
//!
//! The smart contract is the source of truth for device registration,
//! access grants and access logs. The client mirrors the contract's access
//! events into a local SQLite cache so they can be queried offline:
//! - **Ledger** holds devices, grants and the append-only access event log
//! - **Local cache** holds a deduplicated projection keyed by transaction hash
//! - **Envelope** is the one result shape every public operation returns

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use constants::*;
pub use error::*;
pub use types::*;
pub use utils::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
