//! # BlockIAM Client
//!
//! Client library for an on-chain identity and access management contract
//! for IoT devices:
//! - Device registration, access grants and role assignment
//! - Access checks and on-chain access logging
//! - Local SQLite mirror of access events for offline queries
//!
//! ## Layout
//!
//! - [`ledger`]: the contract boundary (trait, ABI codec, JSON-RPC and
//!   in-memory implementations)
//! - [`cache`]: the local log store
//! - [`sync`]: moves access events from the ledger into the store
//! - [`facade`]: the envelope-returning client used by callers and the CLI

pub mod cache;
pub mod facade;
pub mod ledger;
pub mod sync;

// Re-export commonly used types
pub use cache::{InsertOutcome, LogStore};
pub use facade::IamClient;
pub use ledger::{
    BlockTag, ContractCapabilities, InMemoryLedger, JsonRpcLedger, LedgerClient,
    TransactionOutcome,
};
pub use sync::{SyncOrchestrator, SyncReport};
