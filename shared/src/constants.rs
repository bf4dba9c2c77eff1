//! # Constants for the BlockIAM Client
//!
//! Defaults, contract entry points and environment variable names.

// =============================================================================
// LEDGER DEFAULTS
// =============================================================================

/// Default chain ID (local development chain)
pub const DEFAULT_CHAIN_ID: u64 = 1337;

/// Default gas limit for state-changing calls
pub const DEFAULT_GAS_LIMIT: u64 = 3_000_000;

/// How long to wait for a transaction receipt before giving up
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;

/// Interval between receipt polls
pub const RECEIPT_POLL_INTERVAL_MS: u64 = 500;

/// HTTP request timeout for a single JSON-RPC call
pub const RPC_REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// CONTRACT ENTRY POINTS (defaults for the reference contract)
// =============================================================================

/// registerDevice(address device, string name, string role, string metadata)
pub const FN_REGISTER_DEVICE: &str = "registerDevice(address,string,string,string)";

/// grantAccess(address device, uint256 expiry)
pub const FN_GRANT_ACCESS: &str = "grantAccess(address,uint256)";

/// revokeAccess(address device)
pub const FN_REVOKE_ACCESS: &str = "revokeAccess(address)";

/// assignRole(address device, string role)
pub const FN_ASSIGN_ROLE: &str = "assignRole(address,string)";

/// checkAccess(address device) returns (bool)
pub const FN_CHECK_ACCESS: &str = "checkAccess(address) returns (bool)";

/// getDevice(address device) returns (name, role, metadata, registeredAt, isRegistered)
pub const FN_DEVICE_INFO: &str =
    "getDevice(address) returns (string,string,string,uint256,bool)";

/// logAccess(string reason)
pub const FN_LOG_ACCESS: &str = "logAccess(string)";

/// Access log event emitted by the contract
pub const EVENT_ACCESS_LOGGED: &str =
    "AccessLogged(address indexed device,bool success,string reason,uint256 timestamp)";

// =============================================================================
// CACHE
// =============================================================================

/// Default SQLite file for the local cache
pub const DEFAULT_CACHE_DB_PATH: &str = "iot_iam_cache.db";

/// How long SQLite waits on a locked database before failing
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default number of rows printed by the CLI list commands
pub const DEFAULT_DISPLAY_LIMIT: i64 = 10;

// =============================================================================
// ENVIRONMENT VARIABLE NAMES
// =============================================================================

/// Dotenv file read by `IamConfig::from_env`; process variables take precedence
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Ledger JSON-RPC endpoint
pub const ENV_RPC_URL: &str = "RPC_URL";

/// Deployed contract address
pub const ENV_CONTRACT_ADDRESS: &str = "CONTRACT_ADDRESS";

/// Node-managed account used as transaction sender
pub const ENV_ACCOUNT_ADDRESS: &str = "ACCOUNT_ADDRESS";

/// Chain ID
pub const ENV_CHAIN_ID: &str = "CHAIN_ID";

/// Gas limit
pub const ENV_GAS_LIMIT: &str = "GAS_LIMIT";

/// Receipt wait timeout
pub const ENV_RECEIPT_TIMEOUT_SECS: &str = "RECEIPT_TIMEOUT_SECS";

/// Cache database path
pub const ENV_CACHE_DB_PATH: &str = "CACHE_DB_PATH";

/// Turn the local cache on or off
pub const ENV_CACHE_ENABLED: &str = "CACHE_ENABLED";

/// First block scanned by a full sync
pub const ENV_SYNC_FROM_BLOCK: &str = "SYNC_FROM_BLOCK";

/// Capability overrides, one per logical contract operation
pub const ENV_FN_REGISTER_DEVICE: &str = "CONTRACT_FN_REGISTER_DEVICE";
pub const ENV_FN_GRANT_ACCESS: &str = "CONTRACT_FN_GRANT_ACCESS";
pub const ENV_FN_REVOKE_ACCESS: &str = "CONTRACT_FN_REVOKE_ACCESS";
pub const ENV_FN_ASSIGN_ROLE: &str = "CONTRACT_FN_ASSIGN_ROLE";
pub const ENV_FN_CHECK_ACCESS: &str = "CONTRACT_FN_CHECK_ACCESS";
pub const ENV_FN_DEVICE_INFO: &str = "CONTRACT_FN_DEVICE_INFO";
pub const ENV_FN_LOG_ACCESS: &str = "CONTRACT_FN_LOG_ACCESS";
pub const ENV_EVENT_ACCESS_LOG: &str = "CONTRACT_EVENT_ACCESS_LOG";
