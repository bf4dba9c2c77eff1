//! # Configuration for the BlockIAM Client
//!
//! Plain configuration structs with defaults, loaded from environment
//! variables and validated once at startup.

use crate::constants::*;
use crate::error::{IamError, IamResult};
use crate::utils::validate_address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// =============================================================================
// TOP-LEVEL CONFIGURATION
// =============================================================================

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamConfig {
    /// Ledger connection parameters
    pub ledger: LedgerConfig,

    /// Contract capability table (logical operation -> entry point)
    pub contract: ContractConfig,

    /// Local cache configuration
    pub cache: CacheConfig,
}

impl IamConfig {
    /// Load configuration from process environment variables and `.env`
    pub fn from_env() -> IamResult<Self> {
        Self::from_env_file(DEFAULT_ENV_FILE)
    }

    /// Load configuration from process environment variables, falling back
    /// to the dotenv file at `path`
    ///
    /// A missing file is ignored. A malformed file is a configuration error.
    pub fn from_env_file(path: impl AsRef<Path>) -> IamResult<Self> {
        let file_vars = read_env_file(path.as_ref())?;
        Self::from_lookup(|key| env::var(key).ok().or_else(|| file_vars.get(key).cloned()))
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Unset keys keep their defaults; set keys that fail to parse are
    /// configuration errors.
    pub fn from_lookup<F>(lookup: F) -> IamResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Ledger
        config.ledger.rpc_url = lookup(ENV_RPC_URL);
        config.ledger.contract_address = lookup(ENV_CONTRACT_ADDRESS);
        config.ledger.account_address = lookup(ENV_ACCOUNT_ADDRESS);
        if let Some(v) = lookup(ENV_CHAIN_ID) {
            config.ledger.chain_id = parse_var(ENV_CHAIN_ID, &v)?;
        }
        if let Some(v) = lookup(ENV_GAS_LIMIT) {
            config.ledger.gas_limit = parse_var(ENV_GAS_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_RECEIPT_TIMEOUT_SECS) {
            config.ledger.receipt_timeout_secs = parse_var(ENV_RECEIPT_TIMEOUT_SECS, &v)?;
        }

        // Contract capabilities
        let contract = &mut config.contract;
        for (key, slot) in [
            (ENV_FN_REGISTER_DEVICE, &mut contract.register_device),
            (ENV_FN_GRANT_ACCESS, &mut contract.grant_access),
            (ENV_FN_REVOKE_ACCESS, &mut contract.revoke_access),
            (ENV_FN_ASSIGN_ROLE, &mut contract.assign_role),
            (ENV_FN_CHECK_ACCESS, &mut contract.check_access),
            (ENV_FN_DEVICE_INFO, &mut contract.device_info),
            (ENV_FN_LOG_ACCESS, &mut contract.log_access),
            (ENV_EVENT_ACCESS_LOG, &mut contract.access_event),
        ] {
            if let Some(v) = lookup(key) {
                *slot = v;
            }
        }

        // Cache
        if let Some(path) = lookup(ENV_CACHE_DB_PATH) {
            config.cache.db_path = PathBuf::from(path);
        }
        if let Some(v) = lookup(ENV_CACHE_ENABLED) {
            config.cache.enabled = parse_flag(ENV_CACHE_ENABLED, &v)?;
        }
        if let Some(v) = lookup(ENV_SYNC_FROM_BLOCK) {
            config.cache.sync_from_block = parse_var(ENV_SYNC_FROM_BLOCK, &v)?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> IamResult<()> {
        self.ledger.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

fn read_env_file(path: &Path) -> IamResult<HashMap<String, String>> {
    let invalid = |err: dotenvy::Error| {
        IamError::Configuration(format!("failed to read {}: {err}", path.display()))
    };

    let iter = match dotenvy::from_filename_iter(path) {
        Ok(iter) => iter,
        Err(err) if err.not_found() => return Ok(HashMap::new()),
        Err(err) => return Err(invalid(err)),
    };
    iter.map(|item| item.map_err(invalid)).collect()
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> IamResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IamError::Configuration(format!("{key} has invalid value '{value}'")))
}

fn parse_flag(key: &str, value: &str) -> IamResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(IamError::Configuration(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}

// =============================================================================
// LEDGER CONFIGURATION
// =============================================================================

/// Ledger connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the ledger node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,

    /// Address of the deployed IAM contract
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,

    /// Node-managed account that sends transactions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_address: Option<String>,

    /// Chain ID
    pub chain_id: u64,

    /// Gas limit for state-changing calls
    pub gas_limit: u64,

    /// Seconds to wait for a receipt before reporting a timeout
    pub receipt_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: None,
            account_address: None,
            chain_id: DEFAULT_CHAIN_ID,
            gas_limit: DEFAULT_GAS_LIMIT,
            receipt_timeout_secs: DEFAULT_RECEIPT_TIMEOUT_SECS,
        }
    }
}

impl LedgerConfig {
    /// RPC endpoint, or a missing-variable error
    pub fn rpc_url(&self) -> IamResult<&str> {
        require(&self.rpc_url, ENV_RPC_URL)
    }

    /// Contract address, or a missing-variable error
    pub fn contract_address(&self) -> IamResult<&str> {
        require(&self.contract_address, ENV_CONTRACT_ADDRESS)
    }

    /// Sender account, or a missing-variable error
    pub fn account_address(&self) -> IamResult<&str> {
        require(&self.account_address, ENV_ACCOUNT_ADDRESS)
    }

    /// Validate ledger configuration
    pub fn validate(&self) -> IamResult<()> {
        let rpc_url = self.rpc_url()?;
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            return Err(IamError::Configuration(format!(
                "{ENV_RPC_URL} must be an http(s) URL, got '{rpc_url}'"
            )));
        }

        for (key, value) in [
            (ENV_CONTRACT_ADDRESS, self.contract_address()?),
            (ENV_ACCOUNT_ADDRESS, self.account_address()?),
        ] {
            if !validate_address(value) {
                return Err(IamError::Configuration(format!(
                    "{key} is not a valid address: '{value}'"
                )));
            }
        }

        if self.gas_limit == 0 {
            return Err(IamError::Configuration(format!("{ENV_GAS_LIMIT} must be positive")));
        }
        if self.receipt_timeout_secs == 0 {
            return Err(IamError::Configuration(format!(
                "{ENV_RECEIPT_TIMEOUT_SECS} must be positive"
            )));
        }

        Ok(())
    }
}

fn require<'a>(value: &'a Option<String>, key: &str) -> IamResult<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(IamError::MissingEnvVar(key.into())),
    }
}

// =============================================================================
// CONTRACT CAPABILITY CONFIGURATION
// =============================================================================

/// Mapping from each logical contract operation to one concrete signature
///
/// Function entries use `name(type,...)` with an optional
/// ` returns (type,...)` suffix. The event entry uses
/// `Name(type [indexed] field,...)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    pub register_device: String,
    pub grant_access: String,
    pub revoke_access: String,
    pub assign_role: String,
    pub check_access: String,
    pub device_info: String,
    pub log_access: String,
    pub access_event: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            register_device: FN_REGISTER_DEVICE.into(),
            grant_access: FN_GRANT_ACCESS.into(),
            revoke_access: FN_REVOKE_ACCESS.into(),
            assign_role: FN_ASSIGN_ROLE.into(),
            check_access: FN_CHECK_ACCESS.into(),
            device_info: FN_DEVICE_INFO.into(),
            log_access: FN_LOG_ACCESS.into(),
            access_event: EVENT_ACCESS_LOGGED.into(),
        }
    }
}

// =============================================================================
// CACHE CONFIGURATION
// =============================================================================

/// Local cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the local cache
    pub enabled: bool,

    /// SQLite database file
    pub db_path: PathBuf,

    /// Milliseconds SQLite waits on a locked database
    pub busy_timeout_ms: u64,

    /// First block scanned by a full sync
    pub sync_from_block: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: PathBuf::from(DEFAULT_CACHE_DB_PATH),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            sync_from_block: 0,
        }
    }
}

impl CacheConfig {
    /// Validate cache configuration
    pub fn validate(&self) -> IamResult<()> {
        if self.enabled && self.db_path.as_os_str().is_empty() {
            return Err(IamError::Configuration(format!(
                "{ENV_CACHE_DB_PATH} must not be empty"
            )));
        }
        Ok(())
    }
}
