//! # Contract Facade
//!
//! [`IamClient`] is the single entry point for callers. Every operation
//! returns an [`Envelope`]; faults never escape as `Err`.
//!
//! - address arguments are canonicalized before anything is sent, so a
//!   malformed address never reaches the ledger or the cache
//! - a reverted transaction is reported as `failed` with its transaction id
//! - connectivity, contract and storage faults are reported as `error`

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use shared::{
    config::IamConfig,
    error::{IamError, IamResult},
    types::{AccessLogEntry, CacheStats, Device, DeviceInfo, Envelope, LedgerEvent},
    utils::to_checksum_address,
};

use crate::cache::LogStore;
use crate::ledger::{
    AbiValue, BlockTag, ContractCapabilities, FunctionEntry, JsonRpcLedger, LedgerClient,
};
use crate::sync::{SyncOrchestrator, SyncReport};

/// Client for the IAM contract with an optional local cache
pub struct IamClient<L: LedgerClient> {
    ledger: Arc<L>,
    capabilities: Arc<ContractCapabilities>,
    cache: Option<Arc<LogStore>>,
    sync: Option<SyncOrchestrator<L>>,
}

impl IamClient<JsonRpcLedger> {
    /// Connect to the configured JSON-RPC node and open the cache
    pub async fn connect(config: &IamConfig) -> IamResult<Self> {
        config.validate()?;
        let ledger = JsonRpcLedger::connect(&config.ledger).await?;
        Self::from_config(ledger, config)
    }
}

impl<L: LedgerClient> IamClient<L> {
    /// Build a client around `ledger`, resolving the capability table and
    /// opening the cache as configured
    pub fn from_config(ledger: L, config: &IamConfig) -> IamResult<Self> {
        let capabilities = ContractCapabilities::from_config(&config.contract)?;
        let cache = if config.cache.enabled {
            Some(LogStore::open(&config.cache)?)
        } else {
            info!("Local cache disabled");
            None
        };
        Ok(Self::new(
            Arc::new(ledger),
            capabilities,
            cache,
            config.cache.sync_from_block,
        ))
    }

    pub fn new(
        ledger: Arc<L>,
        capabilities: ContractCapabilities,
        cache: Option<LogStore>,
        sync_from_block: u64,
    ) -> Self {
        let capabilities = Arc::new(capabilities);
        let cache = cache.map(Arc::new);
        let sync = cache.as_ref().map(|store| {
            SyncOrchestrator::new(
                Arc::clone(&ledger),
                Arc::clone(store),
                Arc::clone(&capabilities),
                sync_from_block,
            )
        });

        Self {
            ledger,
            capabilities,
            cache,
            sync,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Register a device on the contract
    pub async fn register_device(
        &self,
        address: &str,
        name: &str,
        role: &str,
        metadata: &str,
    ) -> Envelope<()> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };
        info!(device = %address, name, role, "Registering device");

        let args = [
            AbiValue::Address(address),
            AbiValue::String(name.to_string()),
            AbiValue::String(role.to_string()),
            AbiValue::String(metadata.to_string()),
        ];
        self.transact(&self.capabilities.register_device, &args).await
    }

    /// Grant access to a device until `expiry` (unix seconds, 0 = no expiry)
    pub async fn grant_access(&self, address: &str, expiry: u64) -> Envelope<()> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };
        info!(device = %address, expiry, "Granting access");

        let args = [AbiValue::Address(address), AbiValue::Uint(u128::from(expiry))];
        self.transact(&self.capabilities.grant_access, &args).await
    }

    /// Revoke a device's access
    pub async fn revoke_access(&self, address: &str) -> Envelope<()> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };
        info!(device = %address, "Revoking access");

        self.transact(&self.capabilities.revoke_access, &[AbiValue::Address(address)])
            .await
    }

    /// Assign a new role to a device
    pub async fn assign_role(&self, address: &str, role: &str) -> Envelope<()> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };
        info!(device = %address, role, "Assigning role");

        let args = [AbiValue::Address(address), AbiValue::String(role.to_string())];
        self.transact(&self.capabilities.assign_role, &args).await
    }

    /// Record an access event on-chain from the sending account
    pub async fn log_access(&self, reason: &str) -> Envelope<()> {
        info!(reason, "Logging access");
        self.transact(
            &self.capabilities.log_access,
            &[AbiValue::String(reason.to_string())],
        )
        .await
    }

    async fn transact(&self, function: &FunctionEntry, args: &[AbiValue]) -> Envelope<()> {
        match self.ledger.submit_transaction(function, args).await {
            Ok(outcome) if outcome.success => {
                info!(function = %function.name, tx_hash = %outcome.transaction_id, "Transaction succeeded");
                Envelope::confirmed(outcome.transaction_id)
            }
            Ok(outcome) => {
                warn!(function = %function.name, tx_hash = %outcome.transaction_id, "Transaction failed");
                let message = outcome
                    .error
                    .unwrap_or_else(|| "Transaction reverted".into());
                Envelope::failed(Some(outcome.transaction_id), message)
            }
            Err(e) => report(function.name.as_str(), e),
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Whether the contract currently grants access to `address`
    pub async fn check_access(&self, address: &str) -> Envelope<bool> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };

        let result = self
            .ledger
            .call_read_only(&self.capabilities.check_access, &[AbiValue::Address(address.clone())])
            .await
            .and_then(|values| self.capabilities.decode_access(&values));

        match result {
            Ok(allowed) => {
                debug!(device = %address, allowed, "Access checked");
                Envelope::success(allowed)
            }
            Err(e) => report("check_access", e),
        }
    }

    /// On-chain device record
    pub async fn get_device_info(&self, address: &str) -> Envelope<DeviceInfo> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };

        let result = self
            .ledger
            .call_read_only(&self.capabilities.device_info, &[AbiValue::Address(address.clone())])
            .await
            .map(|values| self.capabilities.decode_device_info(&address, &values));

        match result {
            Ok(info) => Envelope::success(info),
            Err(e) => report("get_device_info", e),
        }
    }

    /// Access events straight from the ledger
    pub async fn get_logs(&self, from: BlockTag, to: BlockTag) -> Envelope<Vec<LedgerEvent>> {
        match self
            .ledger
            .fetch_events(&self.capabilities.access_event, from, to)
            .await
        {
            Ok(events) => Envelope::success(events).with_count(),
            Err(e) => report("get_logs", e),
        }
    }

    // =========================================================================
    // CACHE
    // =========================================================================

    /// Mirror all access events into the cache
    pub async fn sync_cache(&self) -> Envelope<SyncReport> {
        let sync = match self.orchestrator() {
            Ok(s) => s,
            Err(e) => return e.into(),
        };
        match sync.sync_all().await {
            Ok(summary) => Envelope::success(summary)
                .with_message(format!("Synced {} new access logs", summary.inserted)),
            Err(e) => report_fault("sync_cache", e),
        }
    }

    /// Refresh one device's cached record from the ledger
    pub async fn sync_device(&self, address: &str) -> Envelope<Option<Device>> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };
        let sync = match self.orchestrator() {
            Ok(s) => s,
            Err(e) => return e.into(),
        };
        match sync.sync_device(&address).await {
            Ok(device) => Envelope::success(device),
            Err(e) => report_fault("sync_device", e),
        }
    }

    /// Most recent cached access logs
    pub fn get_cached_logs(&self, limit: i64) -> Envelope<Vec<AccessLogEntry>> {
        self.with_store("get_cached_logs", |store| store.fetch_recent_logs(limit))
            .with_count()
    }

    /// Most recent cached access logs of one device
    pub fn get_cached_device_logs(&self, address: &str, limit: i64) -> Envelope<Vec<AccessLogEntry>> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };
        self.with_store("get_cached_device_logs", |store| {
            store.fetch_logs_for_device(&address, limit)
        })
        .with_count()
    }

    /// Cached device record, if synced
    pub fn get_cached_device(&self, address: &str) -> Envelope<Option<Device>> {
        let address = match canonical(address) {
            Ok(a) => a,
            Err(e) => return e.into(),
        };
        self.with_store("get_cached_device", |store| store.get_device(&address))
    }

    /// Every cached device record, ordered by name
    pub fn get_cached_devices(&self) -> Envelope<Vec<Device>> {
        self.with_store("get_cached_devices", |store| store.fetch_devices())
            .with_count()
    }

    pub fn cache_stats(&self) -> Envelope<CacheStats> {
        self.with_store("cache_stats", |store| store.stats())
    }

    /// Delete all cached rows; the data carries the removed counts
    pub fn clear_cache(&self) -> Envelope<CacheStats> {
        self.with_store("clear_cache", |store| store.clear_all())
    }

    /// Release the cache handle
    pub fn close(self) -> IamResult<()> {
        let Self { sync, cache, .. } = self;
        drop(sync);

        match cache.map(Arc::try_unwrap) {
            Some(Ok(store)) => store.close(),
            Some(Err(_)) => {
                debug!("Log store still shared; it closes when the last handle drops");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn store(&self) -> IamResult<&LogStore> {
        self.cache.as_deref().ok_or(IamError::CacheDisabled)
    }

    fn orchestrator(&self) -> IamResult<&SyncOrchestrator<L>> {
        self.sync.as_ref().ok_or(IamError::CacheDisabled)
    }

    fn with_store<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&LogStore) -> IamResult<T>,
    ) -> Envelope<T> {
        match self.store().and_then(f) {
            Ok(data) => Envelope::success(data),
            Err(e) => report_fault(operation, e),
        }
    }
}

fn canonical(address: &str) -> IamResult<String> {
    to_checksum_address(address).map_err(|e| {
        warn!(address, "Rejected invalid address");
        e
    })
}

/// Ledger fault -> `error` envelope
fn report<T>(operation: &str, err: IamError) -> Envelope<T> {
    error!(
        operation,
        category = err.category(),
        retryable = err.is_retryable(),
        error = %err,
        "Ledger operation failed"
    );
    err.into()
}

/// Cache or sync fault -> `error` envelope
fn report_fault<T>(operation: &str, err: IamError) -> Envelope<T> {
    if matches!(err, IamError::CacheDisabled) {
        debug!(operation, "Cache operation on a client without cache");
    } else {
        error!(operation, category = err.category(), error = %err, "Cache operation failed");
    }
    err.into()
}
