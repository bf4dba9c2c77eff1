//! # Sync Orchestrator
//!
//! Pulls access events from the ledger and records each one in the local
//! log store exactly once. Re-running a sync over an unchanged ledger only
//! produces duplicates, so the operation is safe to repeat.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use shared::{
    error::IamResult,
    types::{Device, NewAccessLog},
    utils::to_checksum_address,
};

use crate::cache::LogStore;
use crate::ledger::{AbiValue, BlockTag, ContractCapabilities, LedgerClient};

/// Counts from one sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Events returned by the ledger
    pub fetched: usize,

    /// Events newly recorded
    pub inserted: usize,

    /// Events already present in the store
    pub duplicates: usize,
}

/// Coordinates the ledger and the local store
pub struct SyncOrchestrator<L> {
    ledger: Arc<L>,
    store: Arc<LogStore>,
    capabilities: Arc<ContractCapabilities>,

    /// First block of a full sync
    from_block: u64,
}

impl<L> Clone for SyncOrchestrator<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            store: Arc::clone(&self.store),
            capabilities: Arc::clone(&self.capabilities),
            from_block: self.from_block,
        }
    }
}

impl<L: LedgerClient> SyncOrchestrator<L> {
    pub fn new(
        ledger: Arc<L>,
        store: Arc<LogStore>,
        capabilities: Arc<ContractCapabilities>,
        from_block: u64,
    ) -> Self {
        Self {
            ledger,
            store,
            capabilities,
            from_block,
        }
    }

    /// Mirror every access event from the configured start block to the tip
    pub async fn sync_all(&self) -> IamResult<SyncReport> {
        self.sync_range(BlockTag::Number(self.from_block), BlockTag::Latest)
            .await
    }

    /// Mirror the access events emitted in `[from, to]`
    ///
    /// Nothing is written if the fetch fails. A storage fault stops the run
    /// at the failing event; events recorded before it stay recorded.
    pub async fn sync_range(&self, from: BlockTag, to: BlockTag) -> IamResult<SyncReport> {
        let events = self
            .ledger
            .fetch_events(&self.capabilities.access_event, from, to)
            .await
            .map_err(|e| {
                warn!(error = %e, %from, %to, "Failed to fetch access events");
                e
            })?;

        let mut report = SyncReport {
            fetched: events.len(),
            ..SyncReport::default()
        };

        for event in &events {
            let outcome = self
                .store
                .insert_log_if_absent(&NewAccessLog::from(event))
                .map_err(|e| {
                    warn!(
                        error = %e,
                        tx_hash = %event.transaction_id,
                        inserted = report.inserted,
                        "Sync stopped by storage fault"
                    );
                    e
                })?;

            if outcome.is_inserted() {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        info!(
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "Access log sync complete"
        );
        Ok(report)
    }

    /// Refresh the cached record of one device from the ledger
    ///
    /// Returns `None` when the ledger does not know the device; the cache
    /// is left untouched in that case.
    pub async fn sync_device(&self, address: &str) -> IamResult<Option<Device>> {
        let address = to_checksum_address(address)?;
        let values = self
            .ledger
            .call_read_only(
                &self.capabilities.device_info,
                &[AbiValue::Address(address.clone())],
            )
            .await?;

        let info = self.capabilities.decode_device_info(&address, &values);
        if !info.is_registered {
            debug!(device = %address, "Device not registered on ledger");
            return Ok(None);
        }

        self.store.upsert_device(&info.to_device(Utc::now().timestamp()))?;
        info!(device = %address, "Device record cached");
        self.store.get_device(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use shared::{config::ContractConfig, error::IamError};

    const DEVICE: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const OTHER: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    fn setup() -> (Arc<InMemoryLedger>, Arc<LogStore>, SyncOrchestrator<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::default());
        let store = Arc::new(LogStore::open_in_memory().unwrap());
        let caps = Arc::new(ContractCapabilities::from_config(&ContractConfig::default()).unwrap());
        let sync = SyncOrchestrator::new(Arc::clone(&ledger), Arc::clone(&store), caps, 0);
        (ledger, store, sync)
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (ledger, store, sync) = setup();
        ledger.emit_access_event(DEVICE, true, "granted", 100);
        ledger.emit_access_event(OTHER, false, "denied", 200);
        ledger.emit_access_event(DEVICE, true, "granted", 300);

        let first = sync.sync_all().await.unwrap();
        assert_eq!(
            first,
            SyncReport {
                fetched: 3,
                inserted: 3,
                duplicates: 0
            }
        );

        let second = sync.sync_all().await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(store.stats().unwrap().total_logs, 3);

        let recent = store.fetch_recent_logs(10).unwrap();
        let timestamps: Vec<i64> = recent.iter().map(|l| l.timestamp).collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn test_sync_picks_up_new_events_only() {
        let (ledger, store, sync) = setup();
        ledger.emit_access_event(DEVICE, true, "first", 100);
        sync.sync_all().await.unwrap();

        ledger.emit_access_event(DEVICE, false, "second", 200);
        let report = sync.sync_all().await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.fetch_logs_for_device(DEVICE, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_store_untouched() {
        let (ledger, store, sync) = setup();
        ledger.emit_access_event(DEVICE, true, "granted", 100);
        ledger.set_offline(true);

        let err = sync.sync_all().await.unwrap_err();
        assert!(matches!(err, IamError::Connectivity { .. }));
        assert_eq!(store.stats().unwrap().total_logs, 0);
    }

    #[tokio::test]
    async fn test_storage_fault_keeps_earlier_inserts() {
        let (ledger, store, sync) = setup();
        let mut hashes = Vec::new();
        for i in 0..5 {
            hashes.push(ledger.emit_access_event(DEVICE, true, "ok", 100 + i));
        }

        // Fail on the third event
        store.with_connection(|conn| {
            conn.execute_batch(&format!(
                "CREATE TRIGGER fail_third BEFORE INSERT ON logs \
                 WHEN NEW.txHash = '{}' \
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
                hashes[2]
            ))
            .unwrap();
        });

        let err = sync.sync_all().await.unwrap_err();
        assert!(matches!(err, IamError::Storage(_)));
        assert_eq!(store.stats().unwrap().total_logs, 2);
    }

    #[tokio::test]
    async fn test_sync_range_bounds() {
        let (ledger, store, sync) = setup();
        for i in 0..5 {
            ledger.emit_access_event(DEVICE, true, "ok", 100 + i);
        }

        let report = sync
            .sync_range(BlockTag::Number(2), BlockTag::Number(4))
            .await
            .unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(store.stats().unwrap().total_logs, 3);
    }

    #[tokio::test]
    async fn test_sync_device_registered_and_unknown() {
        let (ledger, store, sync) = setup();
        let caps = ContractCapabilities::from_config(&ContractConfig::default()).unwrap();
        ledger
            .submit_transaction(
                &caps.register_device,
                &[
                    AbiValue::Address(DEVICE.into()),
                    AbiValue::String("thermo".into()),
                    AbiValue::String("sensor".into()),
                    AbiValue::String("floor 2".into()),
                ],
            )
            .await
            .unwrap();

        let device = sync.sync_device(&DEVICE.to_lowercase()).await.unwrap().unwrap();
        assert_eq!(device.address, DEVICE);
        assert_eq!(device.role, "sensor");
        assert_eq!(device.metadata, "floor 2");

        assert!(sync.sync_device(OTHER).await.unwrap().is_none());
        assert_eq!(store.stats().unwrap().total_devices, 1);
    }
}
