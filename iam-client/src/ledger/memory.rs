//! # In-Memory Ledger
//!
//! A process-local stand-in for the IAM contract. It keeps devices, grants
//! and emitted access events behind locks and answers the default contract
//! entry points (`registerDevice`, `grantAccess`, `checkAccess`, ...).
//!
//! Used by tests and for offline experimentation. Faults can be injected
//! with [`InMemoryLedger::set_offline`] and [`InMemoryLedger::set_revert_all`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use shared::{
    error::{IamError, IamResult},
    types::LedgerEvent,
    utils::to_checksum_address,
};

use super::abi::{AbiValue, EventEntry, FunctionEntry};
use super::{BlockTag, LedgerClient, TransactionOutcome};

/// Sender used when none is given
pub const DEFAULT_SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

const ENDPOINT: &str = "memory://ledger";

#[derive(Debug, Clone)]
struct DeviceRecord {
    name: String,
    role: String,
    metadata: String,
    registered_at: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    devices: HashMap<String, DeviceRecord>,

    /// Device address -> expiry (0 = never)
    grants: HashMap<String, u128>,

    /// Emitted access events in ledger order
    events: Vec<LedgerEvent>,

    block_number: u64,
    tx_counter: u64,
}

impl LedgerState {
    /// Mine one transaction into a new block
    fn next_transaction(&mut self) -> (String, u64) {
        self.tx_counter += 1;
        self.block_number += 1;
        (format!("0x{:064x}", self.tx_counter), self.block_number)
    }
}

/// In-memory implementation of [`LedgerClient`]
pub struct InMemoryLedger {
    /// Account that sends transactions
    sender: String,

    state: RwLock<LedgerState>,

    /// Every call fails with a connectivity fault while set
    offline: AtomicBool,

    /// Every transaction reverts while set
    revert_all: AtomicBool,

    submissions: AtomicU64,
    reads: AtomicU64,
    fetches: AtomicU64,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_SENDER)
    }
}

impl InMemoryLedger {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            state: RwLock::new(LedgerState::default()),
            offline: AtomicBool::new(false),
            revert_all: AtomicBool::new(false),
            submissions: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_revert_all(&self, revert: bool) {
        self.revert_all.store(revert, Ordering::SeqCst);
    }

    /// Number of `submit_transaction` calls that reached the ledger
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of `call_read_only` calls that reached the ledger
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `fetch_events` calls that reached the ledger
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Emit an access event as if `device` had been checked on-chain
    ///
    /// Returns the transaction id of the emitting transaction.
    pub fn emit_access_event(
        &self,
        device: &str,
        success: bool,
        reason: &str,
        timestamp: i64,
    ) -> String {
        let mut state = self.state.write();
        let (transaction_id, block_number) = state.next_transaction();
        state.events.push(LedgerEvent {
            device: device.to_string(),
            success,
            reason: reason.to_string(),
            timestamp,
            transaction_id: transaction_id.clone(),
            block_number,
        });
        transaction_id
    }

    fn ensure_online(&self) -> IamResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IamError::Connectivity {
                endpoint: ENDPOINT.into(),
                reason: "ledger offline".into(),
            });
        }
        Ok(())
    }

    /// Apply one transaction; `false` means the contract reverted
    fn execute(&self, state: &mut LedgerState, function: &str, args: &[AbiValue]) -> IamResult<bool> {
        let now = chrono::Utc::now().timestamp();

        match function {
            "registerDevice" => {
                let device = address_arg(args, 0)?;
                if state.devices.contains_key(&device) {
                    return Ok(false);
                }
                state.devices.insert(
                    device,
                    DeviceRecord {
                        name: string_arg(args, 1)?,
                        role: string_arg(args, 2)?,
                        metadata: string_arg(args, 3)?,
                        registered_at: now,
                    },
                );
                Ok(true)
            }
            "grantAccess" => {
                let device = address_arg(args, 0)?;
                let expiry = args.get(1).and_then(AbiValue::as_uint).ok_or_else(|| bad_arg(1))?;
                if !state.devices.contains_key(&device) {
                    return Ok(false);
                }
                state.grants.insert(device, expiry);
                Ok(true)
            }
            "revokeAccess" => {
                let device = address_arg(args, 0)?;
                if !state.devices.contains_key(&device) {
                    return Ok(false);
                }
                state.grants.remove(&device);
                Ok(true)
            }
            "assignRole" => {
                let device = address_arg(args, 0)?;
                let role = string_arg(args, 1)?;
                match state.devices.get_mut(&device) {
                    Some(record) => {
                        record.role = role;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            "logAccess" => {
                let reason = string_arg(args, 0)?;
                let sender = to_checksum_address(&self.sender)?;
                let transaction_id = format!("0x{:064x}", state.tx_counter);
                let block_number = state.block_number;
                state.events.push(LedgerEvent {
                    device: sender,
                    success: true,
                    reason,
                    timestamp: now,
                    transaction_id,
                    block_number,
                });
                Ok(true)
            }
            other => Err(IamError::Contract(format!("function '{other}' not found"))),
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit_transaction(
        &self,
        function: &FunctionEntry,
        args: &[AbiValue],
    ) -> IamResult<TransactionOutcome> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        function.encode_call(args)?;

        let mut state = self.state.write();
        let (transaction_id, _) = state.next_transaction();

        let applied = if self.revert_all.load(Ordering::SeqCst) {
            false
        } else {
            self.execute(&mut state, &function.name, args)?
        };

        debug!(function = %function.name, tx = %transaction_id, applied, "Executed in-memory transaction");
        if applied {
            Ok(TransactionOutcome::confirmed(transaction_id))
        } else {
            Ok(TransactionOutcome::reverted(transaction_id))
        }
    }

    async fn call_read_only(
        &self,
        function: &FunctionEntry,
        args: &[AbiValue],
    ) -> IamResult<Vec<AbiValue>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        function.encode_call(args)?;

        let device = address_arg(args, 0)?;
        let state = self.state.read();

        match function.name.as_str() {
            "checkAccess" | "hasAccess" | "isAuthorized" => {
                let now = u128::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
                let allowed = state.devices.contains_key(&device)
                    && state
                        .grants
                        .get(&device)
                        .map(|expiry| *expiry == 0 || *expiry > now)
                        .unwrap_or(false);
                Ok(vec![AbiValue::Bool(allowed)])
            }
            "getDevice" | "getDeviceInfo" => Ok(match state.devices.get(&device) {
                Some(record) => vec![
                    AbiValue::String(record.name.clone()),
                    AbiValue::String(record.role.clone()),
                    AbiValue::String(record.metadata.clone()),
                    AbiValue::Uint(u128::try_from(record.registered_at).unwrap_or(0)),
                    AbiValue::Bool(true),
                ],
                None => vec![
                    AbiValue::String(String::new()),
                    AbiValue::String(String::new()),
                    AbiValue::String(String::new()),
                    AbiValue::Uint(0),
                    AbiValue::Bool(false),
                ],
            }),
            other => Err(IamError::Contract(format!("function '{other}' not found"))),
        }
    }

    async fn fetch_events(
        &self,
        _event: &EventEntry,
        from: BlockTag,
        to: BlockTag,
    ) -> IamResult<Vec<LedgerEvent>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let from = match from {
            BlockTag::Number(n) => n,
            BlockTag::Latest => self.state.read().block_number,
        };

        Ok(self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.block_number >= from && to.includes(e.block_number))
            .cloned()
            .collect())
    }
}

fn bad_arg(index: usize) -> IamError {
    IamError::Abi(format!("argument {index} has the wrong type"))
}

fn address_arg(args: &[AbiValue], index: usize) -> IamResult<String> {
    match args.get(index) {
        Some(AbiValue::Address(a)) => to_checksum_address(a),
        _ => Err(bad_arg(index)),
    }
}

fn string_arg(args: &[AbiValue], index: usize) -> IamResult<String> {
    match args.get(index) {
        Some(AbiValue::String(s)) => Ok(s.clone()),
        _ => Err(bad_arg(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ContractCapabilities;
    use shared::config::ContractConfig;

    const DEVICE: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn caps() -> ContractCapabilities {
        ContractCapabilities::from_config(&ContractConfig::default()).unwrap()
    }

    fn register_args() -> Vec<AbiValue> {
        vec![
            AbiValue::Address(DEVICE.into()),
            AbiValue::String("thermo".into()),
            AbiValue::String("sensor".into()),
            AbiValue::String(String::new()),
        ]
    }

    #[tokio::test]
    async fn test_register_then_duplicate_reverts() {
        let ledger = InMemoryLedger::default();
        let caps = caps();

        let first = ledger.submit_transaction(&caps.register_device, &register_args()).await.unwrap();
        assert!(first.success);

        let second = ledger.submit_transaction(&caps.register_device, &register_args()).await.unwrap();
        assert!(!second.success);
        assert_ne!(first.transaction_id, second.transaction_id);
    }

    #[tokio::test]
    async fn test_grant_and_check_access() {
        let ledger = InMemoryLedger::default();
        let caps = caps();
        let device = [AbiValue::Address(DEVICE.into())];

        ledger.submit_transaction(&caps.register_device, &register_args()).await.unwrap();
        let denied = ledger.call_read_only(&caps.check_access, &device).await.unwrap();
        assert_eq!(denied, vec![AbiValue::Bool(false)]);

        ledger
            .submit_transaction(&caps.grant_access, &[device[0].clone(), AbiValue::Uint(0)])
            .await
            .unwrap();
        let allowed = ledger.call_read_only(&caps.check_access, &device).await.unwrap();
        assert_eq!(allowed, vec![AbiValue::Bool(true)]);

        ledger.submit_transaction(&caps.revoke_access, &device).await.unwrap();
        let revoked = ledger.call_read_only(&caps.check_access, &device).await.unwrap();
        assert_eq!(revoked, vec![AbiValue::Bool(false)]);
    }

    #[tokio::test]
    async fn test_expired_grant_denies() {
        let ledger = InMemoryLedger::default();
        let caps = caps();
        let device = AbiValue::Address(DEVICE.into());

        ledger.submit_transaction(&caps.register_device, &register_args()).await.unwrap();
        ledger
            .submit_transaction(&caps.grant_access, &[device.clone(), AbiValue::Uint(1)])
            .await
            .unwrap();
        let result = ledger.call_read_only(&caps.check_access, &[device]).await.unwrap();
        assert_eq!(result, vec![AbiValue::Bool(false)]);
    }

    #[tokio::test]
    async fn test_events_filtered_by_block_range() {
        let ledger = InMemoryLedger::default();
        let caps = caps();
        for i in 0..4 {
            ledger.emit_access_event(DEVICE, true, "ok", 100 + i);
        }

        let all = ledger
            .fetch_events(&caps.access_event, BlockTag::Number(0), BlockTag::Latest)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);

        let middle = ledger
            .fetch_events(&caps.access_event, BlockTag::Number(2), BlockTag::Number(3))
            .await
            .unwrap();
        let timestamps: Vec<i64> = middle.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![101, 102]);
    }

    #[tokio::test]
    async fn test_log_access_emits_event_for_sender() {
        let ledger = InMemoryLedger::default();
        let caps = caps();

        let outcome = ledger
            .submit_transaction(&caps.log_access, &[AbiValue::String("door opened".into())])
            .await
            .unwrap();
        assert!(outcome.success);

        let events = ledger
            .fetch_events(&caps.access_event, BlockTag::Number(0), BlockTag::Latest)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device, DEFAULT_SENDER);
        assert_eq!(events[0].transaction_id, outcome.transaction_id);
    }

    #[tokio::test]
    async fn test_offline_and_revert_injection() {
        let ledger = InMemoryLedger::default();
        let caps = caps();

        ledger.set_offline(true);
        let err = ledger
            .fetch_events(&caps.access_event, BlockTag::Number(0), BlockTag::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, IamError::Connectivity { .. }));
        assert_eq!(ledger.fetch_count(), 1);

        ledger.set_offline(false);
        ledger.set_revert_all(true);
        let outcome = ledger.submit_transaction(&caps.register_device, &register_args()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Transaction reverted"));
    }
}
