//! # Shared Data Types for the BlockIAM Client
//!
//! Cached projections of ledger state, ledger event records, and the
//! uniform result envelope returned by every public operation.

use serde::{Deserialize, Serialize};

use crate::error::IamError;

// =============================================================================
// CACHED PROJECTIONS
// =============================================================================

/// Cached projection of a device registered on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Canonical device address (primary key)
    pub address: String,

    /// Human-readable device name
    pub name: String,

    /// Device role (e.g. "sensor", "actuator")
    pub role: String,

    /// Free-form metadata
    pub metadata: String,

    /// Seconds since epoch, fixed by the first cache write
    pub registered_at: i64,

    /// Seconds since epoch of the latest cache write
    pub updated_at: i64,
}

/// Cached projection of an access event emitted by the contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Local surrogate key, assigned by the store and never reused
    pub id: i64,

    /// Subject device address
    pub device: String,

    /// Outcome of the access event
    pub success: bool,

    /// Reason recorded with the event
    pub reason: String,

    /// Event time as emitted by the ledger
    pub timestamp: i64,

    /// Transaction hash (dedup key)
    pub tx_hash: String,

    /// Local insertion time
    pub created_at: i64,
}

/// Access log row to be inserted (store assigns `id` and `created_at`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccessLog {
    pub device: String,
    pub success: bool,
    pub reason: String,
    pub timestamp: i64,
    pub tx_hash: String,
}

impl From<&LedgerEvent> for NewAccessLog {
    fn from(event: &LedgerEvent) -> Self {
        Self {
            device: event.device.clone(),
            success: event.success,
            reason: event.reason.clone(),
            timestamp: event.timestamp,
            tx_hash: event.transaction_id.clone(),
        }
    }
}

/// Row counts of the local cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached devices
    pub total_devices: u64,

    /// Number of cached access logs
    pub total_logs: u64,
}

// =============================================================================
// LEDGER RECORDS
// =============================================================================

/// Access event as returned by the ledger collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub device: String,
    pub success: bool,
    pub reason: String,
    pub timestamp: i64,

    /// Hash of the transaction that emitted the event
    pub transaction_id: String,

    pub block_number: u64,
}

/// On-chain device record as read through the contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: String,
    pub name: String,
    pub role: String,
    pub metadata: String,
    pub registered_at: i64,
    pub is_registered: bool,
}

impl DeviceInfo {
    /// Project the on-chain record into a cache row
    pub fn to_device(&self, now: i64) -> Device {
        Device {
            address: self.address.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            metadata: self.metadata.clone(),
            registered_at: if self.registered_at > 0 { self.registered_at } else { now },
            updated_at: now,
        }
    }
}

// =============================================================================
// RESULT ENVELOPE
// =============================================================================

/// Outcome class of a public operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Operation completed as requested
    Success,
    /// Remote operation rejected by the contract (e.g. reverted)
    Failed,
    /// Local or connectivity fault prevented completion
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::Failed => write!(f, "failed"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Uniform result structure returned by every public operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Number of items, set on list results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl<T> Envelope<T> {
    /// Successful result carrying data
    pub fn success(data: T) -> Self {
        Self {
            status: Status::Success,
            data: Some(data),
            transaction_id: None,
            message: None,
            count: None,
        }
    }

    /// Successful result for a confirmed transaction
    pub fn confirmed(transaction_id: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            data: None,
            transaction_id: Some(transaction_id.into()),
            message: None,
            count: None,
        }
    }

    /// Transaction executed but was rejected by the contract
    pub fn failed(transaction_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            data: None,
            transaction_id,
            message: Some(message.into()),
            count: None,
        }
    }

    /// Local or connectivity fault
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            transaction_id: None,
            message: Some(message.into()),
            count: None,
        }
    }

    /// Attach an informational message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether the status is `success`
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

impl<T> Envelope<Vec<T>> {
    /// Record the number of returned items in `count`
    pub fn with_count(mut self) -> Self {
        self.count = self.data.as_ref().map(Vec::len);
        self
    }
}

impl<T> From<Result<T, IamError>> for Envelope<T> {
    fn from(result: Result<T, IamError>) -> Self {
        match result {
            Ok(data) => Envelope::success(data),
            Err(err) => Envelope::from(err),
        }
    }
}

impl<T> From<IamError> for Envelope<T> {
    fn from(err: IamError) -> Self {
        Envelope::error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization_shape() {
        let env: Envelope<()> = Envelope::confirmed("0xabc");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["transactionId"], "0xabc");
        assert!(json.get("data").is_none());
        assert!(json.get("message").is_none());

        let env: Envelope<bool> = Envelope::failed(Some("0xdef".into()), "Transaction reverted");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "Transaction reverted");
    }

    #[test]
    fn test_list_envelope_carries_count() {
        let env = Envelope::success(vec![1, 2, 3]).with_count();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["count"], 3);

        let env: Envelope<Vec<u8>> = Envelope::error("boom").with_count();
        assert!(env.count.is_none());
        assert!(serde_json::to_value(&env).unwrap().get("count").is_none());
    }

    #[test]
    fn test_envelope_from_error() {
        let env: Envelope<u64> = Err(IamError::InvalidAddress("0x1".into())).into();
        assert_eq!(env.status, Status::Error);
        assert_eq!(env.message.as_deref(), Some("Invalid address: 0x1"));
        assert!(env.data.is_none());
    }

    #[test]
    fn test_device_info_projection() {
        let info = DeviceInfo {
            address: "0xA".into(),
            name: "thermo".into(),
            role: "sensor".into(),
            metadata: String::new(),
            registered_at: 0,
            is_registered: true,
        };
        let device = info.to_device(1_000);
        assert_eq!(device.registered_at, 1_000);
        assert_eq!(device.updated_at, 1_000);
        assert_eq!(device.name, "thermo");
    }
}
