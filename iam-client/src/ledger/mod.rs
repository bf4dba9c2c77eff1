//! # Ledger Boundary
//!
//! Everything the client needs from the smart contract goes through the
//! [`LedgerClient`] trait: submitting state-changing transactions, making
//! read-only calls, and fetching access events over a block range.
//!
//! The concrete contract entry points are resolved once at startup into a
//! [`ContractCapabilities`] table, so callers never probe the contract for
//! alternative method or event names at call time.

pub mod abi;
pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use shared::{
    config::ContractConfig,
    error::{IamError, IamResult},
    types::{DeviceInfo, LedgerEvent},
};

pub use abi::{AbiType, AbiValue, EventEntry, FunctionEntry};
pub use memory::InMemoryLedger;
pub use rpc::JsonRpcLedger;

// =============================================================================
// LEDGER CLIENT TRAIT
// =============================================================================

/// Result of a submitted transaction once its receipt is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    /// Receipt status was success
    pub success: bool,

    /// Transaction hash
    pub transaction_id: String,

    /// Failure detail when `success` is false
    pub error: Option<String>,
}

impl TransactionOutcome {
    pub fn confirmed(transaction_id: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_id: transaction_id.into(),
            error: None,
        }
    }

    pub fn reverted(transaction_id: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: transaction_id.into(),
            error: Some("Transaction reverted".into()),
        }
    }
}

/// Block bound of an event query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl BlockTag {
    /// JSON-RPC encoding (`0x..` quantity or `latest`)
    pub fn to_rpc(&self) -> String {
        match self {
            BlockTag::Number(n) => format!("0x{n:x}"),
            BlockTag::Latest => "latest".into(),
        }
    }

    /// Whether block `n` falls at or below this bound
    pub fn includes(&self, n: u64) -> bool {
        match self {
            BlockTag::Number(bound) => n <= *bound,
            BlockTag::Latest => true,
        }
    }
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockTag::Number(n) => write!(f, "{n}"),
            BlockTag::Latest => write!(f, "latest"),
        }
    }
}

/// Interface to the IAM smart contract
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a state-changing call and wait for its receipt
    ///
    /// A reverted transaction is `Ok` with `success == false`; `Err` means
    /// the outcome could not be determined.
    async fn submit_transaction(
        &self,
        function: &FunctionEntry,
        args: &[AbiValue],
    ) -> IamResult<TransactionOutcome>;

    /// Execute a read-only call and decode its declared outputs
    async fn call_read_only(
        &self,
        function: &FunctionEntry,
        args: &[AbiValue],
    ) -> IamResult<Vec<AbiValue>>;

    /// Fetch all occurrences of `event` in `[from, to]`, in ledger order
    async fn fetch_events(
        &self,
        event: &EventEntry,
        from: BlockTag,
        to: BlockTag,
    ) -> IamResult<Vec<LedgerEvent>>;
}

// =============================================================================
// CONTRACT CAPABILITIES
// =============================================================================

/// Concrete contract entry points, one per logical operation
#[derive(Debug, Clone)]
pub struct ContractCapabilities {
    pub register_device: FunctionEntry,
    pub grant_access: FunctionEntry,
    pub revoke_access: FunctionEntry,
    pub assign_role: FunctionEntry,
    pub check_access: FunctionEntry,
    pub device_info: FunctionEntry,
    pub log_access: FunctionEntry,
    pub access_event: EventEntry,
}

impl ContractCapabilities {
    /// Parse and check every configured entry point
    pub fn from_config(config: &ContractConfig) -> IamResult<Self> {
        use AbiType::{Address, Bool, String as Text, Uint};

        let capabilities = Self {
            register_device: function(
                "register_device",
                &config.register_device,
                &[Address, Text, Text, Text],
            )?,
            grant_access: function("grant_access", &config.grant_access, &[Address, Uint])?,
            revoke_access: function("revoke_access", &config.revoke_access, &[Address])?,
            assign_role: function("assign_role", &config.assign_role, &[Address, Text])?,
            check_access: function("check_access", &config.check_access, &[Address])?,
            device_info: function("device_info", &config.device_info, &[Address])?,
            log_access: function("log_access", &config.log_access, &[Text])?,
            access_event: EventEntry::parse(&config.access_event).map_err(|e| {
                IamError::UnknownCapability {
                    name: "access_event".into(),
                    reason: e.to_string(),
                }
            })?,
        };

        if capabilities.check_access.outputs.first().map(|p| p.kind) != Some(Bool) {
            return Err(IamError::UnknownCapability {
                name: "check_access".into(),
                reason: "must return (bool)".into(),
            });
        }
        if capabilities.device_info.outputs.is_empty() {
            return Err(IamError::UnknownCapability {
                name: "device_info".into(),
                reason: "must declare its return values".into(),
            });
        }
        if capabilities.access_event.params.is_empty() {
            return Err(IamError::UnknownCapability {
                name: "access_event".into(),
                reason: "event declares no parameters".into(),
            });
        }

        Ok(capabilities)
    }

    /// Interpret the first output of the access check
    pub fn decode_access(&self, values: &[AbiValue]) -> IamResult<bool> {
        values
            .first()
            .and_then(AbiValue::as_bool)
            .ok_or_else(|| IamError::Contract("access check returned no bool".into()))
    }

    /// Interpret the device-info outputs as
    /// `(name, role, metadata, registeredAt, isRegistered)`
    ///
    /// Missing trailing values fall back to empty text, zero and `false`.
    pub fn decode_device_info(&self, address: &str, values: &[AbiValue]) -> DeviceInfo {
        let text = |i: usize| {
            values
                .get(i)
                .and_then(AbiValue::as_str)
                .unwrap_or_default()
                .to_string()
        };

        DeviceInfo {
            address: address.to_string(),
            name: text(0),
            role: text(1),
            metadata: text(2),
            registered_at: values
                .get(3)
                .and_then(AbiValue::as_uint)
                .and_then(|v| i64::try_from(v).ok())
                .unwrap_or(0),
            is_registered: values.get(4).and_then(AbiValue::as_bool).unwrap_or(false),
        }
    }
}

// =============================================================================
// EVENT MAPPING
// =============================================================================

/// Map decoded access-event values onto a ledger event
///
/// Fields are matched by parameter name (`device`, `success`, `reason`,
/// `timestamp`), then by the first parameter of the matching type.
/// Absent fields default to `""`, `true`, `""` and `0`.
pub fn event_from_values(
    event: &EventEntry,
    values: &[AbiValue],
    transaction_id: String,
    block_number: u64,
) -> LedgerEvent {
    let field = |name: &str, kind: AbiType| event_field(event, values, name, kind);

    LedgerEvent {
        device: field("device", AbiType::Address)
            .and_then(AbiValue::as_str)
            .unwrap_or_default()
            .to_string(),
        success: field("success", AbiType::Bool)
            .and_then(AbiValue::as_bool)
            .unwrap_or(true),
        reason: field("reason", AbiType::String)
            .and_then(AbiValue::as_str)
            .unwrap_or_default()
            .to_string(),
        timestamp: field("timestamp", AbiType::Uint)
            .and_then(AbiValue::as_uint)
            .and_then(|v| i64::try_from(v).ok())
            .unwrap_or(0),
        transaction_id,
        block_number,
    }
}

fn event_field<'a>(
    event: &EventEntry,
    values: &'a [AbiValue],
    name: &str,
    kind: AbiType,
) -> Option<&'a AbiValue> {
    let params = &event.params;
    let index = params
        .iter()
        .position(|p| p.name.as_deref() == Some(name))
        .or_else(|| params.iter().position(|p| p.kind == kind))?;
    values.get(index).filter(|v| v.kind() == kind)
}

fn function(name: &str, signature: &str, expected: &[AbiType]) -> IamResult<FunctionEntry> {
    let entry = FunctionEntry::parse(signature).map_err(|e| IamError::UnknownCapability {
        name: name.into(),
        reason: e.to_string(),
    })?;

    if entry.input_kinds() != expected {
        return Err(IamError::UnknownCapability {
            name: name.into(),
            reason: format!(
                "'{}' does not take {:?}",
                entry.canonical_signature(),
                expected
            ),
        });
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities_resolve() {
        let caps = ContractCapabilities::from_config(&ContractConfig::default()).unwrap();
        assert_eq!(caps.check_access.name, "checkAccess");
        assert_eq!(caps.access_event.name, "AccessLogged");
        assert!(caps.access_event.params[0].indexed);
    }

    #[test]
    fn test_override_with_alternate_name() {
        let config = ContractConfig {
            check_access: "hasAccess(address) returns (bool)".into(),
            access_event: "DeviceAccess(address indexed device,bool success,string reason,uint256 timestamp)"
                .into(),
            ..ContractConfig::default()
        };
        let caps = ContractCapabilities::from_config(&config).unwrap();
        assert_eq!(caps.check_access.name, "hasAccess");
        assert_eq!(caps.access_event.name, "DeviceAccess");
    }

    #[test]
    fn test_wrong_arity_is_unknown_capability() {
        let config = ContractConfig {
            grant_access: "grantAccess(address)".into(),
            ..ContractConfig::default()
        };
        match ContractCapabilities::from_config(&config) {
            Err(IamError::UnknownCapability { name, .. }) => assert_eq!(name, "grant_access"),
            other => panic!("expected unknown capability, got {other:?}"),
        }
    }

    #[test]
    fn test_check_access_must_return_bool() {
        let config = ContractConfig {
            check_access: "checkAccess(address)".into(),
            ..ContractConfig::default()
        };
        assert!(ContractCapabilities::from_config(&config).is_err());
    }

    #[test]
    fn test_event_fields_fall_back_to_defaults() {
        let config = ContractConfig {
            access_event: "Ping(address indexed who)".into(),
            ..ContractConfig::default()
        };
        let caps = ContractCapabilities::from_config(&config).unwrap();
        let addr = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let event = event_from_values(
            &caps.access_event,
            &[AbiValue::Address(addr.into())],
            "0xtx".into(),
            7,
        );

        assert_eq!(event.device, addr);
        assert!(event.success);
        assert_eq!(event.reason, "");
        assert_eq!(event.timestamp, 0);
        assert_eq!(event.block_number, 7);
    }

    #[test]
    fn test_device_info_partial_tuple() {
        let caps = ContractCapabilities::from_config(&ContractConfig::default()).unwrap();
        let info = caps.decode_device_info("0xA", &[AbiValue::String("thermo".into())]);
        assert_eq!(info.name, "thermo");
        assert_eq!(info.role, "");
        assert!(!info.is_registered);
    }

    #[test]
    fn test_block_tag_rpc_encoding() {
        assert_eq!(BlockTag::Number(255).to_rpc(), "0xff");
        assert_eq!(BlockTag::Latest.to_rpc(), "latest");
        assert!(BlockTag::Number(10).includes(10));
        assert!(!BlockTag::Number(10).includes(11));
    }
}
