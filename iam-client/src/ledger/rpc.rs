//! # JSON-RPC Ledger Client
//!
//! [`LedgerClient`] implementation over an Ethereum-compatible JSON-RPC
//! node. Transactions are sent from a node-managed account with
//! `eth_sendTransaction`; the client then polls for the receipt until the
//! configured timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use shared::{
    config::LedgerConfig,
    constants::{RECEIPT_POLL_INTERVAL_MS, RPC_REQUEST_TIMEOUT_SECS},
    error::{IamError, IamResult},
    types::LedgerEvent,
    utils::to_checksum_address,
};

use super::abi::{decode_hex, decode_topic, AbiValue, EventEntry, FunctionEntry};
use super::{event_from_values, BlockTag, LedgerClient, TransactionOutcome};

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    topics: Vec<String>,
    data: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

// =============================================================================
// CLIENT
// =============================================================================

/// Ledger client speaking JSON-RPC 2.0 over HTTP
pub struct JsonRpcLedger {
    /// Node endpoint
    endpoint: String,

    /// Deployed IAM contract (checksummed)
    contract_address: String,

    /// Node-managed sender account (checksummed)
    account_address: String,

    chain_id: u64,
    gas_limit: u64,
    receipt_timeout: Duration,

    /// HTTP client
    http_client: reqwest::Client,

    /// JSON-RPC request id counter
    next_id: AtomicU64,
}

impl std::fmt::Debug for JsonRpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcLedger")
            .field("endpoint", &self.endpoint)
            .field("contract_address", &self.contract_address)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl JsonRpcLedger {
    /// Build a client without contacting the node
    pub fn new(config: &LedgerConfig) -> IamResult<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| IamError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.rpc_url()?.to_string(),
            contract_address: to_checksum_address(config.contract_address()?)?,
            account_address: to_checksum_address(config.account_address()?)?,
            chain_id: config.chain_id,
            gas_limit: config.gas_limit,
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Build a client and confirm the node serves the configured chain
    pub async fn connect(config: &LedgerConfig) -> IamResult<Self> {
        let ledger = Self::new(config)?;

        let chain_id: String = ledger.request("eth_chainId", json!([])).await?;
        let chain_id = parse_quantity(&chain_id)?;
        if chain_id != ledger.chain_id {
            return Err(IamError::Configuration(format!(
                "node at '{}' serves chain {}, expected {}",
                ledger.endpoint, chain_id, ledger.chain_id
            )));
        }

        info!(
            endpoint = %ledger.endpoint,
            contract = %ledger.contract_address,
            chain_id,
            "Connected to ledger"
        );
        Ok(ledger)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue one JSON-RPC request and deserialize its result
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> IamResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "JSON-RPC request");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.connectivity(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(IamError::Connectivity {
                endpoint: self.endpoint.clone(),
                reason: format!("{method} returned HTTP {status}: {text}"),
            });
        }

        let reply: RpcResponse = response.json().await.map_err(|e| self.connectivity(e))?;
        if let Some(err) = reply.error {
            return Err(IamError::Contract(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }

        Ok(serde_json::from_value(reply.result.unwrap_or(Value::Null))?)
    }

    fn connectivity(&self, err: reqwest::Error) -> IamError {
        IamError::Connectivity {
            endpoint: self.endpoint.clone(),
            reason: err.to_string(),
        }
    }

    /// Poll for the receipt of `tx_hash` until it appears or the timeout passes
    async fn wait_for_receipt(&self, tx_hash: &str) -> IamResult<RpcReceipt> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let receipt: Option<RpcReceipt> = self
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(IamError::ReceiptTimeout {
                    transaction_id: tx_hash.to_string(),
                    timeout_secs: self.receipt_timeout.as_secs(),
                });
            }
            sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn submit_transaction(
        &self,
        function: &FunctionEntry,
        args: &[AbiValue],
    ) -> IamResult<TransactionOutcome> {
        let data = function.encode_call(args)?;
        let tx = json!({
            "from": self.account_address,
            "to": self.contract_address,
            "data": format!("0x{}", hex::encode(data)),
            "gas": format!("0x{:x}", self.gas_limit),
            "chainId": format!("0x{:x}", self.chain_id),
        });

        let tx_hash: String = self.request("eth_sendTransaction", json!([tx])).await?;
        debug!(function = %function.name, tx_hash = %tx_hash, "Transaction sent");

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let outcome = receipt_outcome(&receipt)?;
        if outcome.success {
            info!(
                function = %function.name,
                tx_hash = %outcome.transaction_id,
                block = ?receipt.block_number,
                "Transaction confirmed"
            );
        } else {
            warn!(
                function = %function.name,
                tx_hash = %outcome.transaction_id,
                "Transaction reverted"
            );
        }
        Ok(outcome)
    }

    async fn call_read_only(
        &self,
        function: &FunctionEntry,
        args: &[AbiValue],
    ) -> IamResult<Vec<AbiValue>> {
        let data = function.encode_call(args)?;
        let call = json!({
            "from": self.account_address,
            "to": self.contract_address,
            "data": format!("0x{}", hex::encode(data)),
        });

        let output: String = self.request("eth_call", json!([call, "latest"])).await?;
        let output = decode_hex(&output)?;
        if output.is_empty() && !function.outputs.is_empty() {
            return Err(IamError::Contract(format!(
                "{} returned no data; is the contract deployed at {}?",
                function.name, self.contract_address
            )));
        }
        function.decode_output(&output)
    }

    async fn fetch_events(
        &self,
        event: &EventEntry,
        from: BlockTag,
        to: BlockTag,
    ) -> IamResult<Vec<LedgerEvent>> {
        let filter = json!({
            "address": self.contract_address,
            "fromBlock": from.to_rpc(),
            "toBlock": to.to_rpc(),
            "topics": [event.topic_hex()],
        });

        let logs: Vec<RpcLog> = self.request("eth_getLogs", json!([filter])).await?;
        debug!(event = %event.name, count = logs.len(), %from, %to, "Fetched logs");

        let mut events = Vec::with_capacity(logs.len());
        for log in logs.into_iter().filter(|l| !l.removed) {
            events.push(convert_log(event, log)?);
        }
        events.sort_by_key(|(block, index, _)| (*block, *index));
        Ok(events.into_iter().map(|(_, _, e)| e).collect())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Parse a `0x`-prefixed hex quantity
fn parse_quantity(value: &str) -> IamResult<u64> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| IamError::Serialization(format!("quantity '{value}' lacks 0x prefix")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| IamError::Serialization(format!("quantity '{value}': {e}")))
}

fn receipt_outcome(receipt: &RpcReceipt) -> IamResult<TransactionOutcome> {
    match receipt.status.as_deref().map(parse_quantity).transpose()? {
        Some(1) => Ok(TransactionOutcome::confirmed(&receipt.transaction_hash)),
        Some(_) => Ok(TransactionOutcome::reverted(&receipt.transaction_hash)),
        // Pre-Byzantium receipts carry no status
        None => Err(IamError::Contract(format!(
            "receipt for {} has no status",
            receipt.transaction_hash
        ))),
    }
}

/// Decode one raw log, keyed by its position in the chain
fn convert_log(event: &EventEntry, log: RpcLog) -> IamResult<(u64, u64, LedgerEvent)> {
    let transaction_id = log
        .transaction_hash
        .ok_or_else(|| IamError::Contract("log without a transaction hash".into()))?;
    let block_number = log.block_number.as_deref().map(parse_quantity).transpose()?.unwrap_or(0);
    let log_index = log.log_index.as_deref().map(parse_quantity).transpose()?.unwrap_or(0);

    let topics = log
        .topics
        .iter()
        .map(|t| decode_topic(t))
        .collect::<IamResult<Vec<_>>>()?;
    let values = event.decode_log(&topics, &decode_hex(&log.data)?)?;

    Ok((
        block_number,
        log_index,
        event_from_values(event, &values, transaction_id, block_number),
    ))
}
