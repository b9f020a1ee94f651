use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used across all records, e.g. `2024-05-03T17:41:09.000Z`.
const TIME_MILLI_Z: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Render a unix timestamp (seconds) in the store's ISO-8601 millisecond layout.
pub fn timestamp_iso_millis(unix_secs: u64) -> String {
    DateTime::from_timestamp(unix_secs as i64, 0)
        .map(|dt| dt.format(TIME_MILLI_Z).to_string())
        .unwrap_or_default()
}

/// Current wall-clock time in the store's ISO-8601 millisecond layout.
pub fn timestamp_now() -> String {
    chrono::Utc::now().format(TIME_MILLI_Z).to_string()
}

/// One persisted chain block. Created once per block number, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub root: String,
    pub nonce: u64,
    pub timestamp: String,
    pub transactions: usize,
    pub base_fee: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub difficulty: u64,
    pub extra_data: String,
}

/// One persisted transaction, including the receipt enrichment fields.
///
/// The shell fields are derived from the wire transaction (the sender via
/// signature recovery, not the wire `from`); the receipt fields are merged in
/// before the record is written and stay at their zero values when the receipt
/// could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub gas: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_tip_cap: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_fee_cap: Option<u128>,
    pub value: String,
    pub nonce: u64,
    pub block_hash: String,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub v: u64,
    pub r: String,
    pub s: String,
    pub input: String,
    pub timestamp: String,

    // receipt enrichment
    pub status: u64,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub transaction_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_block_hash: Option<String>,
    pub receipt_block_number: u64,
}

/// One balance observation for one address. Append-only; a new snapshot is
/// written per (address, sampling event), preserving history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalanceSnapshot {
    pub address: String,
    pub balance: String,
    pub timestamp: String,
    pub block_number: u64,
}
