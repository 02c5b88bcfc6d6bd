//! Record and summary shapes persisted by the mirror.
//!
//! All hashes and addresses are rendered as lowercase `0x`-prefixed hex.
//! Field names are part of the external contract consumed by readers of the
//! store and must not change.

use alloy::consensus::TxEnvelope;
use alloy::hex;
use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MirrorError, MirrorResult};

/// Key prefix of pending transaction records.
pub const TX_PREFIX: &str = "tx:";
/// Key prefix of block records.
pub const BLOCK_PREFIX: &str = "block:";
/// Key prefix of block write leases.
pub const LEASE_PREFIX: &str = "lock:";

/// Ordered `(field, value)` pairs for one multi-field write.
pub type Fields = Vec<(String, Vec<u8>)>;
/// Fields read back from a record.
pub type FieldMap = BTreeMap<String, Vec<u8>>;

/// `tx:<64 hex chars>`; no `0x` in the key.
pub fn tx_key(hash: &B256) -> String {
    format!("{TX_PREFIX}{}", hex::encode(hash))
}

/// Inverse of [`tx_key`]. Anything that is not exactly 64 hex chars is rejected.
pub fn parse_tx_key(key: &str) -> Option<B256> {
    let digits = key.strip_prefix(TX_PREFIX)?;
    if digits.len() != 64 {
        return None;
    }
    digits.parse::<B256>().ok()
}

pub fn block_key(number: u64) -> String {
    format!("{BLOCK_PREFIX}{number}")
}

pub fn lease_key(number: u64) -> String {
    format!("{LEASE_PREFIX}{number}")
}

pub fn hash_hex(hash: &B256) -> String {
    format!("{hash:#x}")
}

pub fn address_hex(address: &Address) -> String {
    format!("{address:#x}")
}

fn field(name: &str, value: impl Into<Vec<u8>>) -> (String, Vec<u8>) {
    (name.to_string(), value.into())
}

fn text(map: &FieldMap, key: &str, name: &str) -> MirrorResult<String> {
    let raw = map
        .get(name)
        .ok_or_else(|| MirrorError::malformed(key, format!("missing field {name}")))?;
    String::from_utf8(raw.clone())
        .map_err(|_| MirrorError::malformed(key, format!("field {name} is not utf-8")))
}

fn number<T: std::str::FromStr>(map: &FieldMap, key: &str, name: &str) -> MirrorResult<T> {
    text(map, key, name)?
        .parse()
        .map_err(|_| MirrorError::malformed(key, format!("field {name} is not numeric")))
}

/// Pending transaction record, keyed by [`tx_key`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    pub nonce: u64,
    /// Recovered sender; the zero address when recovery failed.
    pub from: String,
    /// Empty for contract creation.
    pub to: String,
    /// Hex of the signed EIP-2718 encoding.
    pub rawdata: String,
    /// Legacy gas price, or max fee per gas for fee-market transactions.
    pub gasprice: String,
    pub gas: u64,
    pub value: String,
    pub tx_type: u8,
    pub maxfeepergas: Option<String>,
    pub maxpriorityfeepergas: Option<String>,
    /// Chain height observed when the record was written.
    pub blockchain_number: u64,
    /// Present once the host reported the transaction as mined.
    pub mined: Option<MinedStatus>,
}

impl TxRecord {
    /// Field set written by the transaction path. Never includes `mined`.
    pub fn to_fields(&self) -> Fields {
        let mut fields = vec![
            field("hash", self.hash.as_str()),
            field("nonce", self.nonce.to_string()),
            field("from", self.from.as_str()),
            field("to", self.to.as_str()),
            field("rawdata", self.rawdata.as_str()),
            field("gasprice", self.gasprice.as_str()),
            field("gas", self.gas.to_string()),
            field("value", self.value.as_str()),
            field("type", self.tx_type.to_string()),
            field("blockchain_number", self.blockchain_number.to_string()),
        ];
        if let Some(max_fee) = &self.maxfeepergas {
            fields.push(field("maxfeepergas", max_fee.as_str()));
        }
        if let Some(tip) = &self.maxpriorityfeepergas {
            fields.push(field("maxpriorityfeepergas", tip.as_str()));
        }
        fields
    }

    /// Decode a record read back from the store.
    ///
    /// # Errors
    /// Returns `MalformedRecord` if a mandatory field is missing or unparsable.
    pub fn from_fields(key: &str, map: &FieldMap) -> MirrorResult<Self> {
        let optional = |name: &str| -> MirrorResult<Option<String>> {
            if map.contains_key(name) {
                text(map, key, name).map(Some)
            } else {
                Ok(None)
            }
        };
        let mined = if map.contains_key("block_hash") {
            Some(MinedStatus {
                block_hash: text(map, key, "block_hash")?,
                block_number: number(map, key, "block_number")?,
                tx_index: number(map, key, "tx_index")?,
                status: number(map, key, "status")?,
            })
        } else {
            None
        };
        Ok(Self {
            hash: text(map, key, "hash")?,
            nonce: number(map, key, "nonce")?,
            from: text(map, key, "from")?,
            to: text(map, key, "to")?,
            rawdata: text(map, key, "rawdata")?,
            gasprice: text(map, key, "gasprice")?,
            gas: number(map, key, "gas")?,
            value: text(map, key, "value")?,
            tx_type: number(map, key, "type")?,
            maxfeepergas: optional("maxfeepergas")?,
            maxpriorityfeepergas: optional("maxpriorityfeepergas")?,
            blockchain_number: number(map, key, "blockchain_number")?,
            mined,
        })
    }
}

/// Inclusion details written by `UpdateTxStatus`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinedStatus {
    pub block_hash: String,
    pub block_number: u64,
    pub tx_index: u64,
    pub status: u64,
}

impl MinedStatus {
    pub fn to_fields(&self) -> Fields {
        vec![
            field("block_hash", self.block_hash.as_str()),
            field("block_number", self.block_number.to_string()),
            field("tx_index", self.tx_index.to_string()),
            field("status", self.status.to_string()),
        ]
    }
}

/// Per-transaction entry of a block record's `txs` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSummary {
    pub hash: String,
    #[serde(rename = "type")]
    pub tx_type: u8,
    pub nonce: u64,
    pub gas_price: u128,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub gas_limit: u64,
    /// Decimal wei.
    pub value: String,
    pub input: String,
    pub to: Option<String>,
    /// Derived from sender and nonce for contract creation.
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListSummary>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListSummary {
    pub address: String,
    pub storage_keys: Vec<String>,
}

/// Event log entry of a block record's `logs` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    /// `0x`-prefixed hex index.
    pub transaction_index: String,
    pub block_hash: String,
    pub log_index: u64,
    pub removed: bool,
}

/// Block record, keyed by [`block_key`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub blockhash: String,
    pub blocknumber: u64,
    /// Base fee in wei, or `"0"` before the fee market.
    pub blockgasprice: String,
    /// Serialized (and possibly compressed) `Vec<TxSummary>`.
    pub txs: Vec<u8>,
    /// Serialized (and possibly compressed) `Vec<LogSummary>`.
    pub logs: Vec<u8>,
}

impl BlockRecord {
    pub fn to_fields(&self) -> Fields {
        vec![
            field("blockhash", self.blockhash.as_str()),
            field("blocknumber", self.blocknumber.to_string()),
            field("blockgasprice", self.blockgasprice.as_str()),
            field("txs", self.txs.clone()),
            field("logs", self.logs.clone()),
        ]
    }
}

/// A canonical block as handed over by the host chain.
#[derive(Clone, Debug)]
pub struct CanonicalBlock {
    pub hash: B256,
    pub number: u64,
    pub base_fee_per_gas: Option<u64>,
    pub transactions: Vec<TxEnvelope>,
}

impl CanonicalBlock {
    pub fn tx_hashes(&self) -> Vec<B256> {
        self.transactions.iter().map(|tx| *tx.tx_hash()).collect()
    }
}
