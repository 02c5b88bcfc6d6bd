//! Mapping from host chain types to the persisted record shapes.
//!
//! Pure functions: identical inputs always yield identical records, which is
//! what makes block rewrites idempotent.

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::hex;
use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use mirror_data::types::{address_hex, hash_hex, AccessListSummary};
use mirror_data::{CanonicalBlock, LogSummary, TxRecord, TxSummary};

/// EIP-2930 access list transaction type.
const ACCESS_LIST_TX_TYPE: u8 = 1;
/// EIP-1559 dynamic fee transaction type.
const DYNAMIC_FEE_TX_TYPE: u8 = 2;

/// Gas price fields, selected by transaction type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasPricing {
    /// Legacy and access-list transactions carry a single gas price.
    Legacy { gas_price: u128 },
    /// Fee-market transactions carry a fee cap and a priority fee.
    FeeMarket {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl GasPricing {
    pub fn of(tx: &TxEnvelope) -> Self {
        match tx.gas_price() {
            Some(gas_price) => Self::Legacy { gas_price },
            None => Self::FeeMarket {
                max_fee_per_gas: tx.max_fee_per_gas(),
                max_priority_fee_per_gas: tx.max_priority_fee_per_gas().unwrap_or_default(),
            },
        }
    }

    /// The uniform "gas price" readers consume: the fee cap for fee-market
    /// transactions.
    pub fn gas_price(&self) -> u128 {
        match *self {
            Self::Legacy { gas_price } => gas_price,
            Self::FeeMarket {
                max_fee_per_gas, ..
            } => max_fee_per_gas,
        }
    }
}

pub fn tx_type(tx: &TxEnvelope) -> u8 {
    u8::from(tx.tx_type())
}

/// Recover the signer, or `None` if the signature does not yield one.
pub fn recover_sender(tx: &TxEnvelope) -> Option<Address> {
    match tx.recover_signer() {
        Ok(sender) => Some(sender),
        Err(err) => {
            tracing::warn!(hash = %tx.tx_hash(), %err, "sender recovery failed");
            None
        }
    }
}

/// Address a contract-creation transaction deploys to.
pub fn created_contract_address(tx: &TxEnvelope, sender: Option<Address>) -> Option<Address> {
    if tx.to().is_some() {
        return None;
    }
    sender.map(|from| from.create(tx.nonce()))
}

/// Pending transaction record stamped with `height`.
///
/// An unrecoverable sender is written as the zero address.
pub fn build_tx_record(tx: &TxEnvelope, height: u64) -> TxRecord {
    let sender = recover_sender(tx).unwrap_or(Address::ZERO);
    let pricing = GasPricing::of(tx);
    let (maxfeepergas, maxpriorityfeepergas) = match pricing {
        GasPricing::Legacy { .. } => (None, None),
        GasPricing::FeeMarket {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => (
            Some(max_fee_per_gas.to_string()),
            Some(max_priority_fee_per_gas.to_string()),
        ),
    };

    TxRecord {
        hash: hash_hex(tx.tx_hash()),
        nonce: tx.nonce(),
        from: address_hex(&sender),
        to: tx.to().map(|to| address_hex(&to)).unwrap_or_default(),
        rawdata: hex::encode_prefixed(tx.encoded_2718()),
        gasprice: pricing.gas_price().to_string(),
        gas: tx.gas_limit(),
        value: tx.value().to_string(),
        tx_type: tx_type(tx),
        maxfeepergas,
        maxpriorityfeepergas,
        blockchain_number: height,
        mined: None,
    }
}

/// Entry of a block record's transaction list.
pub fn build_tx_summary(tx: &TxEnvelope) -> TxSummary {
    let ty = tx_type(tx);
    let pricing = GasPricing::of(tx);
    let (max_fee_per_gas, max_priority_fee_per_gas) = match pricing {
        GasPricing::Legacy { .. } => (0, 0),
        GasPricing::FeeMarket {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => (max_fee_per_gas, max_priority_fee_per_gas),
    };

    let contract_address = if tx.to().is_none() {
        created_contract_address(tx, recover_sender(tx))
    } else {
        None
    };

    let access_list = if ty == ACCESS_LIST_TX_TYPE || ty == DYNAMIC_FEE_TX_TYPE {
        tx.access_list()
            .filter(|list| !list.0.is_empty())
            .map(|list| {
                list.0
                    .iter()
                    .map(|item| AccessListSummary {
                        address: address_hex(&item.address),
                        storage_keys: item.storage_keys.iter().map(hash_hex).collect(),
                    })
                    .collect()
            })
    } else {
        None
    };

    TxSummary {
        hash: hash_hex(tx.tx_hash()),
        tx_type: ty,
        nonce: tx.nonce(),
        gas_price: pricing.gas_price(),
        max_fee_per_gas,
        max_priority_fee_per_gas,
        gas_limit: tx.gas_limit(),
        value: tx.value().to_string(),
        input: hex::encode_prefixed(tx.input()),
        to: tx.to().map(|to| address_hex(&to)),
        contract_address: contract_address.map(|addr| address_hex(&addr)),
        access_list,
    }
}

/// Base fee in wei, or `"0"` for blocks without one.
pub fn block_gas_price(block: &CanonicalBlock) -> String {
    block
        .base_fee_per_gas
        .map(|fee| fee.to_string())
        .unwrap_or_else(|| "0".to_string())
}

/// Log summaries tied back to `block`.
///
/// Every log is stamped with the block's own hash and number. A log without
/// a transaction hash gets the hash of the block transaction at its index.
pub fn reconcile_logs(block: &CanonicalBlock, logs: &[Log]) -> Vec<LogSummary> {
    logs.iter()
        .map(|log| {
            let tx_index = log.transaction_index.unwrap_or_default();
            let tx_hash = match (log.transaction_hash, log.transaction_index) {
                (Some(hash), _) if hash != B256::ZERO => hash,
                (_, Some(index)) => match block.transactions.get(index as usize) {
                    Some(tx) => *tx.tx_hash(),
                    None => {
                        tracing::debug!(
                            block = block.number,
                            tx_index = index,
                            "log references a transaction index outside the block"
                        );
                        B256::ZERO
                    }
                },
                // no index to resolve against
                (_, None) => B256::ZERO,
            };

            LogSummary {
                address: address_hex(&log.inner.address),
                topics: log.inner.data.topics().iter().map(hash_hex).collect(),
                data: hex::encode_prefixed(&log.inner.data.data),
                block_number: block.number,
                transaction_hash: hash_hex(&tx_hash),
                transaction_index: format!("{tx_index:#x}"),
                block_hash: hash_hex(&block.hash),
                log_index: log.log_index.unwrap_or_default(),
                removed: log.removed,
            }
        })
        .collect()
}
