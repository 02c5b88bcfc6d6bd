//! Shared test helpers and utilities.
//!
//! Provides factory functions for signed transactions, canonical blocks and
//! logs, plus mirrors wired to the in-memory backend.

#![allow(dead_code)]

use alloy::consensus::{
    SignableTransaction, Signed, TxEip1559, TxEip2930, TxEnvelope, TxLegacy,
};
use alloy::eips::eip2930::{AccessList, AccessListItem};
use alloy::primitives::{Address, Bytes, LogData, PrimitiveSignature, TxKind, B256, U256};
use alloy::rpc::types::Log;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use mirror_core::ChainMirror;
use mirror_data::{CanonicalBlock, MemoryBackend, MirrorConfig};
use std::sync::Arc;

/// Recipient of every call transaction built here.
pub const RECIPIENT: Address = Address::repeat_byte(0x70);

/// Deterministic signer used by all transaction factories.
///
/// # Panics
/// Never; the key is a valid secp256k1 scalar.
pub fn test_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::repeat_byte(0x42)).expect("fixed test key is valid")
}

fn sign<T>(tx: T) -> TxEnvelope
where
    T: SignableTransaction<PrimitiveSignature>,
    TxEnvelope: From<Signed<T>>,
{
    let sig = test_signer()
        .sign_hash_sync(&tx.signature_hash())
        .expect("local signing cannot fail");
    TxEnvelope::from(tx.into_signed(sig))
}

/// Legacy transfer carrying an all-zero signature, so no sender can be
/// recovered from it. The hash is fixed since nothing signed it.
pub fn unrecoverable_tx(nonce: u64) -> TxEnvelope {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 20,
        gas_limit: 21_000,
        to: TxKind::Call(RECIPIENT),
        value: U256::from(1u64),
        input: Bytes::new(),
    };
    let signature = PrimitiveSignature::new(U256::ZERO, U256::ZERO, false);
    TxEnvelope::from(Signed::new_unchecked(tx, signature, B256::repeat_byte(0x5a)))
}

/// Creates a signed legacy transfer with the given nonce and gas price (wei).
///
/// # Example
/// ```ignore
/// let tx = legacy_tx(0, 20);
/// assert_eq!(tx.gas_price(), Some(20));
/// ```
pub fn legacy_tx(nonce: u64, gas_price: u128) -> TxEnvelope {
    sign(TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price,
        gas_limit: 21_000,
        to: TxKind::Call(RECIPIENT),
        value: U256::from(1_000u64),
        input: Bytes::new(),
    })
}

/// Creates a signed EIP-2930 transaction touching one storage slot.
pub fn access_list_tx(nonce: u64) -> TxEnvelope {
    sign(TxEip2930 {
        chain_id: 1,
        nonce,
        gas_price: 15,
        gas_limit: 60_000,
        to: TxKind::Call(RECIPIENT),
        value: U256::ZERO,
        input: Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb]),
        access_list: AccessList(vec![AccessListItem {
            address: RECIPIENT,
            storage_keys: vec![B256::repeat_byte(0x01)],
        }]),
    })
}

/// Creates a signed EIP-1559 transfer with the given fee cap and tip (wei).
pub fn dynamic_fee_tx(nonce: u64, max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> TxEnvelope {
    sign(TxEip1559 {
        chain_id: 1,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        to: TxKind::Call(RECIPIENT),
        value: U256::from(5u64),
        access_list: AccessList::default(),
        input: Bytes::new(),
    })
}

/// Creates a signed legacy contract deployment.
pub fn creation_tx(nonce: u64) -> TxEnvelope {
    sign(TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 10,
        gas_limit: 500_000,
        to: TxKind::Create,
        value: U256::ZERO,
        input: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52]),
    })
}

/// Creates a canonical block whose hash is derived from its height.
///
/// # Example
/// ```ignore
/// let block = sample_block(100, vec![legacy_tx(0, 20)]);
/// assert_eq!(block.base_fee_per_gas, Some(1_000_000_000));
/// ```
pub fn sample_block(number: u64, transactions: Vec<TxEnvelope>) -> CanonicalBlock {
    CanonicalBlock {
        hash: B256::left_padding_from(&number.to_be_bytes()),
        number,
        base_fee_per_gas: Some(1_000_000_000), // 1 gwei
        transactions,
    }
}

/// Creates a log emitted by the transaction at `tx_index`.
///
/// The block hash is deliberately wrong so tests can check it is corrected.
pub fn sample_log(tx_index: u64, log_index: u64, tx_hash: Option<B256>) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: RECIPIENT,
            data: LogData::new_unchecked(
                vec![B256::repeat_byte(0xdd)],
                Bytes::from_static(&[0x00, 0x2a]),
            ),
        },
        block_hash: Some(B256::repeat_byte(0xee)),
        transaction_hash: tx_hash,
        transaction_index: Some(tx_index),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// Starts a mirror on a fresh in-memory backend.
///
/// # Example
/// ```ignore
/// let (mirror, backend) = memory_mirror(MirrorConfig::default()).await;
/// ```
pub async fn memory_mirror(config: MirrorConfig) -> (ChainMirror, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let mirror = ChainMirror::with_backend(backend.clone(), &config)
        .await
        .expect("memory-backed mirror always starts");
    (mirror, backend)
}
