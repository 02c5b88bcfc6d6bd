//! Signed transaction and block factories for unit tests.

use alloy::consensus::{SignableTransaction, TxEip1559, TxEip2930, TxEnvelope, TxLegacy};
use alloy::eips::eip2930::{AccessList, AccessListItem};
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use mirror_data::CanonicalBlock;

pub const RECIPIENT: Address = Address::repeat_byte(0x70);

pub fn signer() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::repeat_byte(0x42)).expect("valid test key")
}

fn sign<T>(tx: T) -> TxEnvelope
where
    T: SignableTransaction<alloy::primitives::PrimitiveSignature>,
    TxEnvelope: From<alloy::consensus::Signed<T>>,
{
    let sig = signer()
        .sign_hash_sync(&tx.signature_hash())
        .expect("signing never fails for a local key");
    TxEnvelope::from(tx.into_signed(sig))
}

pub fn legacy_tx(nonce: u64) -> TxEnvelope {
    sign(TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 20_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(RECIPIENT),
        value: U256::from(1_000u64),
        input: Bytes::new(),
    })
}

pub fn access_list_tx(nonce: u64) -> TxEnvelope {
    sign(TxEip2930 {
        chain_id: 1,
        nonce,
        gas_price: 15_000_000_000,
        gas_limit: 50_000,
        to: TxKind::Call(RECIPIENT),
        value: U256::ZERO,
        input: Bytes::from_static(&[0xde, 0xad]),
        access_list: AccessList(vec![AccessListItem {
            address: RECIPIENT,
            storage_keys: vec![B256::repeat_byte(0x01)],
        }]),
    })
}

pub fn dynamic_fee_tx(nonce: u64) -> TxEnvelope {
    sign(TxEip1559 {
        chain_id: 1,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas: 30_000_000_000,
        max_priority_fee_per_gas: 2_000_000_000,
        to: TxKind::Call(RECIPIENT),
        value: U256::from(5u64),
        access_list: AccessList::default(),
        input: Bytes::new(),
    })
}

pub fn creation_tx(nonce: u64) -> TxEnvelope {
    sign(TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 10_000_000_000,
        gas_limit: 500_000,
        to: TxKind::Create,
        value: U256::ZERO,
        input: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
    })
}

pub fn block(number: u64, transactions: Vec<TxEnvelope>) -> CanonicalBlock {
    CanonicalBlock {
        hash: B256::left_padding_from(&number.to_be_bytes()),
        number,
        base_fee_per_gas: Some(7),
        transactions,
    }
}
