//! Transaction delivery types.
//!
//! A [`Transaction`] is the chain-agnostic description of a contract call the
//! submitter turns into a signed, broadcast transaction. Hashes and receipts
//! come back the other way.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A contract call ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	pub chain_id: u64,
	pub to: Address,
	pub data: Bytes,
	pub value: U256,
}

impl Transaction {
	/// Creates a zero-value call to `to` with ABI-encoded `data`.
	pub fn call(chain_id: u64, to: Address, data: impl Into<Bytes>) -> Self {
		Self {
			chain_id,
			to,
			data: data.into(),
			value: U256::ZERO,
		}
	}
}

/// Blockchain transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub hash: TransactionHash,
	pub block_number: u64,
	/// False when the call reverted.
	pub success: bool,
}
