//! Transaction submission for the token bank client.
//!
//! A delivery implementation signs and broadcasts contract calls, answers
//! read-only `eth_call`s and reports receipts. [`DeliveryService`] routes each
//! request to the implementation serving its chain. Submission is never
//! retried here: a failed submit is reported and the user starts over.

use async_trait::async_trait;
use bank_types::{
	Bytes, ConfigSchema, ImplementationRegistry, NetworksConfig, SecretString, Transaction,
	TransactionHash, TransactionReceipt,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors that can occur during transaction delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// The wallet refused to sign or send the transaction.
	#[error("Rejected by wallet: {0}")]
	RejectedByWallet(String),
	/// The node refused the call because it reverts.
	#[error("Execution reverted: {0}")]
	Reverted(String),
	/// Transport or RPC failure.
	#[error("Network error: {0}")]
	Network(String),
	#[error("No provider available for chain {0}")]
	NoProviderAvailable(u64),
}

/// Interface every delivery implementation provides.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Schema of the implementation's `delivery.implementations.<name>` table.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Signs and broadcasts the transaction, returning its hash once the node
	/// accepted it.
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError>;

	/// Executes the call against the latest block without sending it.
	async fn call(&self, tx: &Transaction) -> Result<Bytes, DeliveryError>;

	/// Returns the receipt, or `None` while the transaction is not mined.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	async fn get_block_number(&self, chain_id: u64) -> Result<u64, DeliveryError>;
}

/// Factory building a delivery implementation from its configuration table,
/// the network list and the signing key.
pub type DeliveryFactory = fn(
	&toml::Value,
	&NetworksConfig,
	&SecretString,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError>;

pub trait DeliveryRegistry: ImplementationRegistry<Factory = DeliveryFactory> {}

/// All delivery implementations, as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, DeliveryFactory)> {
	use implementations::evm::alloy;

	vec![(alloy::Registry::NAME, alloy::Registry::factory())]
}

/// Routes delivery requests by chain id.
pub struct DeliveryService {
	providers: HashMap<u64, Arc<dyn DeliveryInterface>>,
	min_confirmations: u64,
}

impl DeliveryService {
	pub fn new(providers: HashMap<u64, Arc<dyn DeliveryInterface>>, min_confirmations: u64) -> Self {
		Self {
			providers,
			min_confirmations,
		}
	}

	fn provider(&self, chain_id: u64) -> Result<&Arc<dyn DeliveryInterface>, DeliveryError> {
		self.providers
			.get(&chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))
	}

	/// Confirmations a receipt needs before an operation counts as succeeded.
	pub fn min_confirmations(&self) -> u64 {
		self.min_confirmations
	}

	pub async fn deliver(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		self.provider(tx.chain_id)?.submit(tx).await
	}

	pub async fn call(&self, tx: &Transaction) -> Result<Bytes, DeliveryError> {
		self.provider(tx.chain_id)?.call(tx).await
	}

	pub async fn get_receipt(
		&self,
		chain_id: u64,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.provider(chain_id)?.get_receipt(hash, chain_id).await
	}

	pub async fn get_block_number(&self, chain_id: u64) -> Result<u64, DeliveryError> {
		self.provider(chain_id)?.get_block_number(chain_id).await
	}

	/// Number of confirmations `receipt` has at the current head. The block
	/// containing the transaction counts as the first.
	pub async fn confirmations(
		&self,
		chain_id: u64,
		receipt: &TransactionReceipt,
	) -> Result<u64, DeliveryError> {
		let head = self.get_block_number(chain_id).await?;
		Ok((head + 1).saturating_sub(receipt.block_number))
	}
}
