//! Alloy-based EVM delivery.
//!
//! One HTTP provider per configured network, each with a wallet filler
//! holding the account key, so `submit` signs, fills nonce/gas and
//! broadcasts in one step.

use crate::{DeliveryError, DeliveryFactory, DeliveryInterface, DeliveryRegistry};
use alloy_network::EthereumWallet;
use alloy_primitives::{Bytes, FixedBytes};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::TransportError;
use alloy_transport_http::Http;
use async_trait::async_trait;
use bank_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, NetworksConfig, Schema,
	SecretString, Transaction, TransactionHash, TransactionReceipt, ValidationError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type HttpProvider = Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>;

/// EIP-1193 code for a request the user refused.
const USER_REJECTED_CODE: i64 = 4001;

/// Alloy delivery serving one or more networks.
pub struct AlloyDelivery {
	providers: HashMap<u64, HttpProvider>,
}

impl AlloyDelivery {
	pub fn new(
		network_ids: Vec<u64>,
		networks: &NetworksConfig,
		signer: PrivateKeySigner,
	) -> Result<Self, DeliveryError> {
		if network_ids.is_empty() {
			return Err(DeliveryError::Network(
				"At least one network_id must be specified".to_string(),
			));
		}

		let mut providers = HashMap::new();
		for network_id in network_ids {
			let network = networks.get(&network_id).ok_or_else(|| {
				DeliveryError::Network(format!("Network {} not found in configuration", network_id))
			})?;
			let url = network.rpc_url.parse().map_err(|e| {
				DeliveryError::Network(format!("Invalid RPC URL for network {}: {}", network_id, e))
			})?;

			let wallet = EthereumWallet::from(signer.clone().with_chain_id(Some(network_id)));
			let provider = ProviderBuilder::new()
				.with_recommended_fillers()
				.wallet(wallet)
				.on_http(url);
			provider.client().set_poll_interval(Duration::from_secs(3));

			providers.insert(network_id, Arc::new(provider) as HttpProvider);
		}

		Ok(Self { providers })
	}

	fn get_provider(&self, chain_id: u64) -> Result<&HttpProvider, DeliveryError> {
		self.providers
			.get(&chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))
	}
}

fn to_request(tx: &Transaction) -> TransactionRequest {
	TransactionRequest::default()
		.to(tx.to)
		.value(tx.value)
		.input(tx.data.clone().into())
}

/// Maps an RPC error response onto the delivery error taxonomy.
fn classify_rpc_error(code: Option<i64>, message: &str) -> DeliveryError {
	if code == Some(USER_REJECTED_CODE) {
		return DeliveryError::RejectedByWallet(message.to_string());
	}
	if message.contains("execution reverted") {
		let reason = message
			.split_once("execution reverted")
			.map(|(_, rest)| rest.trim_start_matches(':').trim())
			.filter(|rest| !rest.is_empty())
			.unwrap_or("no reason given");
		return DeliveryError::Reverted(reason.to_string());
	}
	DeliveryError::Network(message.to_string())
}

fn classify(err: TransportError) -> DeliveryError {
	match err.as_error_resp() {
		Some(payload) => classify_rpc_error(Some(payload.code), &payload.message),
		None => DeliveryError::Network(err.to_string()),
	}
}

/// Schema of the `evm_alloy` delivery table.
pub struct AlloyDeliverySchema;

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"network_ids",
				FieldType::Array(Box::new(FieldType::Integer {
					min: Some(1),
					max: None,
				})),
			)
			.with_validator(|value| match value.as_array() {
				Some(ids) if ids.is_empty() => Err("network_ids cannot be empty".to_string()),
				_ => Ok(()),
			})],
			vec![],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let provider = self.get_provider(tx.chain_id)?;
		let pending = provider
			.send_transaction(to_request(&tx))
			.await
			.map_err(classify)?;

		let tx_hash = TransactionHash(pending.tx_hash().0.to_vec());
		tracing::info!(
			tx_hash = %truncate_id(&tx_hash.to_string()),
			chain_id = tx.chain_id,
			"Submitted transaction"
		);
		Ok(tx_hash)
	}

	async fn call(&self, tx: &Transaction) -> Result<Bytes, DeliveryError> {
		let provider = self.get_provider(tx.chain_id)?;
		provider.call(&to_request(tx)).await.map_err(classify)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		if hash.0.len() != 32 {
			return Err(DeliveryError::Network(format!(
				"Invalid transaction hash length {}",
				hash.0.len()
			)));
		}
		let provider = self.get_provider(chain_id)?;
		let receipt = provider
			.get_transaction_receipt(FixedBytes::<32>::from_slice(&hash.0))
			.await
			.map_err(|e| {
				DeliveryError::Network(format!("Failed to get receipt on chain {}: {}", chain_id, e))
			})?;

		// A receipt without a block number belongs to a pending block.
		Ok(receipt.and_then(|receipt| {
			receipt.block_number.map(|block_number| TransactionReceipt {
				hash: TransactionHash(receipt.transaction_hash.0.to_vec()),
				block_number,
				success: receipt.status(),
			})
		}))
	}

	async fn get_block_number(&self, chain_id: u64) -> Result<u64, DeliveryError> {
		self.get_provider(chain_id)?
			.get_block_number()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get block number: {}", e)))
	}
}

/// Builds an [`AlloyDelivery`] for the networks listed in `network_ids`.
pub fn create_http_delivery(
	config: &toml::Value,
	networks: &NetworksConfig,
	private_key: &SecretString,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Network(format!("Invalid configuration: {}", e)))?;

	let network_ids = config
		.get("network_ids")
		.and_then(|v| v.as_array())
		.map(|ids| {
			ids.iter()
				.filter_map(|v| v.as_integer().and_then(|i| u64::try_from(i).ok()))
				.collect::<Vec<_>>()
		})
		.ok_or_else(|| DeliveryError::Network("network_ids is required".to_string()))?;

	let signer: PrivateKeySigner = private_key.with_exposed(|key| {
		key.parse()
			.map_err(|_| DeliveryError::Network("Invalid private key format".to_string()))
	})?;

	Ok(Box::new(AlloyDelivery::new(network_ids, networks, signer)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_http_delivery
	}
}

impl DeliveryRegistry for Registry {}
