//! Chain reader backed by `eth_call`.

use alloy_sol_types::SolCall;
use async_trait::async_trait;
use bank_cache::{CacheError, ChainReader};
use bank_delivery::{DeliveryError, DeliveryService};
use bank_types::contracts::IBankToken;
use bank_types::{FactKey, FactKind, FactValue, Transaction};
use std::sync::Arc;

/// Reads account facts with view calls on the active network.
pub struct ContractReader {
	delivery: Arc<DeliveryService>,
	chain_id: Option<u64>,
}

impl ContractReader {
	pub fn new(delivery: Arc<DeliveryService>, chain_id: Option<u64>) -> Self {
		Self { delivery, chain_id }
	}
}

fn decode_error(key: &FactKey, err: alloy_sol_types::Error) -> CacheError {
	CacheError::Decode(format!("{}: {}", key, err))
}

#[async_trait]
impl ChainReader for ContractReader {
	async fn read(&self, key: &FactKey) -> Result<FactValue, CacheError> {
		let chain_id = self
			.chain_id
			.ok_or_else(|| CacheError::Read("no active network".to_string()))?;

		// Ledger `balanceOf` shares the token's signature.
		let data = match key.kind {
			FactKind::Balance => IBankToken::balanceOfCall {
				account: key.account,
			}
			.abi_encode(),
			FactKind::Allowance { spender } => IBankToken::allowanceCall {
				owner: key.account,
				spender,
			}
			.abi_encode(),
			FactKind::Nonce => IBankToken::noncesCall { owner: key.account }.abi_encode(),
			FactKind::Symbol => IBankToken::symbolCall {}.abi_encode(),
		};

		let output = self
			.delivery
			.call(&Transaction::call(chain_id, key.contract, data))
			.await
			.map_err(|e| match e {
				DeliveryError::NoProviderAvailable(chain_id) => CacheError::UnknownChain(chain_id),
				other => CacheError::Read(other.to_string()),
			})?;

		let value = match key.kind {
			FactKind::Balance => FactValue::Amount(
				IBankToken::balanceOfCall::abi_decode_returns(&output, true)
					.map_err(|e| decode_error(key, e))?
					._0,
			),
			FactKind::Allowance { .. } => FactValue::Amount(
				IBankToken::allowanceCall::abi_decode_returns(&output, true)
					.map_err(|e| decode_error(key, e))?
					._0,
			),
			FactKind::Nonce => FactValue::Amount(
				IBankToken::noncesCall::abi_decode_returns(&output, true)
					.map_err(|e| decode_error(key, e))?
					._0,
			),
			FactKind::Symbol => FactValue::Text(
				IBankToken::symbolCall::abi_decode_returns(&output, true)
					.map_err(|e| decode_error(key, e))?
					._0,
			),
		};
		Ok(value)
	}
}
