//! Builder pattern for constructing bank engines.
//!
//! Composes a [`BankEngine`] from the configured key custodian and delivery
//! implementations using factory functions, then wires the chain reader,
//! fact cache and event bus around them.

use crate::authorization::{Clock, SystemClock};
use crate::engine::{event_bus::EventBus, BankEngine};
use crate::reader::ContractReader;
use bank_account::{CustodianError, CustodianInterface, SignatureService};
use bank_cache::FactCache;
use bank_config::Config;
use bank_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use bank_types::{NetworksConfig, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Factory functions for each pluggable component, keyed by implementation
/// name.
pub struct BankFactories<AF, DF> {
	pub account_factories: HashMap<String, AF>,
	pub delivery_factories: HashMap<String, DF>,
}

/// Builder for constructing a [`BankEngine`] with pluggable implementations.
pub struct BankBuilder {
	config: Config,
	clock: Arc<dyn Clock>,
}

impl BankBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			clock: Arc::new(SystemClock),
		}
	}

	/// Replaces the system clock, e.g. to control authorization deadlines.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub async fn build<AF, DF>(self, factories: BankFactories<AF, DF>) -> Result<BankEngine, BuilderError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn CustodianInterface>, CustodianError>,
		DF: Fn(
			&toml::Value,
			&NetworksConfig,
			&SecretString,
		) -> Result<Box<dyn DeliveryInterface>, DeliveryError>,
	{
		// Only the primary custodian is needed.
		let primary = self.config.account.primary.as_str();
		let account_config = self.config.account.implementations.get(primary).ok_or_else(|| {
			BuilderError::Config(format!("Primary account '{}' is not configured", primary))
		})?;
		let factory = factories.account_factories.get(primary).ok_or_else(|| {
			BuilderError::Config(format!("Unknown account implementation '{}'", primary))
		})?;
		let custodian = match factory(account_config) {
			Ok(custodian) => {
				tracing::info!(component = "account", implementation = %primary, "Loaded");
				custodian
			},
			Err(e) => {
				tracing::error!(
					component = "account",
					implementation = %primary,
					error = %e,
					"Failed to create account implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create account implementation '{}': {}",
					primary, e
				)));
			},
		};
		let signatures = Arc::new(SignatureService::new(custodian));

		let owner = match signatures.get_address().await {
			Ok(address) => address,
			Err(e) => {
				tracing::error!(component = "account", error = %e, "Failed to get account address");
				return Err(BuilderError::Config(format!(
					"Failed to get account address: {}",
					e
				)));
			},
		};
		let private_key = signatures.get_private_key();

		let mut delivery_implementations = HashMap::new();
		for (name, config) in &self.config.delivery.implementations {
			let Some(factory) = factories.delivery_factories.get(name) else {
				tracing::warn!(component = "delivery", implementation = %name, "Unknown implementation, skipping");
				continue;
			};
			match factory(config, &self.config.networks, &private_key) {
				Ok(implementation) => {
					let network_ids = config
						.get("network_ids")
						.and_then(|v| v.as_array())
						.ok_or_else(|| {
							BuilderError::Config(format!(
								"Delivery implementation '{}' missing network_ids configuration",
								name
							))
						})?;
					let implementation: Arc<dyn DeliveryInterface> = implementation.into();
					for network_id in network_ids.iter().filter_map(|v| v.as_integer()) {
						let network_id = network_id as u64;
						delivery_implementations.insert(network_id, implementation.clone());
						tracing::info!(component = "delivery", implementation = %name, network_id, "Loaded");
					}
				},
				Err(e) => {
					tracing::error!(
						component = "delivery",
						implementation = %name,
						error = %e,
						"Failed to create delivery implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create delivery implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		if delivery_implementations.is_empty() {
			tracing::warn!("No delivery implementations available - flows will not be able to submit transactions");
		}

		let delivery = Arc::new(DeliveryService::new(
			delivery_implementations,
			self.config.delivery.min_confirmations,
		));

		let reader = Arc::new(ContractReader::new(delivery.clone(), self.config.bank.chain_id));
		let cache = Arc::new(FactCache::new(reader));

		match self.config.active_network() {
			Some((chain_id, _)) => tracing::info!(chain_id, account = %owner, "Bank client ready"),
			None => tracing::warn!(account = %owner, "No active network - flows will fail until one is configured"),
		}

		Ok(BankEngine::new(
			&self.config,
			owner,
			cache,
			signatures,
			delivery,
			EventBus::new(1000),
			self.clock,
		))
	}
}
