//! Configuration for the token bank client.
//!
//! Configuration is TOML. `${VAR}` and `${VAR:-default}` placeholders are
//! resolved from the environment before parsing, and a file may pull other
//! files in with `include = ["networks.toml", ...]`. Each top-level section
//! must appear in exactly one file.

mod loader;

pub use loader::ConfigLoader;

use bank_types::{networks::deserialize_networks, NetworkConfig, NetworksConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The full error embeds the whole input; keep only the message.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub bank: BankConfig,
	#[serde(deserialize_with = "deserialize_networks")]
	pub networks: NetworksConfig,
	pub delivery: DeliveryConfig,
	pub account: AccountConfig,
	#[serde(default)]
	pub flows: FlowsConfig,
}

/// Client instance settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BankConfig {
	pub id: String,
	/// Chain the client is connected to. Flows fail with a missing-chain
	/// error while this is unset.
	#[serde(default)]
	pub chain_id: Option<u64>,
	/// How long a submitted transaction is watched before it is reported as
	/// dropped.
	#[serde(default = "default_monitoring_timeout_minutes")]
	pub monitoring_timeout_minutes: u64,
	#[serde(default = "default_poll_interval_seconds")]
	pub poll_interval_seconds: u64,
}

fn default_monitoring_timeout_minutes() -> u64 {
	10
}

fn default_poll_interval_seconds() -> u64 {
	3
}

/// Transaction submitter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	/// Implementation tables keyed by implementation name.
	pub implementations: HashMap<String, toml::Value>,
	#[serde(default = "default_confirmations")]
	pub min_confirmations: u64,
}

fn default_confirmations() -> u64 {
	1
}

/// Key custodian settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// How the delegated batch scheme submits its deposit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegateMode {
	/// Single `depositToBank(token, bank, amount)` helper call on the delegate.
	#[default]
	DepositToBank,
	/// Explicit three-call `executeBatch` plan.
	ExecuteBatch,
}

/// Per-scheme flow settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlowsConfig {
	#[serde(default)]
	pub delegate_mode: DelegateMode,
}

/// Resolves `${VAR}` and `${VAR:-default}` placeholders from the environment.
///
/// Input is capped at 1MB so the regex scan stays bounded.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut output = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(full), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					name.as_str()
				)))
			},
		};
		output.push_str(&input[last..full.start()]);
		output.push_str(&value);
		last = full.end();
	}
	output.push_str(&input[last..]);

	Ok(output)
}

impl Config {
	/// Loads configuration from a file, following includes.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;

		ConfigLoader::new(base_dir).load_config(file_name).await
	}

	/// Returns the network the client is connected to, if one is selected.
	pub fn active_network(&self) -> Option<(u64, &NetworkConfig)> {
		let chain_id = self.bank.chain_id?;
		self.networks.get(&chain_id).map(|n| (chain_id, n))
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.bank.id.is_empty() {
			return Err(ConfigError::Validation("Bank ID cannot be empty".into()));
		}
		if self.bank.poll_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"poll_interval_seconds must be greater than 0".into(),
			));
		}
		if self.bank.monitoring_timeout_minutes == 0 {
			return Err(ConfigError::Validation(
				"monitoring_timeout_minutes must be greater than 0".into(),
			));
		}

		if self.networks.is_empty() {
			return Err(ConfigError::Validation(
				"Networks configuration cannot be empty".into(),
			));
		}
		for (chain_id, network) in &self.networks {
			if network.rpc_url.is_empty() {
				return Err(ConfigError::Validation(format!(
					"Network {} must have an rpc_url",
					chain_id
				)));
			}
			if network.token == network.bank {
				return Err(ConfigError::Validation(format!(
					"Network {} token and bank addresses must differ",
					chain_id
				)));
			}
			// 10^78 no longer fits in a uint256.
			if network.token_decimals > 77 {
				return Err(ConfigError::Validation(format!(
					"Network {} token_decimals cannot exceed 77",
					chain_id
				)));
			}
		}
		if let Some(chain_id) = self.bank.chain_id {
			if !self.networks.contains_key(&chain_id) {
				return Err(ConfigError::Validation(format!(
					"Active chain {} not found in networks config",
					chain_id
				)));
			}
		}

		if self.delivery.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one delivery implementation required".into(),
			));
		}
		if self.delivery.min_confirmations == 0 {
			return Err(ConfigError::Validation(
				"min_confirmations must be at least 1".into(),
			));
		}
		if self.delivery.min_confirmations > 100 {
			return Err(ConfigError::Validation(
				"min_confirmations cannot exceed 100".into(),
			));
		}
		self.validate_delivery_coverage()?;

		if self.account.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Account primary implementation cannot be empty".into(),
			));
		}
		if !self
			.account
			.implementations
			.contains_key(&self.account.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		Ok(())
	}

	/// Checks that every `network_ids` entry of a delivery implementation
	/// names a configured network and that no network is served twice.
	fn validate_delivery_coverage(&self) -> Result<(), ConfigError> {
		let mut coverage: HashMap<u64, &str> = HashMap::new();

		for (impl_name, impl_config) in &self.delivery.implementations {
			let Some(network_ids) = impl_config.get("network_ids").and_then(|v| v.as_array())
			else {
				continue;
			};
			for value in network_ids {
				let network_id = value
					.as_integer()
					.and_then(|n| u64::try_from(n).ok())
					.ok_or_else(|| {
						ConfigError::Validation(format!(
							"Invalid network_id in delivery '{}'",
							impl_name
						))
					})?;
				if !self.networks.contains_key(&network_id) {
					return Err(ConfigError::Validation(format!(
						"Delivery '{}' references network {} which doesn't exist in networks config",
						impl_name, network_id
					)));
				}
				if let Some(existing) = coverage.insert(network_id, impl_name) {
					return Err(ConfigError::Validation(format!(
						"Network {} is served by both '{}' and '{}'",
						network_id, existing, impl_name
					)));
				}
			}
		}

		Ok(())
	}
}

/// Parses configuration from TOML text, resolving environment variables and
/// validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
