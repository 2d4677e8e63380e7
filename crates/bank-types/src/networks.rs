//! Network configuration types.
//!
//! Each network entry names the RPC endpoint and the contract deployments the
//! bank client uses on that chain.

use crate::Address;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

fn default_token_decimals() -> u8 {
	18
}

fn default_permit_domain_version() -> String {
	"1".to_string()
}

/// Deployment settings for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkConfig {
	pub rpc_url: String,
	/// Permit-enabled token held in the bank.
	pub token: Address,
	/// Custodial ledger contract.
	pub bank: Address,
	/// Permit2 deployment; required by the universal permit scheme.
	#[serde(default)]
	pub permit2: Option<Address>,
	/// Batch delegate contract; required by the delegated batch scheme.
	#[serde(default)]
	pub delegate: Option<Address>,
	#[serde(default = "default_token_decimals")]
	pub token_decimals: u8,
	/// EIP-712 domain name of the token's `permit`.
	pub permit_domain_name: String,
	#[serde(default = "default_permit_domain_version")]
	pub permit_domain_version: String,
}

/// Networks keyed by chain id.
pub type NetworksConfig = HashMap<u64, NetworkConfig>;

/// Deserializes `[networks.<chain_id>]` tables, whose keys TOML delivers as
/// strings, into a map keyed by numeric chain id.
pub fn deserialize_networks<'de, D>(deserializer: D) -> Result<NetworksConfig, D::Error>
where
	D: Deserializer<'de>,
{
	let string_map: HashMap<String, NetworkConfig> = HashMap::deserialize(deserializer)?;
	string_map
		.into_iter()
		.map(|(key, value)| {
			key.parse::<u64>()
				.map(|chain_id| (chain_id, value))
				.map_err(|e| serde::de::Error::custom(format!("Invalid chain_id '{}': {}", key, e)))
		})
		.collect()
}
