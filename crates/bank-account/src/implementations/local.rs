//! Key custodian backed by a private key held in process memory.
//!
//! Intended for scripted use and testing; the key is read from the
//! `private_key` field of `account.implementations.local`.

use crate::{CustodianError, CustodianFactory, CustodianInterface, CustodianRegistry};
use alloy_primitives::Address;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use bank_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, RawSignature, Schema, SecretString,
	TypedPayload, ValidationError,
};

/// Custodian signing with a local secp256k1 key.
pub struct LocalCustodian {
	signer: PrivateKeySigner,
	private_key: SecretString,
}

impl LocalCustodian {
	pub fn new(private_key: SecretString) -> Result<Self, CustodianError> {
		let signer = private_key.with_exposed(|key| {
			key.parse::<PrivateKeySigner>()
				.map_err(|e| CustodianError::InvalidKey(format!("Invalid private key: {}", e)))
		})?;
		Ok(Self {
			signer,
			private_key,
		})
	}
}

/// Schema of the `local` custodian table.
pub struct LocalCustodianSchema;

impl ConfigSchema for LocalCustodianSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|value| {
				let key = value.as_str().unwrap_or_default();
				let digits = key.strip_prefix("0x").unwrap_or(key);
				if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
					return Err("Private key must be 32 bytes of hex".to_string());
				}
				Ok(())
			})],
			vec![],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl CustodianInterface for LocalCustodian {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalCustodianSchema)
	}

	async fn address(&self) -> Result<Address, CustodianError> {
		Ok(self.signer.address())
	}

	async fn sign_typed_data(&self, payload: &TypedPayload) -> Result<RawSignature, CustodianError> {
		let signature = self
			.signer
			.sign_hash_sync(&payload.digest)
			.map_err(|e| CustodianError::Unavailable(format!("Signing failed: {}", e)))?;
		Ok(RawSignature(signature.as_bytes()))
	}

	fn get_private_key(&self) -> SecretString {
		self.private_key.clone()
	}
}

/// Builds a [`LocalCustodian`] from its configuration table.
pub fn create_custodian(
	config: &toml::Value,
) -> Result<Box<dyn CustodianInterface>, CustodianError> {
	LocalCustodianSchema
		.validate(config)
		.map_err(|e| CustodianError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.ok_or_else(|| CustodianError::InvalidKey("private_key is required".to_string()))?;

	Ok(Box::new(LocalCustodian::new(SecretString::from(private_key))?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = CustodianFactory;

	fn factory() -> Self::Factory {
		create_custodian
	}
}

impl CustodianRegistry for Registry {}
