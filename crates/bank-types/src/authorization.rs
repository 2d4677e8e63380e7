//! Off-chain authorization types.
//!
//! An authorization request is the immutable, one-shot statement a user signs
//! to let a spender move a bounded amount of a token. It is bound to a nonce
//! and a deadline; the receiving contract rejects it once either no longer
//! matches. The signature produced for a request is wrapped in an
//! [`AuthorizedSignature`] that can be consumed exactly once.

use crate::utils::{
	compute_domain_hash, compute_final_digest, permit_struct_hash,
	permit_transfer_from_struct_hash,
};
use crate::FlowId;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Signature schemes that require an off-chain authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorizationScheme {
	/// EIP-2612 `permit` on the token itself.
	Permit,
	/// Permit2 `PermitTransferFrom`, usable for any token approved to Permit2.
	UniversalPermit,
}

impl AuthorizationScheme {
	/// Returns the EIP-712 primary type signed for this scheme.
	pub fn primary_type(&self) -> &'static str {
		match self {
			AuthorizationScheme::Permit => "Permit",
			AuthorizationScheme::UniversalPermit => "PermitTransferFrom",
		}
	}
}

/// EIP-712 domain descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip712Domain {
	pub name: String,
	pub version: Option<String>,
	pub chain_id: u64,
	pub verifying_contract: Address,
}

impl Eip712Domain {
	/// Computes the domain separator hash.
	pub fn separator(&self) -> B256 {
		compute_domain_hash(
			&self.name,
			self.version.as_deref(),
			self.chain_id,
			&self.verifying_contract,
		)
	}

	fn to_json(&self) -> serde_json::Value {
		let mut domain = json!({
			"name": self.name,
			"chainId": self.chain_id,
			"verifyingContract": format!("{:#x}", self.verifying_contract),
		});
		if let Some(version) = &self.version {
			domain["version"] = json!(version);
		}
		domain
	}
}

/// Unique identifier of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationId(pub Uuid);

impl AuthorizationId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for AuthorizationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for AuthorizationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// An off-chain authorization awaiting signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
	pub id: AuthorizationId,
	/// Flow instance this request was built for.
	pub flow_id: FlowId,
	pub scheme: AuthorizationScheme,
	pub owner: Address,
	pub spender: Address,
	pub token: Address,
	pub amount: U256,
	pub nonce: U256,
	/// Unix timestamp (seconds) after which the contract rejects the request.
	pub deadline: u64,
	pub domain: Eip712Domain,
}

impl AuthorizationRequest {
	/// Returns true once `now` is past the deadline.
	pub fn is_expired(&self, now: u64) -> bool {
		now > self.deadline
	}

	/// Computes the EIP-712 struct hash of the message.
	pub fn struct_hash(&self) -> B256 {
		match self.scheme {
			AuthorizationScheme::Permit => permit_struct_hash(
				&self.owner,
				&self.spender,
				self.amount,
				self.nonce,
				U256::from(self.deadline),
			),
			AuthorizationScheme::UniversalPermit => permit_transfer_from_struct_hash(
				&self.token,
				self.amount,
				&self.spender,
				self.nonce,
				U256::from(self.deadline),
			),
		}
	}

	/// Computes the digest the custodian signs.
	pub fn digest(&self) -> B256 {
		compute_final_digest(&self.domain.separator(), &self.struct_hash())
	}

	/// Builds the typed structured-data payload presented to the custodian.
	pub fn typed_data(&self) -> TypedPayload {
		let (types, message) = match self.scheme {
			AuthorizationScheme::Permit => (
				json!({
					"Permit": [
						{ "name": "owner", "type": "address" },
						{ "name": "spender", "type": "address" },
						{ "name": "value", "type": "uint256" },
						{ "name": "nonce", "type": "uint256" },
						{ "name": "deadline", "type": "uint256" },
					],
				}),
				json!({
					"owner": format!("{:#x}", self.owner),
					"spender": format!("{:#x}", self.spender),
					"value": self.amount.to_string(),
					"nonce": self.nonce.to_string(),
					"deadline": self.deadline.to_string(),
				}),
			),
			AuthorizationScheme::UniversalPermit => (
				json!({
					"PermitTransferFrom": [
						{ "name": "permitted", "type": "TokenPermissions" },
						{ "name": "spender", "type": "address" },
						{ "name": "nonce", "type": "uint256" },
						{ "name": "deadline", "type": "uint256" },
					],
					"TokenPermissions": [
						{ "name": "token", "type": "address" },
						{ "name": "amount", "type": "uint256" },
					],
				}),
				json!({
					"permitted": {
						"token": format!("{:#x}", self.token),
						"amount": self.amount.to_string(),
					},
					"spender": format!("{:#x}", self.spender),
					"nonce": self.nonce.to_string(),
					"deadline": self.deadline.to_string(),
				}),
			),
		};

		TypedPayload {
			request_id: self.id,
			domain: self.domain.to_json(),
			primary_type: self.scheme.primary_type().to_string(),
			types,
			message,
			digest: self.digest(),
		}
	}
}

/// Typed structured data handed to the key custodian.
///
/// The JSON members follow the `eth_signTypedData_v4` layout; `digest` is the
/// hash a local key signs directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedPayload {
	pub request_id: AuthorizationId,
	pub domain: serde_json::Value,
	pub primary_type: String,
	pub types: serde_json::Value,
	pub message: serde_json::Value,
	pub digest: B256,
}

/// Errors raised when a raw signature cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureFormatError {
	#[error("Expected a 65-byte signature, got {0} bytes")]
	InvalidLength(usize),
	#[error("Invalid recovery byte {0}")]
	InvalidRecoveryByte(u8),
}

/// 65-byte ECDSA signature as returned by a custodian (`r || s || v`).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignature(#[serde(with = "serde_bytes65")] pub [u8; 65]);

impl RawSignature {
	pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureFormatError> {
		let array: [u8; 65] = bytes
			.try_into()
			.map_err(|_| SignatureFormatError::InvalidLength(bytes.len()))?;
		Ok(Self(array))
	}

	pub fn as_bytes(&self) -> &[u8; 65] {
		&self.0
	}

	/// Splits the signature into the `(v, r, s)` components expected by
	/// on-chain `ecrecover`.
	///
	/// r is bytes 0..32, s is bytes 32..64 and v is the final byte. Custodians
	/// that return a bare recovery id (0/1) are normalised to 27/28.
	pub fn split(&self) -> Result<SignatureParts, SignatureFormatError> {
		let v = match self.0[64] {
			v @ (27 | 28) => v,
			v @ (0 | 1) => v + 27,
			other => return Err(SignatureFormatError::InvalidRecoveryByte(other)),
		};
		Ok(SignatureParts {
			v,
			r: B256::from_slice(&self.0[..32]),
			s: B256::from_slice(&self.0[32..64]),
		})
	}
}

impl fmt::Debug for RawSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "RawSignature(0x{})", hex::encode(self.0))
	}
}

mod serde_bytes65 {
	use serde::{de::Error, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8; 65], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&format!("0x{}", hex::encode(bytes)))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 65], D::Error> {
		let s = String::deserialize(d)?;
		let bytes = hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom)?;
		bytes
			.as_slice()
			.try_into()
			.map_err(|_| D::Error::custom("signature must be 65 bytes"))
	}
}

/// Decomposed signature components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParts {
	pub v: u8,
	pub r: B256,
	pub s: B256,
}

/// A signature bound to the authorization request it was produced for.
///
/// Deliberately not `Clone`: the value is moved into the transaction that
/// consumes it, so it can be used at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthorizedSignature {
	pub request_id: AuthorizationId,
	pub flow_id: FlowId,
	pub signature: RawSignature,
}
