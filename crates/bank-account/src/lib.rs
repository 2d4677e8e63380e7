//! Key custodian access for the token bank client.
//!
//! The custodian holds the user's key and signs typed structured data on
//! request. [`SignatureService`] wraps it with the rules a flow relies on:
//! a request can be abandoned while the custodian is still deciding, and a
//! signature that arrives after abandonment is dropped rather than handed
//! back.

use async_trait::async_trait;
use bank_types::{
	truncate_id, Address, AuthorizationRequest, AuthorizedSignature, ConfigSchema,
	ImplementationRegistry, RawSignature, SecretString, TypedPayload,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub mod implementations {
	pub mod local;
}

/// Errors reported by a key custodian.
#[derive(Debug, Error)]
pub enum CustodianError {
	/// The user declined to sign.
	#[error("Signature rejected: {0}")]
	Rejected(String),
	/// The custodian could not be reached or failed internally.
	#[error("Custodian unavailable: {0}")]
	Unavailable(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
}

/// Errors from signature acquisition.
#[derive(Debug, Error)]
pub enum SignatureError {
	#[error("Signature rejected: {0}")]
	Rejected(String),
	#[error("Custodian unavailable: {0}")]
	Unavailable(String),
	/// The request was abandoned before or while the custodian answered.
	#[error("Signature request cancelled")]
	Cancelled,
	#[error("Malformed signature: {0}")]
	Malformed(String),
}

impl From<CustodianError> for SignatureError {
	fn from(err: CustodianError) -> Self {
		match err {
			CustodianError::Rejected(reason) => SignatureError::Rejected(reason),
			CustodianError::Unavailable(reason) => SignatureError::Unavailable(reason),
			CustodianError::InvalidKey(reason) => SignatureError::Unavailable(reason),
		}
	}
}

/// Interface every key custodian implements.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CustodianInterface: Send + Sync {
	/// Schema of the custodian's `account.implementations.<name>` table.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Address of the account whose key the custodian holds.
	async fn address(&self) -> Result<Address, CustodianError>;

	/// Signs EIP-712 typed data, returning the 65-byte `r || s || v`
	/// signature.
	async fn sign_typed_data(&self, payload: &TypedPayload) -> Result<RawSignature, CustodianError>;

	/// Key used by the transaction submitter to sign outgoing transactions.
	fn get_private_key(&self) -> SecretString;
}

/// Factory building a custodian from its configuration table.
pub type CustodianFactory =
	fn(&toml::Value) -> Result<Box<dyn CustodianInterface>, CustodianError>;

pub trait CustodianRegistry: ImplementationRegistry<Factory = CustodianFactory> {}

/// All custodian implementations, as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, CustodianFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Signature acquisition on top of a key custodian.
pub struct SignatureService {
	custodian: Box<dyn CustodianInterface>,
}

impl SignatureService {
	pub fn new(custodian: Box<dyn CustodianInterface>) -> Self {
		Self { custodian }
	}

	pub async fn get_address(&self) -> Result<Address, CustodianError> {
		self.custodian.address().await
	}

	pub fn get_private_key(&self) -> SecretString {
		self.custodian.get_private_key()
	}

	/// Asks the custodian to sign `request` and binds the result to it.
	///
	/// Returns [`SignatureError::Cancelled`] if `cancel` fires before the
	/// custodian answers, and also if it fired while the answer was being
	/// produced: a late signature is never returned.
	#[instrument(skip_all, fields(request_id = %truncate_id(&request.id.to_string()), flow_id = %truncate_id(&request.flow_id.to_string())))]
	pub async fn request_signature(
		&self,
		request: &AuthorizationRequest,
		cancel: &CancellationToken,
	) -> Result<AuthorizedSignature, SignatureError> {
		if cancel.is_cancelled() {
			return Err(SignatureError::Cancelled);
		}

		let payload = request.typed_data();
		debug!(primary_type = %payload.primary_type, "Requesting signature");

		let signature = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				info!("Signature request abandoned");
				return Err(SignatureError::Cancelled);
			}
			result = self.custodian.sign_typed_data(&payload) => result?,
		};

		if cancel.is_cancelled() {
			warn!("Discarding signature received after abandonment");
			return Err(SignatureError::Cancelled);
		}

		signature
			.split()
			.map_err(|e| SignatureError::Malformed(e.to_string()))?;

		info!("Signature received");
		Ok(AuthorizedSignature {
			request_id: request.id,
			flow_id: request.flow_id,
			signature,
		})
	}
}
