//! Transfer orchestration core for the token bank client.
//!
//! This crate sequences the primitives provided by the other crates into the
//! user-facing flows: it builds off-chain authorizations, acquires their
//! signatures, binds them to the dependent contract call, submits and tracks
//! the resulting transactions, and invalidates the cached account facts each
//! confirmed operation affects.

pub mod authorization;
pub mod builder;
pub mod engine;
pub mod monitoring;
pub mod reader;
pub mod state;

pub use authorization::{
	AuthorizationBuilder, AuthorizationError, Clock, ManualClock, SystemClock,
	AUTHORIZATION_WINDOW_SECS,
};
pub use builder::{BankBuilder, BankFactories, BuilderError};
pub use engine::event_bus::EventBus;
pub use engine::flow::{
	affected_facts, AllowanceStep, DelegatedBatchStep, Flow, FlowHandle, UniversalPermitStep,
};
pub use engine::{BankEngine, SpenderRole};

use bank_account::SignatureError;
use bank_cache::CacheError;
use bank_delivery::DeliveryError;
use thiserror::Error;

/// Errors a flow can end with.
///
/// `UserRejected` and `Cancelled` are silent: the flow returns to idle
/// without an error report. Every other variant is surfaced to the caller.
/// Nothing is retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
	#[error("Signature request rejected by the key custodian")]
	UserRejected,
	#[error("Key custodian unavailable: {0}")]
	CustodianUnavailable(String),
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
	#[error("No active network")]
	MissingChain,
	#[error("Rejected by wallet: {0}")]
	RejectedByWallet(String),
	#[error("Submission failed: {0}")]
	SubmissionError(String),
	#[error("Reverted on-chain: {reason}")]
	OnChainRevert { reason: String },
	/// The authorization deadline passed before the signature was bound.
	#[error("Authorization expired at {deadline}")]
	Expired { deadline: u64 },
	/// The signature was produced for a different request or flow instance.
	#[error("Signature does not belong to this authorization")]
	SignatureMismatch,
	#[error("Flow cancelled")]
	Cancelled,
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl FlowError {
	/// True for outcomes that return to idle without reporting an error.
	pub fn is_silent(&self) -> bool {
		matches!(self, FlowError::UserRejected | FlowError::Cancelled)
	}
}

impl From<AuthorizationError> for FlowError {
	fn from(err: AuthorizationError) -> Self {
		match err {
			AuthorizationError::InvalidAmount => {
				FlowError::InvalidAmount("amount must be greater than zero".into())
			},
			AuthorizationError::MissingChain => FlowError::MissingChain,
			AuthorizationError::MissingContract(name) => {
				FlowError::Configuration(format!("{} address not configured", name))
			},
		}
	}
}

impl From<SignatureError> for FlowError {
	fn from(err: SignatureError) -> Self {
		match err {
			SignatureError::Rejected(_) => FlowError::UserRejected,
			SignatureError::Unavailable(msg) => FlowError::CustodianUnavailable(msg),
			SignatureError::Cancelled => FlowError::Cancelled,
			SignatureError::Malformed(msg) => {
				FlowError::CustodianUnavailable(format!("malformed signature: {}", msg))
			},
		}
	}
}

impl From<DeliveryError> for FlowError {
	fn from(err: DeliveryError) -> Self {
		match err {
			DeliveryError::RejectedByWallet(msg) => FlowError::RejectedByWallet(msg),
			DeliveryError::Reverted(reason) => FlowError::OnChainRevert { reason },
			DeliveryError::Network(msg) => FlowError::SubmissionError(msg),
			DeliveryError::NoProviderAvailable(chain_id) => {
				FlowError::SubmissionError(format!("no provider for chain {}", chain_id))
			},
		}
	}
}

impl From<CacheError> for FlowError {
	fn from(err: CacheError) -> Self {
		FlowError::SubmissionError(format!("chain read failed: {}", err))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_silent_errors() {
		assert!(FlowError::UserRejected.is_silent());
		assert!(FlowError::Cancelled.is_silent());
		assert!(!FlowError::MissingChain.is_silent());
		assert!(!FlowError::OnChainRevert {
			reason: "PERMIT_DEADLINE_EXPIRED".into()
		}
		.is_silent());
	}

	#[test]
	fn test_error_mappings() {
		assert_eq!(
			FlowError::from(SignatureError::Rejected("user denied".into())),
			FlowError::UserRejected
		);
		assert_eq!(
			FlowError::from(DeliveryError::Reverted("InvalidNonce".into())),
			FlowError::OnChainRevert {
				reason: "InvalidNonce".into()
			}
		);
		assert!(matches!(
			FlowError::from(DeliveryError::Network("timeout".into())),
			FlowError::SubmissionError(_)
		));
		assert_eq!(
			FlowError::from(AuthorizationError::MissingChain),
			FlowError::MissingChain
		);
	}
}
