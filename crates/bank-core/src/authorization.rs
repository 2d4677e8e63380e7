//! Authorization request construction.
//!
//! Builds the one-shot [`AuthorizationRequest`] each signature-carrying flow
//! needs from the active network, the owner's current nonce and the clock.
//! Every request is valid for a fixed window of [`AUTHORIZATION_WINDOW_SECS`]
//! from construction.

use alloy_primitives::{Address, U256};
use bank_types::utils::NAME_PERMIT2;
use bank_types::{
	AuthorizationId, AuthorizationRequest, AuthorizationScheme, Eip712Domain, FlowId,
	NetworkConfig,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Seconds an authorization stays valid after it is built.
pub const AUTHORIZATION_WINDOW_SECS: u64 = 3600;

/// Errors raised while building an authorization request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorizationError {
	#[error("Amount must be greater than zero")]
	InvalidAmount,
	#[error("No active network")]
	MissingChain,
	#[error("{0} address not configured")]
	MissingContract(&'static str),
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
	/// Milliseconds since the Unix epoch.
	fn now_millis(&self) -> u64;

	fn now_secs(&self) -> u64 {
		self.now_millis() / 1000
	}
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_millis(&self) -> u64 {
		chrono::Utc::now().timestamp_millis().max(0) as u64
	}
}

/// Clock that only moves when told to.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
	millis: Arc<AtomicU64>,
}

impl ManualClock {
	pub fn at_secs(secs: u64) -> Self {
		Self {
			millis: Arc::new(AtomicU64::new(secs * 1000)),
		}
	}

	pub fn advance(&self, by: Duration) {
		self.millis
			.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
	}

	pub fn set_secs(&self, secs: u64) {
		self.millis.store(secs * 1000, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now_millis(&self) -> u64 {
		self.millis.load(Ordering::SeqCst)
	}
}

/// Builds authorization requests.
pub struct AuthorizationBuilder {
	clock: Arc<dyn Clock>,
	/// Last universal-permit nonce handed out.
	last_universal_nonce: AtomicU64,
}

impl AuthorizationBuilder {
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self {
			clock,
			last_universal_nonce: AtomicU64::new(0),
		}
	}

	/// Returns a fresh universal-permit nonce.
	///
	/// Nonces follow wall-clock milliseconds but never repeat within the
	/// process: two calls in the same millisecond get consecutive values.
	pub fn next_universal_nonce(&self) -> U256 {
		let now = self.clock.now_millis();
		let mut last = self.last_universal_nonce.load(Ordering::SeqCst);
		loop {
			let next = now.max(last + 1);
			match self.last_universal_nonce.compare_exchange_weak(
				last,
				next,
				Ordering::SeqCst,
				Ordering::SeqCst,
			) {
				Ok(_) => return U256::from(next),
				Err(current) => last = current,
			}
		}
	}

	/// Builds a request for `scheme` on the active network.
	///
	/// The spender is always the bank; the deadline is now plus
	/// [`AUTHORIZATION_WINDOW_SECS`]. `nonce` must have been read just before
	/// this call: the token's `nonces(owner)` for a permit, or
	/// [`next_universal_nonce`](Self::next_universal_nonce) for a universal
	/// permit.
	pub fn build(
		&self,
		scheme: AuthorizationScheme,
		flow_id: FlowId,
		network: Option<(u64, &NetworkConfig)>,
		owner: Address,
		amount: U256,
		nonce: U256,
	) -> Result<AuthorizationRequest, AuthorizationError> {
		if amount.is_zero() {
			return Err(AuthorizationError::InvalidAmount);
		}
		let (chain_id, network) = network.ok_or(AuthorizationError::MissingChain)?;

		let domain = match scheme {
			AuthorizationScheme::Permit => Eip712Domain {
				name: network.permit_domain_name.clone(),
				version: Some(network.permit_domain_version.clone()),
				chain_id,
				verifying_contract: network.token,
			},
			AuthorizationScheme::UniversalPermit => Eip712Domain {
				name: NAME_PERMIT2.to_string(),
				version: None,
				chain_id,
				verifying_contract: network
					.permit2
					.ok_or(AuthorizationError::MissingContract("permit2"))?,
			},
		};

		Ok(AuthorizationRequest {
			id: AuthorizationId::new(),
			flow_id,
			scheme,
			owner,
			spender: network.bank,
			token: network.token,
			amount,
			nonce,
			deadline: self.clock.now_secs() + AUTHORIZATION_WINDOW_SECS,
			domain,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::address;

	const NOW: u64 = 1_700_000_000;

	fn network() -> NetworkConfig {
		NetworkConfig {
			rpc_url: "http://localhost:8545".into(),
			token: address!("d6c393ffd2916d93f5dd842fb1ed0c6de5a2f142"),
			bank: address!("685ae42b1f178b6235053233182e75bd4d85e402"),
			permit2: Some(address!("000000000022d473030f116ddee9f6b43ac78ba3")),
			delegate: None,
			token_decimals: 18,
			permit_domain_name: "MyTokenPermit".into(),
			permit_domain_version: "1".into(),
		}
	}

	fn builder() -> (ManualClock, AuthorizationBuilder) {
		let clock = ManualClock::at_secs(NOW);
		let builder = AuthorizationBuilder::new(Arc::new(clock.clone()));
		(clock, builder)
	}

	#[test]
	fn test_deadline_is_construction_time_plus_window() {
		let (clock, builder) = builder();
		let network = network();
		let owner = Address::repeat_byte(0xaa);

		let request = builder
			.build(
				AuthorizationScheme::Permit,
				FlowId::new(),
				Some((11155111, &network)),
				owner,
				U256::from(30),
				U256::from(4),
			)
			.unwrap();
		assert_eq!(request.deadline, NOW + 3600);
		assert_eq!(request.spender, network.bank);
		assert_eq!(request.domain.verifying_contract, network.token);
		assert_eq!(request.domain.version.as_deref(), Some("1"));

		clock.advance(Duration::from_secs(3600));
		assert!(!request.is_expired(clock.now_secs()));
		clock.advance(Duration::from_secs(1));
		assert!(request.is_expired(clock.now_secs()));
	}

	#[test]
	fn test_universal_permit_uses_permit2_domain() {
		let (_, builder) = builder();
		let network = network();
		let request = builder
			.build(
				AuthorizationScheme::UniversalPermit,
				FlowId::new(),
				Some((11155111, &network)),
				Address::repeat_byte(0xaa),
				U256::from(30),
				builder.next_universal_nonce(),
			)
			.unwrap();
		assert_eq!(request.domain.name, "Permit2");
		assert!(request.domain.version.is_none());
		assert_eq!(Some(request.domain.verifying_contract), network.permit2);
		assert_eq!(request.spender, network.bank);
	}

	#[test]
	fn test_validation_errors() {
		let (_, builder) = builder();
		let mut network = network();
		let owner = Address::repeat_byte(0xaa);

		assert_eq!(
			builder.build(
				AuthorizationScheme::Permit,
				FlowId::new(),
				Some((1, &network)),
				owner,
				U256::ZERO,
				U256::ZERO
			),
			Err(AuthorizationError::InvalidAmount)
		);
		assert_eq!(
			builder.build(
				AuthorizationScheme::Permit,
				FlowId::new(),
				None,
				owner,
				U256::from(1),
				U256::ZERO
			),
			Err(AuthorizationError::MissingChain)
		);

		network.permit2 = None;
		assert_eq!(
			builder.build(
				AuthorizationScheme::UniversalPermit,
				FlowId::new(),
				Some((1, &network)),
				owner,
				U256::from(1),
				U256::ZERO
			),
			Err(AuthorizationError::MissingContract("permit2"))
		);
	}

	#[test]
	fn test_universal_nonces_never_repeat() {
		let (clock, builder) = builder();
		let first = builder.next_universal_nonce();
		let second = builder.next_universal_nonce();
		assert_eq!(first, U256::from(NOW * 1000));
		assert_eq!(second, first + U256::from(1));

		clock.advance(Duration::from_secs(1));
		assert_eq!(builder.next_universal_nonce(), U256::from((NOW + 1) * 1000));
	}
}
