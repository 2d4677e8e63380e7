//! Account fact types for the chain read cache.
//!
//! An account fact is the latest observed value of one on-chain quantity
//! (balance, allowance, nonce or symbol) for an account/contract pair.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of on-chain fact being tracked.
///
/// Allowances carry their spender so that a fact is always addressed by the
/// `(kind, account, contract)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactKind {
	/// `balanceOf(account)` on the contract.
	Balance,
	/// `allowance(account, spender)` on the token contract.
	Allowance { spender: Address },
	/// `nonces(account)` on a permit-enabled token.
	Nonce,
	/// `symbol()` on the token contract; the account is ignored by the read.
	Symbol,
}

impl FactKind {
	/// Returns the contract function name read for this fact.
	pub fn function_name(&self) -> &'static str {
		match self {
			FactKind::Balance => "balanceOf",
			FactKind::Allowance { .. } => "allowance",
			FactKind::Nonce => "nonces",
			FactKind::Symbol => "symbol",
		}
	}
}

/// Key addressing a single account fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactKey {
	pub kind: FactKind,
	pub account: Address,
	pub contract: Address,
}

impl FactKey {
	pub fn new(kind: FactKind, account: Address, contract: Address) -> Self {
		Self {
			kind,
			account,
			contract,
		}
	}

	pub fn balance(account: Address, contract: Address) -> Self {
		Self::new(FactKind::Balance, account, contract)
	}

	pub fn allowance(owner: Address, token: Address, spender: Address) -> Self {
		Self::new(FactKind::Allowance { spender }, owner, token)
	}

	pub fn nonce(owner: Address, token: Address) -> Self {
		Self::new(FactKind::Nonce, owner, token)
	}

	pub fn symbol(token: Address) -> Self {
		Self::new(FactKind::Symbol, Address::ZERO, token)
	}
}

impl fmt::Display for FactKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.kind {
			FactKind::Allowance { spender } => write!(
				f,
				"allowance({:#x} -> {:#x})@{:#x}",
				self.account, spender, self.contract
			),
			FactKind::Symbol => write!(f, "symbol@{:#x}", self.contract),
			kind => write!(
				f,
				"{}({:#x})@{:#x}",
				kind.function_name(),
				self.account,
				self.contract
			),
		}
	}
}

/// Value of an account fact as returned by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactValue {
	Amount(U256),
	Text(String),
}

impl FactValue {
	/// Returns the numeric value, if this fact is an amount.
	pub fn as_amount(&self) -> Option<U256> {
		match self {
			FactValue::Amount(v) => Some(*v),
			FactValue::Text(_) => None,
		}
	}

	/// Returns the textual value, if this fact is a string.
	pub fn as_text(&self) -> Option<&str> {
		match self {
			FactValue::Text(s) => Some(s),
			FactValue::Amount(_) => None,
		}
	}
}

impl fmt::Display for FactValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FactValue::Amount(v) => write!(f, "{}", v),
			FactValue::Text(s) => f.write_str(s),
		}
	}
}

/// Latest observed value of a fact.
///
/// `stale` is set when the most recent refetch failed and `value` is the last
/// value that was successfully read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFact {
	pub key: FactKey,
	pub value: FactValue,
	/// Unix timestamp (seconds) of the successful read that produced `value`.
	pub last_observed_at: u64,
	pub stale: bool,
}
