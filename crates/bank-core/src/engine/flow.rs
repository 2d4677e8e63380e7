//! Flow definitions.
//!
//! Every user action is one [`Flow`] value: a closed set of schemes, each
//! carrying only what its scheme needs. Two-leg schemes (approve, then
//! deposit) are split into independent steps so that the caller decides
//! when to start the second leg.

use alloy_primitives::{Address, U256};
use bank_types::{AuthorizationScheme, FactKey, FlowId, NetworkConfig, OperationKind};
use std::fmt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceStep {
	/// `token.approve(bank, amount)`.
	Approve { amount: U256 },
	/// `bank.deposit(amount)`, spending the bank allowance.
	Deposit { amount: U256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniversalPermitStep {
	/// One-time `token.approve(permit2, amount)`.
	ApprovePermit2 { amount: U256 },
	/// Signed Permit2 transfer into the bank.
	Deposit { amount: U256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegatedBatchStep {
	/// One-time `token.approve(delegate, amount)`.
	ApproveDelegate { amount: U256 },
	/// Delegate-executed deposit.
	Deposit { amount: U256 },
}

/// One user-initiated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Allowance(AllowanceStep),
	/// `token.transferWithCallback(bank, amount)`; needs no allowance.
	Callback { amount: U256 },
	/// Token `permit` signature carried by `bank.permitDeposit`.
	Permit { amount: U256 },
	UniversalPermit(UniversalPermitStep),
	DelegatedBatch(DelegatedBatchStep),
	Withdraw { amount: U256 },
}

impl Flow {
	pub fn amount(&self) -> U256 {
		match *self {
			Flow::Allowance(AllowanceStep::Approve { amount })
			| Flow::Allowance(AllowanceStep::Deposit { amount })
			| Flow::Callback { amount }
			| Flow::Permit { amount }
			| Flow::UniversalPermit(UniversalPermitStep::ApprovePermit2 { amount })
			| Flow::UniversalPermit(UniversalPermitStep::Deposit { amount })
			| Flow::DelegatedBatch(DelegatedBatchStep::ApproveDelegate { amount })
			| Flow::DelegatedBatch(DelegatedBatchStep::Deposit { amount })
			| Flow::Withdraw { amount } => amount,
		}
	}

	/// Kind of the pending operation this flow submits.
	pub fn operation_kind(&self) -> OperationKind {
		match self {
			Flow::Allowance(AllowanceStep::Approve { .. }) => OperationKind::Approve,
			Flow::Allowance(AllowanceStep::Deposit { .. }) => OperationKind::Deposit,
			Flow::Callback { .. } => OperationKind::CallbackTransfer,
			Flow::Permit { .. } => OperationKind::PermitDeposit,
			Flow::UniversalPermit(UniversalPermitStep::ApprovePermit2 { .. }) => {
				OperationKind::ApprovePermit2
			},
			Flow::UniversalPermit(UniversalPermitStep::Deposit { .. }) => {
				OperationKind::Permit2Deposit
			},
			Flow::DelegatedBatch(DelegatedBatchStep::ApproveDelegate { .. }) => {
				OperationKind::ApproveDelegate
			},
			Flow::DelegatedBatch(DelegatedBatchStep::Deposit { .. }) => OperationKind::BatchDeposit,
			Flow::Withdraw { .. } => OperationKind::Withdraw,
		}
	}

	/// Signature scheme the flow needs, if any.
	pub fn authorization_scheme(&self) -> Option<AuthorizationScheme> {
		match self {
			Flow::Permit { .. } => Some(AuthorizationScheme::Permit),
			Flow::UniversalPermit(UniversalPermitStep::Deposit { .. }) => {
				Some(AuthorizationScheme::UniversalPermit)
			},
			_ => None,
		}
	}
}

impl fmt::Display for Flow {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.operation_kind())
	}
}

/// Facts a confirmed operation of `kind` changes, for `owner` on `network`.
pub fn affected_facts(kind: OperationKind, owner: Address, network: &NetworkConfig) -> Vec<FactKey> {
	let wallet = FactKey::balance(owner, network.token);
	let bank = FactKey::balance(owner, network.bank);
	let allowance = |spender| FactKey::allowance(owner, network.token, spender);

	match kind {
		OperationKind::Approve => vec![allowance(network.bank)],
		OperationKind::Deposit
		| OperationKind::CallbackTransfer
		| OperationKind::PermitDeposit
		| OperationKind::Permit2Deposit => vec![wallet, bank, allowance(network.bank)],
		OperationKind::ApprovePermit2 => network.permit2.map(allowance).into_iter().collect(),
		OperationKind::ApproveDelegate => network.delegate.map(allowance).into_iter().collect(),
		OperationKind::BatchDeposit | OperationKind::Withdraw => vec![wallet, bank],
	}
}

/// A running flow instance.
///
/// Cancelling the token abandons the flow: late signatures and confirmations
/// for it are discarded.
#[derive(Debug, Clone)]
pub struct FlowHandle {
	pub id: FlowId,
	pub cancel: CancellationToken,
}

impl FlowHandle {
	pub fn new() -> Self {
		Self {
			id: FlowId::new(),
			cancel: CancellationToken::new(),
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

impl Default for FlowHandle {
	fn default() -> Self {
		Self::new()
	}
}
