//! Pending on-chain operation types.
//!
//! A pending operation is one submitted transaction whose outcome is not yet
//! final. Flows own at most one pending operation of each kind at a time.

use crate::{TransactionHash, TransactionReceipt};
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one flow instance.
///
/// A fresh id is issued every time a flow starts, so updates tagged with an
/// abandoned instance can be told apart from those of its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub Uuid);

impl FlowId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for FlowId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for FlowId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Kinds of on-chain operations a flow can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
	Approve,
	Deposit,
	Withdraw,
	CallbackTransfer,
	PermitDeposit,
	ApprovePermit2,
	Permit2Deposit,
	ApproveDelegate,
	BatchDeposit,
}

impl fmt::Display for OperationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			OperationKind::Approve => "approve",
			OperationKind::Deposit => "deposit",
			OperationKind::Withdraw => "withdraw",
			OperationKind::CallbackTransfer => "callback_transfer",
			OperationKind::PermitDeposit => "permit_deposit",
			OperationKind::ApprovePermit2 => "approve_permit2",
			OperationKind::Permit2Deposit => "permit2_deposit",
			OperationKind::ApproveDelegate => "approve_delegate",
			OperationKind::BatchDeposit => "batch_deposit",
		};
		f.write_str(name)
	}
}

/// Lifecycle status of a pending operation.
///
/// `Submitted -> Confirming -> Succeeded | Failed`; `Submitted -> Failed` is
/// also allowed. Terminal statuses never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
	Submitted,
	Confirming,
	Succeeded,
	Failed(String),
}

impl OperationStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, OperationStatus::Succeeded | OperationStatus::Failed(_))
	}
}

/// A submitted transaction being tracked until it is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
	pub kind: OperationKind,
	pub flow_id: FlowId,
	pub chain_id: u64,
	/// Absent when the network never accepted the transaction.
	pub tx_hash: Option<TransactionHash>,
	pub status: OperationStatus,
	/// Unix timestamp (seconds) of submission.
	pub submitted_at: u64,
	pub updated_at: u64,
	/// Receipt recorded once the operation succeeded or reverted.
	pub receipt: Option<TransactionReceipt>,
}

impl PendingOperation {
	/// Records a transaction the network accepted.
	pub fn submitted(
		kind: OperationKind,
		flow_id: FlowId,
		chain_id: u64,
		tx_hash: TransactionHash,
		now: u64,
	) -> Self {
		Self {
			kind,
			flow_id,
			chain_id,
			tx_hash: Some(tx_hash),
			status: OperationStatus::Submitted,
			submitted_at: now,
			updated_at: now,
			receipt: None,
		}
	}

	/// Records a submission that failed before the network accepted it.
	pub fn rejected(
		kind: OperationKind,
		flow_id: FlowId,
		chain_id: u64,
		reason: impl Into<String>,
		now: u64,
	) -> Self {
		Self {
			kind,
			flow_id,
			chain_id,
			tx_hash: None,
			status: OperationStatus::Failed(reason.into()),
			submitted_at: now,
			updated_at: now,
			receipt: None,
		}
	}
}

/// One step of a delegated batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCall {
	pub target: Address,
	pub value: U256,
	pub call_data: Bytes,
}

/// Ordered calls executed atomically by the delegate: all succeed or none
/// take effect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DelegatedBatchPlan {
	pub calls: Vec<BatchCall>,
}

impl DelegatedBatchPlan {
	pub fn push(&mut self, target: Address, call_data: impl Into<Bytes>) {
		self.calls.push(BatchCall {
			target,
			value: U256::ZERO,
			call_data: call_data.into(),
		});
	}

	pub fn is_empty(&self) -> bool {
		self.calls.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_terminal_statuses() {
		assert!(!OperationStatus::Submitted.is_terminal());
		assert!(!OperationStatus::Confirming.is_terminal());
		assert!(OperationStatus::Succeeded.is_terminal());
		assert!(OperationStatus::Failed("reverted".into()).is_terminal());
	}

	#[test]
	fn test_new_operation_starts_submitted() {
		let op = PendingOperation::submitted(
			OperationKind::Deposit,
			FlowId::new(),
			1,
			TransactionHash(vec![0xab; 32]),
			42,
		);
		assert_eq!(op.status, OperationStatus::Submitted);
		assert_eq!(op.submitted_at, op.updated_at);
		assert!(op.receipt.is_none());

		let op = PendingOperation::rejected(OperationKind::Deposit, FlowId::new(), 1, "nonce too low", 42);
		assert!(op.status.is_terminal());
		assert!(op.tx_hash.is_none());
	}

	#[test]
	fn test_flow_ids_are_unique() {
		assert_ne!(FlowId::new(), FlowId::new());
	}
}
