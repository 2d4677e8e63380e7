//! Pending operation state machine.
//!
//! Holds the most recent operation of each kind and validates status
//! changes: `Submitted -> Confirming -> Succeeded | Failed`, with
//! `Submitted -> Failed` also allowed. Recording a new operation of a kind
//! replaces the previous one.

use crate::authorization::Clock;
use bank_types::{
	FlowId, OperationKind, OperationStatus, PendingOperation, TransactionHash, TransactionReceipt,
};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur while updating an operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OperationStateError {
	#[error("Invalid state transition from {from:?} to {to:?}")]
	InvalidTransition {
		from: OperationStatus,
		to: OperationStatus,
	},
	#[error("No {0} operation recorded")]
	NotFound(OperationKind),
	/// The update targets an operation that a newer one of the same kind
	/// has replaced.
	#[error("{0} operation was superseded")]
	Superseded(OperationKind),
}

/// Latest pending operation per kind.
pub struct OperationRegistry {
	operations: RwLock<HashMap<OperationKind, PendingOperation>>,
	clock: Arc<dyn Clock>,
}

impl OperationRegistry {
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self {
			operations: RwLock::new(HashMap::new()),
			clock,
		}
	}

	/// Stores `operation`, replacing any earlier one of its kind.
	pub async fn record(&self, operation: PendingOperation) {
		self.operations
			.write()
			.await
			.insert(operation.kind, operation);
	}

	pub async fn get(&self, kind: OperationKind) -> Option<PendingOperation> {
		self.operations.read().await.get(&kind).cloned()
	}

	pub async fn all(&self) -> Vec<PendingOperation> {
		self.operations.read().await.values().cloned().collect()
	}

	/// Moves the operation of `kind` submitted by `flow_id` as `tx_hash` to
	/// `status`.
	pub async fn transition(
		&self,
		kind: OperationKind,
		flow_id: FlowId,
		tx_hash: &TransactionHash,
		status: OperationStatus,
		receipt: Option<TransactionReceipt>,
	) -> Result<PendingOperation, OperationStateError> {
		let mut operations = self.operations.write().await;
		let operation = operations
			.get_mut(&kind)
			.ok_or(OperationStateError::NotFound(kind))?;

		if operation.flow_id != flow_id || operation.tx_hash.as_ref() != Some(tx_hash) {
			return Err(OperationStateError::Superseded(kind));
		}
		if !Self::is_valid_transition(&operation.status, &status) {
			return Err(OperationStateError::InvalidTransition {
				from: operation.status.clone(),
				to: status,
			});
		}

		operation.status = status;
		if receipt.is_some() {
			operation.receipt = receipt;
		}
		operation.updated_at = self.clock.now_secs();
		Ok(operation.clone())
	}

	fn is_valid_transition(from: &OperationStatus, to: &OperationStatus) -> bool {
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
		enum StatusKind {
			Submitted,
			Confirming,
			Succeeded,
			Failed,
		}

		static TRANSITIONS: Lazy<HashMap<StatusKind, HashSet<StatusKind>>> = Lazy::new(|| {
			let mut m = HashMap::new();
			m.insert(
				StatusKind::Submitted,
				HashSet::from([StatusKind::Confirming, StatusKind::Failed]),
			);
			m.insert(
				StatusKind::Confirming,
				HashSet::from([StatusKind::Succeeded, StatusKind::Failed]),
			);
			m.insert(StatusKind::Succeeded, HashSet::new()); // terminal
			m.insert(StatusKind::Failed, HashSet::new()); // terminal
			m
		});

		let status_kind = |status: &OperationStatus| match status {
			OperationStatus::Submitted => StatusKind::Submitted,
			OperationStatus::Confirming => StatusKind::Confirming,
			OperationStatus::Succeeded => StatusKind::Succeeded,
			OperationStatus::Failed(_) => StatusKind::Failed,
		};

		TRANSITIONS
			.get(&status_kind(from))
			.is_some_and(|set| set.contains(&status_kind(to)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::authorization::ManualClock;

	fn registry() -> (ManualClock, OperationRegistry) {
		let clock = ManualClock::at_secs(100);
		(clock.clone(), OperationRegistry::new(Arc::new(clock)))
	}

	fn submitted(kind: OperationKind, flow_id: FlowId, byte: u8) -> PendingOperation {
		PendingOperation::submitted(kind, flow_id, 1, TransactionHash(vec![byte; 32]), 100)
	}

	#[tokio::test]
	async fn test_lifecycle() {
		let (clock, registry) = registry();
		let flow_id = FlowId::new();
		let op = submitted(OperationKind::Approve, flow_id, 1);
		let hash = TransactionHash(vec![1; 32]);
		registry.record(op).await;

		registry
			.transition(OperationKind::Approve, flow_id, &hash, OperationStatus::Confirming, None)
			.await
			.unwrap();
		clock.set_secs(112);
		let receipt = TransactionReceipt {
			hash: hash.clone(),
			block_number: 7,
			success: true,
		};
		let done = registry
			.transition(
				OperationKind::Approve,
				flow_id,
				&hash,
				OperationStatus::Succeeded,
				Some(receipt.clone()),
			)
			.await
			.unwrap();
		assert_eq!(done.updated_at, 112);
		assert_eq!(done.receipt, Some(receipt));

		// Terminal states never change.
		let err = registry
			.transition(
				OperationKind::Approve,
				flow_id,
				&hash,
				OperationStatus::Failed("late".into()),
				None,
			)
			.await
			.unwrap_err();
		assert!(matches!(err, OperationStateError::InvalidTransition { .. }));
	}

	#[tokio::test]
	async fn test_submitted_cannot_skip_to_succeeded() {
		let (_, registry) = registry();
		let flow_id = FlowId::new();
		registry
			.record(submitted(OperationKind::Deposit, flow_id, 1))
			.await;
		let err = registry
			.transition(
				OperationKind::Deposit,
				flow_id,
				&TransactionHash(vec![1; 32]),
				OperationStatus::Succeeded,
				None,
			)
			.await
			.unwrap_err();
		assert_eq!(
			err,
			OperationStateError::InvalidTransition {
				from: OperationStatus::Submitted,
				to: OperationStatus::Succeeded
			}
		);
	}

	#[tokio::test]
	async fn test_new_operation_replaces_previous_of_same_kind() {
		let (_, registry) = registry();
		let first = FlowId::new();
		let second = FlowId::new();
		registry
			.record(submitted(OperationKind::Deposit, first, 1))
			.await;
		registry
			.record(submitted(OperationKind::Approve, first, 2))
			.await;
		registry
			.record(submitted(OperationKind::Deposit, second, 3))
			.await;

		assert_eq!(registry.all().await.len(), 2);
		assert_eq!(
			registry.get(OperationKind::Deposit).await.unwrap().flow_id,
			second
		);

		// Updates for the replaced instance are refused.
		let err = registry
			.transition(
				OperationKind::Deposit,
				first,
				&TransactionHash(vec![1; 32]),
				OperationStatus::Confirming,
				None,
			)
			.await
			.unwrap_err();
		assert_eq!(err, OperationStateError::Superseded(OperationKind::Deposit));
	}
}
