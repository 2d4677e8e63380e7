//! Event types for inter-service communication.
//!
//! The engine publishes events on a broadcast bus so that presentation code
//! (the CLI, or any other observer) can follow flow progress without polling.

use crate::{
	AuthorizationId, FactKey, FlowId, OperationKind, TransactionHash, TransactionReceipt,
};
use serde::{Deserialize, Serialize};

/// Main event type, grouped by the component that produces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BankEvent {
	Flow(FlowEvent),
	Operation(OperationEvent),
	Cache(CacheEvent),
}

/// Flow lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEvent {
	Started { flow_id: FlowId, flow: String },
	/// An authorization is waiting on the key custodian.
	AwaitingSignature {
		flow_id: FlowId,
		request_id: AuthorizationId,
	},
	Completed { flow_id: FlowId },
	Failed { flow_id: FlowId, error: String },
	/// The flow was dropped by the user; any outstanding work is ignored.
	Abandoned { flow_id: FlowId },
}

/// Pending operation status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationEvent {
	Submitted {
		flow_id: FlowId,
		kind: OperationKind,
		chain_id: u64,
		tx_hash: TransactionHash,
	},
	Confirming {
		flow_id: FlowId,
		kind: OperationKind,
		tx_hash: TransactionHash,
	},
	Succeeded {
		flow_id: FlowId,
		kind: OperationKind,
		receipt: TransactionReceipt,
	},
	/// Reverted, dropped, or never accepted (no hash).
	Failed {
		flow_id: FlowId,
		kind: OperationKind,
		tx_hash: Option<TransactionHash>,
		reason: String,
	},
}

/// Chain read cache events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheEvent {
	/// The listed facts were marked for refetch after a confirmed operation.
	Invalidated { keys: Vec<FactKey> },
}
