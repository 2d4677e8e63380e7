//! Transaction monitoring for pending operations.
//!
//! Polls the receipt of a submitted transaction at a fixed interval until it
//! succeeds, reverts, or is not mined within the timeout. Status changes are
//! written to the operation registry and published on the event bus. On
//! success the facts the operation affects are invalidated in the cache.

use crate::engine::event_bus::EventBus;
use crate::state::{OperationRegistry, OperationStateError};
use bank_cache::FactCache;
use bank_delivery::DeliveryService;
use bank_types::{
	truncate_id, BankEvent, CacheEvent, FactKey, OperationEvent, OperationStatus,
	PendingOperation, TransactionHash, TransactionReceipt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Reason recorded when a transaction is not mined before the timeout.
pub const DROPPED: &str = "dropped";
/// Reason recorded when a mined transaction reverted.
pub const REVERTED: &str = "Transaction reverted";

/// Terminal result of tracking one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingOutcome {
	Succeeded(TransactionReceipt),
	Failed(String),
	/// The owning flow was abandoned; nothing was applied.
	Cancelled,
}

pub struct TransactionMonitor {
	delivery: Arc<DeliveryService>,
	registry: Arc<OperationRegistry>,
	cache: Arc<FactCache>,
	event_bus: EventBus,
	poll_interval: Duration,
	timeout: Duration,
}

impl TransactionMonitor {
	pub fn new(
		delivery: Arc<DeliveryService>,
		registry: Arc<OperationRegistry>,
		cache: Arc<FactCache>,
		event_bus: EventBus,
		poll_interval: Duration,
		timeout: Duration,
	) -> Self {
		Self {
			delivery,
			registry,
			cache,
			event_bus,
			poll_interval,
			timeout,
		}
	}

	/// Tracks `operation` to a terminal status.
	///
	/// `affected` lists the facts invalidated on success. Once `cancel`
	/// fires, no further status change, cache write or event is applied.
	#[instrument(skip_all, fields(flow_id = %truncate_id(&operation.flow_id.to_string()), kind = %operation.kind))]
	pub async fn monitor(
		&self,
		operation: &PendingOperation,
		affected: Vec<FactKey>,
		cancel: &CancellationToken,
	) -> TrackingOutcome {
		let Some(tx_hash) = operation.tx_hash.clone() else {
			let reason = match &operation.status {
				OperationStatus::Failed(reason) => reason.clone(),
				_ => "not submitted".to_string(),
			};
			return TrackingOutcome::Failed(reason);
		};
		let start_time = tokio::time::Instant::now();
		let mut confirming = false;

		loop {
			if cancel.is_cancelled() {
				tracing::info!("Flow abandoned, stopping monitor");
				return TrackingOutcome::Cancelled;
			}

			if start_time.elapsed() > self.timeout {
				tracing::warn!(
					tx_hash = %truncate_id(&tx_hash.to_string()),
					"Transaction not mined after {}s, treating as dropped",
					self.timeout.as_secs()
				);
				self.fail(operation, &tx_hash, DROPPED, None).await;
				return TrackingOutcome::Failed(DROPPED.to_string());
			}

			match self
				.delivery
				.get_receipt(operation.chain_id, &tx_hash)
				.await
			{
				Ok(receipt) => {
					if !confirming {
						confirming = true;
						self.update(operation, &tx_hash, OperationStatus::Confirming, None)
							.await;
						self.publish(OperationEvent::Confirming {
							flow_id: operation.flow_id,
							kind: operation.kind,
							tx_hash: tx_hash.clone(),
						});
					}

					match receipt {
						Some(receipt) if !receipt.success => {
							self.fail(operation, &tx_hash, REVERTED, Some(receipt)).await;
							return TrackingOutcome::Failed(REVERTED.to_string());
						},
						Some(receipt) => {
							match self
								.delivery
								.confirmations(operation.chain_id, &receipt)
								.await
							{
								Ok(count) if count >= self.delivery.min_confirmations() => {
									return self
										.succeed(operation, &tx_hash, receipt, affected, cancel)
										.await;
								},
								Ok(count) => {
									tracing::debug!(confirmations = count, "Waiting for confirmations");
								},
								Err(e) => {
									tracing::debug!(error = %e, "Failed to read block number");
								},
							}
						},
						None => {
							tracing::debug!(
								elapsed_secs = start_time.elapsed().as_secs(),
								"Waiting for transaction to be mined"
							);
						},
					}
				},
				Err(e) => {
					tracing::info!(
						elapsed_secs = start_time.elapsed().as_secs(),
						error = %e,
						"Checking transaction status"
					);
				},
			}

			tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					tracing::info!("Flow abandoned, stopping monitor");
					return TrackingOutcome::Cancelled;
				}
				_ = tokio::time::sleep(self.poll_interval) => {}
			}
		}
	}

	async fn succeed(
		&self,
		operation: &PendingOperation,
		tx_hash: &TransactionHash,
		receipt: TransactionReceipt,
		affected: Vec<FactKey>,
		cancel: &CancellationToken,
	) -> TrackingOutcome {
		if cancel.is_cancelled() {
			tracing::info!("Discarding confirmation for abandoned flow");
			return TrackingOutcome::Cancelled;
		}

		self.update(
			operation,
			tx_hash,
			OperationStatus::Succeeded,
			Some(receipt.clone()),
		)
		.await;
		for key in &affected {
			self.cache.invalidate(key).await;
		}
		tracing::info!(
			tx_hash = %truncate_id(&tx_hash.to_string()),
			block = receipt.block_number,
			invalidated = affected.len(),
			"Confirmed"
		);

		self.publish(OperationEvent::Succeeded {
			flow_id: operation.flow_id,
			kind: operation.kind,
			receipt: receipt.clone(),
		});
		self.event_bus
			.publish(BankEvent::Cache(CacheEvent::Invalidated { keys: affected }))
			.ok();
		TrackingOutcome::Succeeded(receipt)
	}

	async fn fail(
		&self,
		operation: &PendingOperation,
		tx_hash: &TransactionHash,
		reason: &str,
		receipt: Option<TransactionReceipt>,
	) {
		tracing::warn!(tx_hash = %truncate_id(&tx_hash.to_string()), reason, "Transaction failed");
		self.update(
			operation,
			tx_hash,
			OperationStatus::Failed(reason.to_string()),
			receipt,
		)
		.await;
		self.publish(OperationEvent::Failed {
			flow_id: operation.flow_id,
			kind: operation.kind,
			tx_hash: Some(tx_hash.clone()),
			reason: reason.to_string(),
		});
	}

	async fn update(
		&self,
		operation: &PendingOperation,
		tx_hash: &TransactionHash,
		status: OperationStatus,
		receipt: Option<TransactionReceipt>,
	) {
		match self
			.registry
			.transition(operation.kind, operation.flow_id, tx_hash, status, receipt)
			.await
		{
			Ok(_) => {},
			Err(e @ OperationStateError::Superseded(_)) => {
				tracing::debug!(error = %e, "Skipping registry update");
			},
			Err(e) => {
				tracing::error!(error = %e, "Failed to update operation status");
			},
		}
	}

	fn publish(&self, event: OperationEvent) {
		self.event_bus.publish(BankEvent::Operation(event)).ok();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::authorization::ManualClock;
	use async_trait::async_trait;
	use bank_cache::{CacheError, ChainReader};
	use bank_delivery::{DeliveryError, DeliveryInterface};
	use bank_types::{
		Address, Bytes, ConfigSchema, FactValue, FlowId, OperationKind, Schema, Transaction,
		ValidationError, U256,
	};
	use std::collections::{HashMap, VecDeque};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	/// Answers receipt polls from a script; the last entry repeats.
	struct ScriptedDelivery {
		receipts: Mutex<VecDeque<Option<TransactionReceipt>>>,
		head: u64,
	}

	#[async_trait]
	impl DeliveryInterface for ScriptedDelivery {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn submit(&self, _tx: Transaction) -> Result<TransactionHash, DeliveryError> {
			Err(DeliveryError::Network("not used".into()))
		}

		async fn call(&self, _tx: &Transaction) -> Result<Bytes, DeliveryError> {
			Err(DeliveryError::Network("not used".into()))
		}

		async fn get_receipt(
			&self,
			_hash: &TransactionHash,
			_chain_id: u64,
		) -> Result<Option<TransactionReceipt>, DeliveryError> {
			let mut receipts = self.receipts.lock().unwrap();
			if receipts.len() > 1 {
				Ok(receipts.pop_front().flatten())
			} else {
				Ok(receipts.front().cloned().flatten())
			}
		}

		async fn get_block_number(&self, _chain_id: u64) -> Result<u64, DeliveryError> {
			Ok(self.head)
		}
	}

	#[derive(Default)]
	struct CountingReader {
		reads: AtomicUsize,
	}

	#[async_trait]
	impl ChainReader for CountingReader {
		async fn read(&self, _key: &FactKey) -> Result<FactValue, CacheError> {
			let n = self.reads.fetch_add(1, Ordering::SeqCst);
			Ok(FactValue::Amount(U256::from(n)))
		}
	}

	struct Fixture {
		monitor: TransactionMonitor,
		registry: Arc<OperationRegistry>,
		cache: Arc<FactCache>,
		reader: Arc<CountingReader>,
		operation: PendingOperation,
	}

	async fn fixture(script: Vec<Option<TransactionReceipt>>, head: u64) -> Fixture {
		let delivery = ScriptedDelivery {
			receipts: Mutex::new(script.into()),
			head,
		};
		let delivery = Arc::new(DeliveryService::new(
			HashMap::from([(1, Arc::new(delivery) as Arc<dyn DeliveryInterface>)]),
			1,
		));
		let registry = Arc::new(OperationRegistry::new(Arc::new(ManualClock::at_secs(0))));
		let reader = Arc::new(CountingReader::default());
		let cache = Arc::new(FactCache::new(reader.clone()));
		let operation = PendingOperation::submitted(
			OperationKind::Approve,
			FlowId::new(),
			1,
			TransactionHash(vec![7; 32]),
			0,
		);
		registry.record(operation.clone()).await;
		let monitor = TransactionMonitor::new(
			delivery,
			registry.clone(),
			cache.clone(),
			EventBus::new(16),
			Duration::from_secs(3),
			Duration::from_secs(60),
		);
		Fixture {
			monitor,
			registry,
			cache,
			reader,
			operation,
		}
	}

	fn receipt(success: bool) -> TransactionReceipt {
		TransactionReceipt {
			hash: TransactionHash(vec![7; 32]),
			block_number: 10,
			success,
		}
	}

	fn key() -> FactKey {
		FactKey::allowance(Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3))
	}

	#[tokio::test(start_paused = true)]
	async fn test_success_invalidates_affected_facts() {
		let f = fixture(vec![None, None, Some(receipt(true))], 10).await;
		f.cache.get(&key()).await.unwrap();

		let outcome = f
			.monitor
			.monitor(&f.operation, vec![key()], &CancellationToken::new())
			.await;
		assert_eq!(outcome, TrackingOutcome::Succeeded(receipt(true)));
		assert_eq!(
			f.registry.get(OperationKind::Approve).await.unwrap().status,
			OperationStatus::Succeeded
		);

		// Invalidated: the next access re-reads.
		assert_eq!(f.reader.reads.load(Ordering::SeqCst), 1);
		f.cache.get(&key()).await.unwrap();
		assert_eq!(f.reader.reads.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_revert_fails_without_invalidation() {
		let f = fixture(vec![Some(receipt(false))], 10).await;
		f.cache.get(&key()).await.unwrap();

		let outcome = f
			.monitor
			.monitor(&f.operation, vec![key()], &CancellationToken::new())
			.await;
		assert_eq!(outcome, TrackingOutcome::Failed(REVERTED.to_string()));
		f.cache.get(&key()).await.unwrap();
		assert_eq!(f.reader.reads.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_unmined_transaction_is_dropped_after_timeout() {
		let f = fixture(vec![None], 10).await;
		let outcome = f
			.monitor
			.monitor(&f.operation, vec![key()], &CancellationToken::new())
			.await;
		assert_eq!(outcome, TrackingOutcome::Failed(DROPPED.to_string()));
		assert_eq!(
			f.registry.get(OperationKind::Approve).await.unwrap().status,
			OperationStatus::Failed(DROPPED.to_string())
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancelled_flow_applies_nothing() {
		let f = fixture(vec![None, Some(receipt(true))], 10).await;
		let cancel = CancellationToken::new();
		cancel.cancel();

		let outcome = f.monitor.monitor(&f.operation, vec![key()], &cancel).await;
		assert_eq!(outcome, TrackingOutcome::Cancelled);
		assert_eq!(
			f.registry.get(OperationKind::Approve).await.unwrap().status,
			OperationStatus::Submitted
		);
	}
}
