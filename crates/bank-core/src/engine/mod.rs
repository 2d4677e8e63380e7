//! Flow orchestration for the token bank client.
//!
//! [`BankEngine`] runs every [`Flow`] through one routine: validate, obtain
//! the authorization if the scheme needs one, compose the contract call,
//! submit it, track it to a terminal status and let the tracker invalidate
//! the affected facts. Approve legs and deposit legs are independent flows;
//! the engine never sequences them itself but exposes the current
//! allowances so the caller can.

pub mod event_bus;
pub mod flow;

use crate::authorization::{AuthorizationBuilder, Clock};
use crate::monitoring::{TrackingOutcome, TransactionMonitor};
use crate::state::OperationRegistry;
use crate::FlowError;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use bank_account::SignatureService;
use bank_cache::FactCache;
use bank_config::{Config, DelegateMode};
use bank_delivery::DeliveryService;
use bank_types::contracts::{
	Call, IBankToken, IBatchDelegate, ITokenBank, PermitTransferFrom, TokenPermissions,
};
use bank_types::{
	truncate_id, AccountFact, AuthorizationRequest, AuthorizationScheme, AuthorizedSignature,
	BankEvent, DelegatedBatchPlan, FactKey, FlowEvent, NetworkConfig, OperationEvent,
	OperationKind, PendingOperation, Transaction, TransactionReceipt,
};
use event_bus::EventBus;
use flow::{affected_facts, AllowanceStep, DelegatedBatchStep, Flow, FlowHandle, UniversalPermitStep};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::instrument;

/// Contracts that can hold an allowance over the owner's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpenderRole {
	Bank,
	Permit2,
	Delegate,
}

/// Orchestrates flows for one account on the active network.
pub struct BankEngine {
	/// Active network; `None` makes every flow fail with `MissingChain`.
	network: Option<(u64, NetworkConfig)>,
	delegate_mode: DelegateMode,
	/// Account the custodian signs for.
	owner: Address,
	cache: Arc<FactCache>,
	signatures: Arc<SignatureService>,
	delivery: Arc<DeliveryService>,
	authorizations: AuthorizationBuilder,
	registry: Arc<OperationRegistry>,
	monitor: TransactionMonitor,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
}

impl BankEngine {
	pub fn new(
		config: &Config,
		owner: Address,
		cache: Arc<FactCache>,
		signatures: Arc<SignatureService>,
		delivery: Arc<DeliveryService>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
	) -> Self {
		let registry = Arc::new(OperationRegistry::new(clock.clone()));
		let monitor = TransactionMonitor::new(
			delivery.clone(),
			registry.clone(),
			cache.clone(),
			event_bus.clone(),
			Duration::from_secs(config.bank.poll_interval_seconds),
			Duration::from_secs(config.bank.monitoring_timeout_minutes.saturating_mul(60)),
		);

		Self {
			network: config
				.active_network()
				.map(|(chain_id, network)| (chain_id, network.clone())),
			delegate_mode: config.flows.delegate_mode,
			owner,
			cache,
			signatures,
			delivery,
			authorizations: AuthorizationBuilder::new(clock.clone()),
			registry,
			monitor,
			event_bus,
			clock,
		}
	}

	pub fn owner(&self) -> Address {
		self.owner
	}

	pub fn network(&self) -> Option<(u64, &NetworkConfig)> {
		self.network
			.as_ref()
			.map(|(chain_id, network)| (*chain_id, network))
	}

	fn active_network(&self) -> Result<(u64, &NetworkConfig), FlowError> {
		self.network().ok_or(FlowError::MissingChain)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<BankEvent> {
		self.event_bus.subscribe()
	}

	/// Starts a new flow instance.
	pub fn begin_flow(&self) -> FlowHandle {
		FlowHandle::new()
	}

	/// Abandons a flow. Its pending signature request and tracking stop, and
	/// anything they would still deliver is discarded.
	pub fn abandon(&self, handle: &FlowHandle) {
		if !handle.is_cancelled() {
			tracing::info!(flow_id = %truncate_id(&handle.id.to_string()), "Abandoning flow");
			handle.cancel.cancel();
		}
	}

	/// Runs `flow` to a terminal outcome.
	#[instrument(skip_all, fields(flow_id = %truncate_id(&handle.id.to_string()), flow = %flow))]
	pub async fn run(&self, flow: Flow, handle: &FlowHandle) -> Result<TransactionReceipt, FlowError> {
		self.publish(FlowEvent::Started {
			flow_id: handle.id,
			flow: flow.to_string(),
		});

		let result = self.execute(flow, handle).await;
		match &result {
			Ok(receipt) => {
				tracing::info!(block = receipt.block_number, "Flow completed");
				self.publish(FlowEvent::Completed { flow_id: handle.id });
			},
			Err(FlowError::Cancelled) => {
				self.publish(FlowEvent::Abandoned { flow_id: handle.id });
			},
			Err(e) if e.is_silent() => {
				tracing::info!(reason = %e, "Flow returned to idle");
			},
			Err(e) => {
				tracing::warn!(error = %e, "Flow failed");
				self.publish(FlowEvent::Failed {
					flow_id: handle.id,
					error: e.to_string(),
				});
			},
		}
		result
	}

	async fn execute(&self, flow: Flow, handle: &FlowHandle) -> Result<TransactionReceipt, FlowError> {
		if flow.amount().is_zero() {
			return Err(FlowError::InvalidAmount(
				"amount must be greater than zero".into(),
			));
		}
		let (chain_id, network) = self.active_network()?;

		let tx = match flow {
			Flow::Allowance(AllowanceStep::Approve { amount }) => {
				approve(chain_id, network.token, network.bank, amount)
			},
			Flow::Allowance(AllowanceStep::Deposit { amount }) => Transaction::call(
				chain_id,
				network.bank,
				ITokenBank::depositCall { amount }.abi_encode(),
			),
			Flow::Callback { amount } => Transaction::call(
				chain_id,
				network.token,
				IBankToken::transferWithCallbackCall {
					to: network.bank,
					amount,
				}
				.abi_encode(),
			),
			Flow::Permit { amount } => {
				let (request, signature) = self
					.authorize(AuthorizationScheme::Permit, amount, handle)
					.await?;
				self.bind_signature(&request, signature, handle)?
			},
			Flow::UniversalPermit(UniversalPermitStep::ApprovePermit2 { amount }) => {
				let permit2 = contract(network.permit2, "permit2")?;
				approve(chain_id, network.token, permit2, amount)
			},
			Flow::UniversalPermit(UniversalPermitStep::Deposit { amount }) => {
				let (request, signature) = self
					.authorize(AuthorizationScheme::UniversalPermit, amount, handle)
					.await?;
				self.bind_signature(&request, signature, handle)?
			},
			Flow::DelegatedBatch(DelegatedBatchStep::ApproveDelegate { amount }) => {
				let delegate = contract(network.delegate, "delegate")?;
				approve(chain_id, network.token, delegate, amount)
			},
			Flow::DelegatedBatch(DelegatedBatchStep::Deposit { amount }) => {
				self.batch_deposit(chain_id, network, amount).await?
			},
			Flow::Withdraw { amount } => Transaction::call(
				chain_id,
				network.bank,
				ITokenBank::withdrawCall { amount }.abi_encode(),
			),
		};

		if handle.is_cancelled() {
			return Err(FlowError::Cancelled);
		}

		let kind = flow.operation_kind();
		let operation = self.submit(kind, handle, tx).await?;
		let affected = affected_facts(kind, self.owner, network);
		match self.monitor.monitor(&operation, affected, &handle.cancel).await {
			TrackingOutcome::Succeeded(receipt) => Ok(receipt),
			TrackingOutcome::Failed(reason) => Err(FlowError::OnChainRevert { reason }),
			TrackingOutcome::Cancelled => Err(FlowError::Cancelled),
		}
	}

	/// Builds an authorization for `scheme` and acquires its signature.
	///
	/// The permit nonce is re-read from the chain on every call; the
	/// universal-permit nonce is freshly generated. A request is never
	/// reused, so a retry always signs a new nonce.
	#[instrument(skip_all, fields(flow_id = %truncate_id(&handle.id.to_string()), scheme = ?scheme))]
	pub async fn authorize(
		&self,
		scheme: AuthorizationScheme,
		amount: U256,
		handle: &FlowHandle,
	) -> Result<(AuthorizationRequest, AuthorizedSignature), FlowError> {
		if amount.is_zero() {
			return Err(FlowError::InvalidAmount(
				"amount must be greater than zero".into(),
			));
		}
		let (_, network) = self.active_network()?;

		let nonce = match scheme {
			AuthorizationScheme::Permit => {
				let fact = self
					.cache
					.refresh(&FactKey::nonce(self.owner, network.token))
					.await?;
				fact.value.as_amount().ok_or_else(|| {
					FlowError::SubmissionError("token nonce is not a number".into())
				})?
			},
			AuthorizationScheme::UniversalPermit => self.authorizations.next_universal_nonce(),
		};

		let request = self.authorizations.build(
			scheme,
			handle.id,
			self.network(),
			self.owner,
			amount,
			nonce,
		)?;
		tracing::info!(
			request_id = %truncate_id(&request.id.to_string()),
			nonce = %request.nonce,
			deadline = request.deadline,
			"Built authorization"
		);

		self.publish(FlowEvent::AwaitingSignature {
			flow_id: handle.id,
			request_id: request.id,
		});
		let signature = self
			.signatures
			.request_signature(&request, &handle.cancel)
			.await?;
		Ok((request, signature))
	}

	/// Composes the bank call carrying `signature`, consuming it.
	///
	/// Fails with `SignatureMismatch` unless the signature was produced for
	/// `request` within the flow instance `handle`, and with `Expired` once
	/// the request deadline has passed.
	pub fn bind_signature(
		&self,
		request: &AuthorizationRequest,
		signature: AuthorizedSignature,
		handle: &FlowHandle,
	) -> Result<Transaction, FlowError> {
		if signature.request_id != request.id
			|| signature.flow_id != request.flow_id
			|| request.flow_id != handle.id
		{
			tracing::warn!(
				request_id = %truncate_id(&request.id.to_string()),
				"Refusing signature bound to another request"
			);
			return Err(FlowError::SignatureMismatch);
		}
		if request.is_expired(self.clock.now_secs()) {
			return Err(FlowError::Expired {
				deadline: request.deadline,
			});
		}
		let (_, network) = self.active_network()?;
		let deadline = U256::from(request.deadline);

		let data = match request.scheme {
			AuthorizationScheme::Permit => {
				let parts = signature.signature.split().map_err(|e| {
					FlowError::CustodianUnavailable(format!("malformed signature: {}", e))
				})?;
				ITokenBank::permitDepositCall {
					amount: request.amount,
					deadline,
					v: parts.v,
					r: parts.r,
					s: parts.s,
				}
				.abi_encode()
			},
			AuthorizationScheme::UniversalPermit => ITokenBank::depositWithPermit2Call {
				permitTransfer: PermitTransferFrom {
					permitted: TokenPermissions {
						token: request.token,
						amount: request.amount,
					},
					nonce: request.nonce,
					deadline,
				},
				owner: request.owner,
				signature: Bytes::copy_from_slice(signature.signature.as_bytes()),
			}
			.abi_encode(),
		};

		Ok(Transaction::call(request.domain.chain_id, network.bank, data))
	}

	/// The three calls the delegate executes for a batch deposit of `amount`.
	pub fn delegated_batch_plan(
		&self,
		network: &NetworkConfig,
		delegate: Address,
		amount: U256,
	) -> DelegatedBatchPlan {
		let mut plan = DelegatedBatchPlan::default();
		plan.push(
			network.token,
			IBankToken::transferFromCall {
				from: self.owner,
				to: delegate,
				amount,
			}
			.abi_encode(),
		);
		plan.push(
			network.token,
			IBankToken::approveCall {
				spender: network.bank,
				amount,
			}
			.abi_encode(),
		);
		plan.push(
			network.bank,
			ITokenBank::depositForCall {
				account: self.owner,
				amount,
			}
			.abi_encode(),
		);
		plan
	}

	/// Composes the delegate deposit call, refusing it while the delegate
	/// allowance does not cover `amount`.
	///
	/// The allowance is read from the chain rather than the cache, since a
	/// confirmed batch deposit spends it without invalidating it.
	async fn batch_deposit(
		&self,
		chain_id: u64,
		network: &NetworkConfig,
		amount: U256,
	) -> Result<Transaction, FlowError> {
		let delegate = contract(network.delegate, "delegate")?;
		let allowance = self
			.cache
			.refresh(&FactKey::allowance(self.owner, network.token, delegate))
			.await?
			.value
			.as_amount()
			.unwrap_or(U256::ZERO);
		if allowance < amount {
			return Err(FlowError::InvalidAmount(format!(
				"delegate allowance {} does not cover {}; approve the delegate first",
				allowance, amount
			)));
		}

		let data = match self.delegate_mode {
			DelegateMode::DepositToBank => IBatchDelegate::depositToBankCall {
				token: network.token,
				bank: network.bank,
				amount,
			}
			.abi_encode(),
			DelegateMode::ExecuteBatch => {
				let plan = self.delegated_batch_plan(network, delegate, amount);
				IBatchDelegate::executeBatchCall {
					calls: plan
						.calls
						.into_iter()
						.map(|call| Call {
							target: call.target,
							value: call.value,
							data: call.call_data,
						})
						.collect(),
				}
				.abi_encode()
			},
		};
		Ok(Transaction::call(chain_id, delegate, data))
	}

	/// Submits `tx` and records the operation. A failed submission is
	/// recorded as a failed operation without a hash and is not retried.
	async fn submit(
		&self,
		kind: OperationKind,
		handle: &FlowHandle,
		tx: Transaction,
	) -> Result<PendingOperation, FlowError> {
		let chain_id = tx.chain_id;
		let now = self.clock.now_secs();

		match self.delivery.deliver(tx).await {
			Ok(tx_hash) => {
				let operation =
					PendingOperation::submitted(kind, handle.id, chain_id, tx_hash.clone(), now);
				self.registry.record(operation.clone()).await;
				self.event_bus
					.publish(BankEvent::Operation(OperationEvent::Submitted {
						flow_id: handle.id,
						kind,
						chain_id,
						tx_hash,
					}))
					.ok();
				Ok(operation)
			},
			Err(e) => {
				let error = FlowError::from(e);
				tracing::warn!(kind = %kind, error = %error, "Submission failed");
				self.registry
					.record(PendingOperation::rejected(
						kind,
						handle.id,
						chain_id,
						error.to_string(),
						now,
					))
					.await;
				self.event_bus
					.publish(BankEvent::Operation(OperationEvent::Failed {
						flow_id: handle.id,
						kind,
						tx_hash: None,
						reason: error.to_string(),
					}))
					.ok();
				Err(error)
			},
		}
	}

	fn publish(&self, event: FlowEvent) {
		self.event_bus.publish(BankEvent::Flow(event)).ok();
	}

	async fn fact(&self, key: FactKey) -> Result<Option<AccountFact>, FlowError> {
		self.active_network()?;
		Ok(self.cache.get(&key).await)
	}

	/// Token balance of the owner's wallet.
	pub async fn wallet_balance(&self) -> Result<Option<AccountFact>, FlowError> {
		let (_, network) = self.active_network()?;
		self.fact(FactKey::balance(self.owner, network.token)).await
	}

	/// The owner's balance held by the bank.
	pub async fn bank_balance(&self) -> Result<Option<AccountFact>, FlowError> {
		let (_, network) = self.active_network()?;
		self.fact(FactKey::balance(self.owner, network.bank)).await
	}

	pub async fn allowance(&self, role: SpenderRole) -> Result<Option<AccountFact>, FlowError> {
		let (_, network) = self.active_network()?;
		let spender = match role {
			SpenderRole::Bank => network.bank,
			SpenderRole::Permit2 => contract(network.permit2, "permit2")?,
			SpenderRole::Delegate => contract(network.delegate, "delegate")?,
		};
		self.fact(FactKey::allowance(self.owner, network.token, spender))
			.await
	}

	pub async fn token_symbol(&self) -> Result<Option<AccountFact>, FlowError> {
		let (_, network) = self.active_network()?;
		self.fact(FactKey::symbol(network.token)).await
	}

	/// The owner's current `permit` nonce on the token, always read from the
	/// chain.
	pub async fn permit_nonce(&self) -> Result<Option<AccountFact>, FlowError> {
		let (_, network) = self.active_network()?;
		let fact = self
			.cache
			.refresh(&FactKey::nonce(self.owner, network.token))
			.await?;
		Ok(Some(fact))
	}

	/// Every fact read so far.
	pub async fn facts(&self) -> Vec<AccountFact> {
		self.cache.snapshot().await
	}

	/// Most recent operation of `kind`.
	pub async fn operation(&self, kind: OperationKind) -> Option<PendingOperation> {
		self.registry.get(kind).await
	}

	pub async fn operations(&self) -> Vec<PendingOperation> {
		self.registry.all().await
	}
}

fn approve(chain_id: u64, token: Address, spender: Address, amount: U256) -> Transaction {
	Transaction::call(
		chain_id,
		token,
		IBankToken::approveCall { spender, amount }.abi_encode(),
	)
}

fn contract(address: Option<Address>, name: &str) -> Result<Address, FlowError> {
	address.ok_or_else(|| FlowError::Configuration(format!("{} address not configured", name)))
}
