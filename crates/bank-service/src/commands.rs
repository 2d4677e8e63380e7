//! Command-line flows.
//!
//! Each subcommand maps to one flow step. The flow runs to its terminal
//! outcome while engine events are logged; Ctrl-C abandons it.

use bank_core::{
	AllowanceStep, BankEngine, DelegatedBatchStep, Flow, FlowError, SpenderRole,
	UniversalPermitStep,
};
use bank_types::{
	format_token_amount, parse_token_amount, truncate_id, AccountFact, AmountError, BankEvent,
	CacheEvent, FlowEvent, FlowId, OperationEvent, PendingOperation, TransactionHash, U256,
};
use clap::Subcommand;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
	/// Show balances, allowances and the permit nonce
	Balances,
	/// Approve the bank to pull tokens
	Approve { amount: String },
	/// Deposit against an existing bank allowance
	Deposit { amount: String },
	/// Withdraw from the bank to the wallet
	Withdraw { amount: String },
	/// Transfer to the bank in one call, without an allowance
	TransferCallback { amount: String },
	/// Sign a token permit and deposit with it
	PermitDeposit { amount: String },
	/// Approve the Permit2 contract once
	Permit2Approve { amount: String },
	/// Sign a Permit2 transfer and deposit with it
	Permit2Deposit { amount: String },
	/// Approve the batch delegate once
	DelegateApprove { amount: String },
	/// Deposit through the batch delegate
	BatchDeposit { amount: String },
}

#[derive(Debug, Error)]
pub enum CommandError {
	#[error("Invalid amount: {0}")]
	Amount(#[from] AmountError),
	#[error(transparent)]
	Flow(#[from] FlowError),
}

impl Command {
	/// The flow step this command runs, with `amount` parsed at `decimals`.
	/// `None` for read-only commands.
	pub fn flow(&self, decimals: u8) -> Result<Option<Flow>, AmountError> {
		let parse = |amount: &str| parse_token_amount(amount, decimals);
		let flow = match self {
			Command::Balances => return Ok(None),
			Command::Approve { amount } => Flow::Allowance(AllowanceStep::Approve {
				amount: parse(amount)?,
			}),
			Command::Deposit { amount } => Flow::Allowance(AllowanceStep::Deposit {
				amount: parse(amount)?,
			}),
			Command::Withdraw { amount } => Flow::Withdraw {
				amount: parse(amount)?,
			},
			Command::TransferCallback { amount } => Flow::Callback {
				amount: parse(amount)?,
			},
			Command::PermitDeposit { amount } => Flow::Permit {
				amount: parse(amount)?,
			},
			Command::Permit2Approve { amount } => {
				Flow::UniversalPermit(UniversalPermitStep::ApprovePermit2 {
					amount: parse(amount)?,
				})
			},
			Command::Permit2Deposit { amount } => {
				Flow::UniversalPermit(UniversalPermitStep::Deposit {
					amount: parse(amount)?,
				})
			},
			Command::DelegateApprove { amount } => {
				Flow::DelegatedBatch(DelegatedBatchStep::ApproveDelegate {
					amount: parse(amount)?,
				})
			},
			Command::BatchDeposit { amount } => Flow::DelegatedBatch(DelegatedBatchStep::Deposit {
				amount: parse(amount)?,
			}),
		};
		Ok(Some(flow))
	}
}

/// Runs `command` against `engine`.
pub async fn execute(engine: Arc<BankEngine>, command: Command) -> Result<(), CommandError> {
	let decimals = engine
		.network()
		.map(|(_, network)| network.token_decimals)
		.ok_or(FlowError::MissingChain)?;

	let Some(flow) = command.flow(decimals)? else {
		return print_balances(&engine, decimals).await;
	};

	let kind = flow.operation_kind();
	let logger = tokio::spawn(log_events(engine.subscribe()));
	let handle = engine.begin_flow();

	let run = engine.run(flow, &handle);
	tokio::pin!(run);
	let result = tokio::select! {
		result = &mut run => result,
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Interrupted, abandoning flow");
			engine.abandon(&handle);
			run.await
		}
	};
	logger.abort();

	match result {
		Ok(receipt) => {
			tracing::info!(
				tx_hash = %truncate_id(&receipt.hash.to_string()),
				block = receipt.block_number,
				"Confirmed"
			);
			print_balances(&engine, decimals).await
		},
		Err(e) if e.is_silent() => {
			match submitted_by(engine.operation(kind).await, handle.id) {
				Some(tx_hash) => tracing::info!(
					reason = %e,
					tx_hash = %truncate_id(&tx_hash.to_string()),
					"Stopped tracking a submitted transaction"
				),
				None => tracing::info!(reason = %e, "Nothing submitted"),
			}
			Ok(())
		},
		Err(e) => Err(e.into()),
	}
}

/// Hash of the transaction `flow_id` got onto the network, if any.
fn submitted_by(operation: Option<PendingOperation>, flow_id: FlowId) -> Option<TransactionHash> {
	operation
		.filter(|operation| operation.flow_id == flow_id)
		.and_then(|operation| operation.tx_hash)
}

async fn print_balances(engine: &BankEngine, decimals: u8) -> Result<(), CommandError> {
	let symbol = engine
		.token_symbol()
		.await?
		.and_then(|fact| fact.value.as_text().map(str::to_string))
		.unwrap_or_default();
	let show = |label: &str, fact: Option<AccountFact>| {
		let value = match fact {
			Some(fact) => {
				let amount = fact.value.as_amount().unwrap_or_default();
				let suffix = if fact.stale { " (stale)" } else { "" };
				format!("{} {}{}", format_token_amount(amount, decimals), symbol, suffix)
			},
			None => "unavailable".to_string(),
		};
		println!("{:<20} {}", label, value);
	};

	println!("account              {}", engine.owner());
	show("wallet", engine.wallet_balance().await?);
	show("bank", engine.bank_balance().await?);
	show("bank allowance", engine.allowance(SpenderRole::Bank).await?);
	// Optional deployments are skipped when not configured.
	if let Ok(fact) = engine.allowance(SpenderRole::Permit2).await {
		show("permit2 allowance", fact);
	}
	if let Ok(fact) = engine.allowance(SpenderRole::Delegate).await {
		show("delegate allowance", fact);
	}
	let nonce = match engine.permit_nonce().await {
		Ok(fact) => fact
			.and_then(|fact| fact.value.as_amount())
			.unwrap_or(U256::ZERO)
			.to_string(),
		Err(e) => {
			tracing::warn!(error = %e, "Permit nonce read failed");
			"unavailable".to_string()
		},
	};
	println!("{:<20} {}", "permit nonce", nonce);
	Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<BankEvent>) {
	loop {
		match events.recv().await {
			Ok(event) => log_event(&event),
			Err(RecvError::Lagged(skipped)) => {
				tracing::warn!(skipped, "Event log fell behind");
			},
			Err(RecvError::Closed) => break,
		}
	}
}

fn log_event(event: &BankEvent) {
	match event {
		BankEvent::Flow(FlowEvent::Started { flow, .. }) => {
			tracing::info!(flow = %flow, "Flow started");
		},
		BankEvent::Flow(FlowEvent::AwaitingSignature { request_id, .. }) => {
			tracing::info!(
				request_id = %truncate_id(&request_id.to_string()),
				"Waiting for signature"
			);
		},
		BankEvent::Operation(OperationEvent::Submitted { kind, tx_hash, .. }) => {
			tracing::info!(kind = %kind, tx_hash = %truncate_id(&tx_hash.to_string()), "Submitted");
		},
		BankEvent::Operation(OperationEvent::Confirming { kind, .. }) => {
			tracing::info!(kind = %kind, "Waiting for confirmation");
		},
		BankEvent::Operation(OperationEvent::Failed { kind, reason, .. }) => {
			tracing::warn!(kind = %kind, reason = %reason, "Operation failed");
		},
		BankEvent::Cache(CacheEvent::Invalidated { keys }) => {
			tracing::debug!(count = keys.len(), "Facts marked for refresh");
		},
		_ => {},
	}
}
