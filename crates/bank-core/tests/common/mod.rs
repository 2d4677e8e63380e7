//! In-process chain used by the flow tests.
//!
//! [`SimulatedLedger`] stands in for the network: it decodes the real ABI
//! call data for the token, bank, Permit2 and delegate contracts, keeps
//! balances, allowances and nonces, verifies permit signatures against the
//! owner key, and mines every accepted transaction into its own block.

#![allow(dead_code)]

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use bank_account::implementations::local::{LocalCustodian, LocalCustodianSchema};
use bank_account::{CustodianError, CustodianInterface, SignatureService};
use bank_cache::FactCache;
use bank_config::Config;
use bank_core::reader::ContractReader;
use bank_core::{BankEngine, Clock, EventBus, ManualClock};
use bank_delivery::implementations::evm::alloy::AlloyDeliverySchema;
use bank_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use bank_types::contracts::{IBankToken, IBatchDelegate, ITokenBank};
use bank_types::utils::{
	compute_domain_hash, compute_final_digest, permit_struct_hash,
	permit_transfer_from_struct_hash,
};
use bank_types::{
	AccountFact, BankEvent, ConfigSchema, NetworkConfig, RawSignature, SecretString, Transaction,
	TransactionHash, TransactionReceipt, TypedPayload,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub const CHAIN_ID: u64 = 31337;
pub const OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const START: u64 = 1_700_000_000;
pub const INITIAL_WALLET: u64 = 1000;

const TOKEN: &str = "0xd6c393ffd2916d93f5dd842fb1ed0c6de5a2f142";
const BANK: &str = "0x685ae42b1f178b6235053233182e75bd4d85e402";
const PERMIT2: &str = "0x000000000022D473030F116dDEE9F6B43aC78BA3";
const DELEGATE: &str = "0x4444444444444444444444444444444444444444";

pub fn config(delegate_mode: &str, active_chain: bool) -> Config {
	let chain = if active_chain {
		format!("chain_id = {}", CHAIN_ID)
	} else {
		String::new()
	};
	Config::from_str(&format!(
		r#"
[bank]
id = "tokenbank-test"
{chain}
poll_interval_seconds = 1
monitoring_timeout_minutes = 10

[networks.{CHAIN_ID}]
rpc_url = "http://localhost:8545"
token = "{TOKEN}"
bank = "{BANK}"
permit2 = "{PERMIT2}"
delegate = "{DELEGATE}"
permit_domain_name = "MyTokenPermit"

[delivery.implementations.evm_alloy]
network_ids = [{CHAIN_ID}]

[account]
primary = "local"
[account.implementations.local]
private_key = "{OWNER_KEY}"

[flows]
delegate_mode = "{delegate_mode}"
"#
	))
	.expect("test config parses")
}

pub fn owner_signer() -> PrivateKeySigner {
	OWNER_KEY.parse().expect("valid test key")
}

pub fn local_custodian() -> Box<dyn CustodianInterface> {
	Box::new(LocalCustodian::new(SecretString::from(OWNER_KEY)).expect("valid test key"))
}

#[derive(Clone, Default)]
struct LedgerState {
	/// Token balances.
	wallet: HashMap<Address, U256>,
	/// Balances held by the bank per account.
	deposits: HashMap<Address, U256>,
	/// `(owner, spender)` token allowances.
	allowances: HashMap<(Address, Address), U256>,
	/// Token `permit` nonces.
	nonces: HashMap<Address, U256>,
	/// Consumed Permit2 nonces per owner.
	permit2_nonces: HashSet<(Address, U256)>,
}

#[derive(Default)]
struct Inner {
	state: LedgerState,
	block: u64,
	receipts: HashMap<TransactionHash, TransactionReceipt>,
	submitted: Vec<Transaction>,
	reverts: Vec<String>,
	reads: usize,
	fail_next_submit: Option<String>,
	hold_receipts: bool,
}

pub struct SimulatedLedger {
	pub network: NetworkConfig,
	signer: PrivateKeySigner,
	/// Block timestamp source; independent of the client clock.
	pub chain_clock: ManualClock,
	inner: Mutex<Inner>,
}

impl SimulatedLedger {
	pub fn new(network: NetworkConfig) -> Self {
		let signer = owner_signer();
		let mut inner = Inner::default();
		inner
			.state
			.wallet
			.insert(signer.address(), U256::from(INITIAL_WALLET));
		Self {
			network,
			signer,
			chain_clock: ManualClock::at_secs(START),
			inner: Mutex::new(inner),
		}
	}

	pub fn submitted(&self) -> Vec<Transaction> {
		self.inner.lock().unwrap().submitted.clone()
	}

	pub fn reverts(&self) -> Vec<String> {
		self.inner.lock().unwrap().reverts.clone()
	}

	pub fn reads(&self) -> usize {
		self.inner.lock().unwrap().reads
	}

	pub fn fail_next_submit(&self, message: &str) {
		self.inner.lock().unwrap().fail_next_submit = Some(message.to_string());
	}

	/// While held, mined transactions report no receipt.
	pub fn hold_receipts(&self, hold: bool) {
		self.inner.lock().unwrap().hold_receipts = hold;
	}

	pub fn deposit_of(&self, account: Address) -> U256 {
		let inner = self.inner.lock().unwrap();
		inner.state.deposits.get(&account).copied().unwrap_or_default()
	}

	/// Expected signature bytes of the owner over `digest`.
	fn expected_signature(&self, digest: B256) -> Result<[u8; 65], String> {
		let mut bytes = self
			.signer
			.sign_hash_sync(&digest)
			.map_err(|e| e.to_string())?
			.as_bytes();
		if bytes[64] < 27 {
			bytes[64] += 27;
		}
		Ok(bytes)
	}

	fn apply(
		&self,
		state: &mut LedgerState,
		sender: Address,
		to: Address,
		data: &[u8],
	) -> Result<(), String> {
		let network = &self.network;
		let selector: [u8; 4] = data
			.get(..4)
			.and_then(|s| s.try_into().ok())
			.ok_or("missing selector")?;
		let decode_err = |e: alloy_sol_types::Error| e.to_string();

		if to == network.token {
			match selector {
				IBankToken::approveCall::SELECTOR => {
					let call = IBankToken::approveCall::abi_decode(data, true).map_err(decode_err)?;
					state.allowances.insert((sender, call.spender), call.amount);
				},
				IBankToken::transferFromCall::SELECTOR => {
					let call =
						IBankToken::transferFromCall::abi_decode(data, true).map_err(decode_err)?;
					spend_allowance(state, call.from, sender, call.amount)?;
					move_tokens(state, call.from, call.to, call.amount)?;
				},
				IBankToken::transferWithCallbackCall::SELECTOR => {
					let call = IBankToken::transferWithCallbackCall::abi_decode(data, true)
						.map_err(decode_err)?;
					if call.to != network.bank {
						return Err("callback target is not the bank".into());
					}
					move_tokens(state, sender, network.bank, call.amount)?;
					credit(state, sender, call.amount);
				},
				_ => return Err("unknown token function".into()),
			}
			return Ok(());
		}

		if to == network.bank {
			match selector {
				ITokenBank::depositCall::SELECTOR => {
					let call = ITokenBank::depositCall::abi_decode(data, true).map_err(decode_err)?;
					spend_allowance(state, sender, network.bank, call.amount)?;
					move_tokens(state, sender, network.bank, call.amount)?;
					credit(state, sender, call.amount);
				},
				ITokenBank::depositForCall::SELECTOR => {
					let call =
						ITokenBank::depositForCall::abi_decode(data, true).map_err(decode_err)?;
					spend_allowance(state, sender, network.bank, call.amount)?;
					move_tokens(state, sender, network.bank, call.amount)?;
					credit(state, call.account, call.amount);
				},
				ITokenBank::withdrawCall::SELECTOR => {
					let call = ITokenBank::withdrawCall::abi_decode(data, true).map_err(decode_err)?;
					let held = state.deposits.entry(sender).or_default();
					if *held < call.amount {
						return Err("insufficient bank balance".into());
					}
					*held -= call.amount;
					move_tokens(state, network.bank, sender, call.amount)?;
				},
				ITokenBank::permitDepositCall::SELECTOR => {
					let call =
						ITokenBank::permitDepositCall::abi_decode(data, true).map_err(decode_err)?;
					if U256::from(self.chain_clock.now_secs()) > call.deadline {
						return Err("PERMIT_DEADLINE_EXPIRED".into());
					}
					let nonce = state.nonces.get(&sender).copied().unwrap_or_default();
					let digest = compute_final_digest(
						&compute_domain_hash(
							&network.permit_domain_name,
							Some(&network.permit_domain_version),
							CHAIN_ID,
							&network.token,
						),
						&permit_struct_hash(&sender, &network.bank, call.amount, nonce, call.deadline),
					);
					let mut provided = [0u8; 65];
					provided[..32].copy_from_slice(call.r.as_slice());
					provided[32..64].copy_from_slice(call.s.as_slice());
					provided[64] = call.v;
					if provided != self.expected_signature(digest)? {
						return Err("INVALID_SIGNER".into());
					}
					state.nonces.insert(sender, nonce + U256::from(1));
					state.allowances.insert((sender, network.bank), call.amount);
					spend_allowance(state, sender, network.bank, call.amount)?;
					move_tokens(state, sender, network.bank, call.amount)?;
					credit(state, sender, call.amount);
				},
				ITokenBank::depositWithPermit2Call::SELECTOR => {
					let call = ITokenBank::depositWithPermit2Call::abi_decode(data, true)
						.map_err(decode_err)?;
					let permit = call.permitTransfer;
					if U256::from(self.chain_clock.now_secs()) > permit.deadline {
						return Err("SignatureExpired".into());
					}
					if !state.permit2_nonces.insert((call.owner, permit.nonce)) {
						return Err("InvalidNonce".into());
					}
					let permit2 = network.permit2.ok_or("permit2 not deployed")?;
					let digest = compute_final_digest(
						&compute_domain_hash("Permit2", None, CHAIN_ID, &permit2),
						&permit_transfer_from_struct_hash(
							&permit.permitted.token,
							permit.permitted.amount,
							&network.bank,
							permit.nonce,
							permit.deadline,
						),
					);
					if call.signature[..] != self.expected_signature(digest)?[..] {
						return Err("InvalidSigner".into());
					}
					spend_allowance(state, call.owner, permit2, permit.permitted.amount)?;
					move_tokens(state, call.owner, network.bank, permit.permitted.amount)?;
					credit(state, call.owner, permit.permitted.amount);
				},
				_ => return Err("unknown bank function".into()),
			}
			return Ok(());
		}

		if Some(to) == network.delegate {
			match selector {
				IBatchDelegate::depositToBankCall::SELECTOR => {
					let call = IBatchDelegate::depositToBankCall::abi_decode(data, true)
						.map_err(decode_err)?;
					spend_allowance(state, sender, to, call.amount)?;
					move_tokens(state, sender, call.bank, call.amount)?;
					credit(state, sender, call.amount);
				},
				IBatchDelegate::executeBatchCall::SELECTOR => {
					let call = IBatchDelegate::executeBatchCall::abi_decode(data, true)
						.map_err(decode_err)?;
					// All or nothing.
					let mut scratch = state.clone();
					for inner in call.calls {
						self.apply(&mut scratch, to, inner.target, &inner.data)?;
					}
					*state = scratch;
				},
				_ => return Err("unknown delegate function".into()),
			}
			return Ok(());
		}

		Err(format!("no contract at {}", to))
	}

	fn read(&self, state: &LedgerState, to: Address, data: &[u8]) -> Result<Vec<u8>, String> {
		let network = &self.network;
		let decode_err = |e: alloy_sol_types::Error| e.to_string();
		let selector: [u8; 4] = data
			.get(..4)
			.and_then(|s| s.try_into().ok())
			.ok_or("missing selector")?;

		let amount = |value: Option<&U256>| value.copied().unwrap_or_default();
		match selector {
			IBankToken::balanceOfCall::SELECTOR => {
				let call = IBankToken::balanceOfCall::abi_decode(data, true).map_err(decode_err)?;
				let held = if to == network.bank {
					amount(state.deposits.get(&call.account))
				} else {
					amount(state.wallet.get(&call.account))
				};
				Ok(IBankToken::balanceOfCall::abi_encode_returns(&(held,)))
			},
			IBankToken::allowanceCall::SELECTOR => {
				let call = IBankToken::allowanceCall::abi_decode(data, true).map_err(decode_err)?;
				let allowance = amount(state.allowances.get(&(call.owner, call.spender)));
				Ok(IBankToken::allowanceCall::abi_encode_returns(&(allowance,)))
			},
			IBankToken::noncesCall::SELECTOR => {
				let call = IBankToken::noncesCall::abi_decode(data, true).map_err(decode_err)?;
				let nonce = amount(state.nonces.get(&call.owner));
				Ok(IBankToken::noncesCall::abi_encode_returns(&(nonce,)))
			},
			IBankToken::symbolCall::SELECTOR => {
				Ok(IBankToken::symbolCall::abi_encode_returns(&(String::from("MTK"),)))
			},
			_ => Err("unknown view function".into()),
		}
	}
}

fn spend_allowance(
	state: &mut LedgerState,
	owner: Address,
	spender: Address,
	amount: U256,
) -> Result<(), String> {
	let allowance = state.allowances.entry((owner, spender)).or_default();
	if *allowance < amount {
		return Err("ERC20: insufficient allowance".into());
	}
	*allowance -= amount;
	Ok(())
}

fn move_tokens(state: &mut LedgerState, from: Address, to: Address, amount: U256) -> Result<(), String> {
	let balance = state.wallet.entry(from).or_default();
	if *balance < amount {
		return Err("ERC20: transfer amount exceeds balance".into());
	}
	*balance -= amount;
	*state.wallet.entry(to).or_default() += amount;
	Ok(())
}

fn credit(state: &mut LedgerState, account: Address, amount: U256) {
	*state.deposits.entry(account).or_default() += amount;
}

#[async_trait]
impl DeliveryInterface for SimulatedLedger {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let mut inner = self.inner.lock().unwrap();
		if let Some(message) = inner.fail_next_submit.take() {
			return Err(DeliveryError::Network(message));
		}
		inner.submitted.push(tx.clone());
		inner.block += 1;

		let mut scratch = inner.state.clone();
		let success = match self.apply(&mut scratch, self.signer.address(), tx.to, &tx.data) {
			Ok(()) => {
				inner.state = scratch;
				true
			},
			Err(reason) => {
				inner.reverts.push(reason);
				false
			},
		};

		let hash = TransactionHash(keccak256(inner.block.to_be_bytes()).to_vec());
		let receipt = TransactionReceipt {
			hash: hash.clone(),
			block_number: inner.block,
			success,
		};
		inner.receipts.insert(hash.clone(), receipt);
		Ok(hash)
	}

	async fn call(&self, tx: &Transaction) -> Result<Bytes, DeliveryError> {
		let mut inner = self.inner.lock().unwrap();
		inner.reads += 1;
		self.read(&inner.state, tx.to, &tx.data)
			.map(Bytes::from)
			.map_err(DeliveryError::Reverted)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
		_chain_id: u64,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let inner = self.inner.lock().unwrap();
		if inner.hold_receipts {
			return Ok(None);
		}
		Ok(inner.receipts.get(hash).cloned())
	}

	async fn get_block_number(&self, _chain_id: u64) -> Result<u64, DeliveryError> {
		Ok(self.inner.lock().unwrap().block)
	}
}

/// Custodian that never answers a signature request.
pub struct SilentCustodian;

#[async_trait]
impl CustodianInterface for SilentCustodian {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalCustodianSchema)
	}

	async fn address(&self) -> Result<Address, CustodianError> {
		Ok(owner_signer().address())
	}

	async fn sign_typed_data(&self, _payload: &TypedPayload) -> Result<RawSignature, CustodianError> {
		std::future::pending().await
	}

	fn get_private_key(&self) -> SecretString {
		SecretString::from(OWNER_KEY)
	}
}

pub struct Harness {
	pub engine: Arc<BankEngine>,
	pub ledger: Arc<SimulatedLedger>,
	/// Client clock driving authorization deadlines.
	pub clock: ManualClock,
	pub owner: Address,
	pub network: NetworkConfig,
}

pub fn harness() -> Harness {
	harness_with(local_custodian(), "deposit_to_bank", true)
}

pub fn harness_with(
	custodian: Box<dyn CustodianInterface>,
	delegate_mode: &str,
	active_chain: bool,
) -> Harness {
	let config = config(delegate_mode, active_chain);
	let network = config.networks[&CHAIN_ID].clone();
	let ledger = Arc::new(SimulatedLedger::new(network.clone()));

	let delivery = Arc::new(DeliveryService::new(
		HashMap::from([(CHAIN_ID, ledger.clone() as Arc<dyn DeliveryInterface>)]),
		config.delivery.min_confirmations,
	));
	let reader = Arc::new(ContractReader::new(delivery.clone(), config.bank.chain_id));
	let cache = Arc::new(FactCache::new(reader));
	let clock = ManualClock::at_secs(START);
	let owner = owner_signer().address();

	let engine = BankEngine::new(
		&config,
		owner,
		cache,
		Arc::new(SignatureService::new(custodian)),
		delivery,
		EventBus::new(256),
		Arc::new(clock.clone()),
	);

	Harness {
		engine: Arc::new(engine),
		ledger,
		clock,
		owner,
		network,
	}
}

/// Amount of a fact query, panicking if the fact is missing.
pub fn amount(fact: Result<Option<AccountFact>, bank_core::FlowError>) -> U256 {
	fact.expect("query succeeds")
		.expect("fact is readable")
		.value
		.as_amount()
		.expect("fact is an amount")
}

/// Events published so far.
pub fn drain(rx: &mut broadcast::Receiver<BankEvent>) -> Vec<BankEvent> {
	let mut events = Vec::new();
	while let Ok(event) = rx.try_recv() {
		events.push(event);
	}
	events
}
