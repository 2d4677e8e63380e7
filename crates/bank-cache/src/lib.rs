//! Chain read cache for the token bank client.
//!
//! The cache holds the latest observed value of every tracked on-chain fact,
//! keyed by `(kind, account, contract)`. Values are only ever written by a
//! successful read through the [`ChainReader`]; the single write primitive
//! available to the rest of the system is [`FactCache::invalidate`], which
//! makes the next access re-read the fact.
//!
//! A failed re-read keeps the previous value, flags it stale and leaves the
//! fact due for another read, so a transient RPC failure never shows up as a
//! zero balance.

use async_trait::async_trait;
use bank_types::{current_timestamp, AccountFact, FactKey, FactValue};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Errors raised by chain reads.
#[derive(Debug, Error)]
pub enum CacheError {
	/// The read call failed at the network or RPC layer.
	#[error("Read failed: {0}")]
	Read(String),
	/// The contract returned data that could not be decoded.
	#[error("Decode failed: {0}")]
	Decode(String),
	#[error("No network configured for chain {0}")]
	UnknownChain(u64),
}

/// Reads one fact from the chain.
///
/// Implementations perform the view call named by [`FactKey::kind`] against
/// [`FactKey::contract`].
#[async_trait]
pub trait ChainReader: Send + Sync {
	async fn read(&self, key: &FactKey) -> Result<FactValue, CacheError>;
}

#[derive(Default)]
struct Slot {
	fact: Option<AccountFact>,
	/// Set when the fact has never been read, was invalidated, or the last
	/// re-read failed.
	due: bool,
}

/// Store of account facts shared by every flow.
pub struct FactCache {
	reader: Arc<dyn ChainReader>,
	/// One lock per fact so that concurrent readers of a due fact share a
	/// single re-read.
	slots: RwLock<HashMap<FactKey, Arc<Mutex<Slot>>>>,
}

impl FactCache {
	pub fn new(reader: Arc<dyn ChainReader>) -> Self {
		Self {
			reader,
			slots: RwLock::new(HashMap::new()),
		}
	}

	async fn slot(&self, key: &FactKey) -> Arc<Mutex<Slot>> {
		if let Some(slot) = self.slots.read().await.get(key) {
			return slot.clone();
		}
		self.slots
			.write()
			.await
			.entry(*key)
			.or_insert_with(|| {
				Arc::new(Mutex::new(Slot {
					fact: None,
					due: true,
				}))
			})
			.clone()
	}

	/// Returns the fact, re-reading it first if it is due.
	///
	/// `None` means the fact has never been read successfully. A value whose
	/// re-read just failed is returned with `stale` set.
	pub async fn get(&self, key: &FactKey) -> Option<AccountFact> {
		let slot = self.slot(key).await;
		let mut slot = slot.lock().await;
		if slot.due {
			if let Err(e) = self.fetch_into(key, &mut slot).await {
				warn!(fact = %key, error = %e, "Fact re-read failed, keeping previous value");
			}
		}
		slot.fact.clone()
	}

	/// Reads the fact from the chain now, whether or not it is due.
	///
	/// Used where a possibly outdated value must never be acted on, such as
	/// the nonce signed into an authorization.
	pub async fn refresh(&self, key: &FactKey) -> Result<AccountFact, CacheError> {
		let slot = self.slot(key).await;
		let mut slot = slot.lock().await;
		self.fetch_into(key, &mut slot).await
	}

	/// Marks the fact for re-read on next access.
	///
	/// Invalidating a fact that is already due has no further effect.
	pub async fn invalidate(&self, key: &FactKey) {
		let slot = self.slot(key).await;
		let mut slot = slot.lock().await;
		if !slot.due {
			debug!(fact = %key, "Invalidated");
			slot.due = true;
		}
	}

	/// Returns every fact held, without triggering any reads.
	pub async fn snapshot(&self) -> Vec<AccountFact> {
		let slots: Vec<_> = self.slots.read().await.values().cloned().collect();
		let mut facts = Vec::with_capacity(slots.len());
		for slot in slots {
			if let Some(fact) = &slot.lock().await.fact {
				facts.push(fact.clone());
			}
		}
		facts
	}

	async fn fetch_into(&self, key: &FactKey, slot: &mut Slot) -> Result<AccountFact, CacheError> {
		match self.reader.read(key).await {
			Ok(value) => {
				let fact = AccountFact {
					key: *key,
					value,
					last_observed_at: current_timestamp(),
					stale: false,
				};
				debug!(fact = %key, value = %fact.value, "Fact read");
				slot.fact = Some(fact.clone());
				slot.due = false;
				Ok(fact)
			},
			Err(e) => {
				if let Some(fact) = slot.fact.as_mut() {
					fact.stale = true;
				}
				slot.due = true;
				Err(e)
			},
		}
	}
}
