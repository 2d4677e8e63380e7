//! Common types module for the token bank client.
//!
//! This module defines the data model shared by every component of the
//! transfer orchestration core: tracked on-chain facts, off-chain
//! authorizations and their signatures, pending on-chain operations and the
//! events that flow between services.

/// Off-chain authorization requests, typed-data payloads and signatures.
pub mod authorization;
/// Solidity call bindings for the token, ledger, Permit2 and delegate contracts.
pub mod contracts;
/// Transaction submission types.
pub mod delivery;
/// Event types for inter-service communication.
pub mod events;
/// Tracked on-chain account facts.
pub mod facts;
/// Network and contract deployment configuration types.
pub mod networks;
/// Pending operation and delegated batch types.
pub mod operation;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacting string wrapper for private keys.
pub mod secret_string;
/// Utility functions for hashing and formatting.
pub mod utils;
/// Configuration validation types for implementation-specific tables.
pub mod validation;

pub use alloy_primitives::{Address, Bytes, B256, U256};
pub use authorization::*;
pub use delivery::*;
pub use events::*;
pub use facts::*;
pub use networks::{NetworkConfig, NetworksConfig};
pub use operation::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::{
	current_timestamp, format_token_amount, parse_token_amount, truncate_id, AmountError,
};
pub use validation::*;
