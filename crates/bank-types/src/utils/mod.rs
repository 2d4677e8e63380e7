//! Utility functions for common operations.
//!
//! This module provides EIP-712 hashing helpers, display formatting for ids
//! and token amounts, and the wall-clock timestamp used across the client.

pub mod eip712;
pub mod formatting;

pub use eip712::{
	compute_domain_hash, compute_final_digest, permit_struct_hash,
	permit_transfer_from_struct_hash, Eip712AbiEncoder, NAME_PERMIT2,
};
pub use formatting::{
	format_token_amount, parse_token_amount, truncate_id, AmountError,
};

/// Returns the current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
	chrono::Utc::now().timestamp().max(0) as u64
}
