//! String formatting utilities.
//!
//! Provides functions for formatting strings for display, including
//! hex string prefix management, truncation for readability, and conversion
//! between human-readable token amounts and raw on-chain integers.

use alloy_primitives::U256;
use thiserror::Error;

/// Errors raised while parsing a human-readable token amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
	#[error("Amount is empty")]
	Empty,
	#[error("Invalid amount '{0}'")]
	Invalid(String),
	#[error("Amount '{amount}' has more than {decimals} decimal places")]
	TooPrecise { amount: String, decimals: u8 },
	#[error("Amount '{0}' overflows uint256")]
	Overflow(String),
}

/// Utility function to truncate a hex string for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Formats a raw token amount with decimal places for display.
///
/// Trailing zeros of the fractional part are dropped, so one whole token
/// with 18 decimals renders as "1" and half a token as "0.5".
pub fn format_token_amount(amount: U256, decimals: u8) -> String {
	let amount = amount.to_string();
	if decimals == 0 {
		return amount;
	}

	let decimal_places = decimals as usize;
	let (integer_part, decimal_part) = if amount.len() <= decimal_places {
		let decimal_str = format!("{:0>width$}", amount, width = decimal_places);
		("0".to_string(), decimal_str)
	} else {
		let split_pos = amount.len() - decimal_places;
		(
			amount[..split_pos].to_string(),
			amount[split_pos..].to_string(),
		)
	};

	let decimal_trimmed = decimal_part.trim_end_matches('0');
	if decimal_trimmed.is_empty() {
		integer_part
	} else {
		format!("{}.{}", integer_part, decimal_trimmed)
	}
}

/// Parses a human-readable amount such as "1.5" into raw token units.
pub fn parse_token_amount(amount: &str, decimals: u8) -> Result<U256, AmountError> {
	let amount = amount.trim();
	if amount.is_empty() {
		return Err(AmountError::Empty);
	}

	let (integer_part, fraction_part) = match amount.split_once('.') {
		Some((i, f)) => (i, f),
		None => (amount, ""),
	};
	let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
	if (integer_part.is_empty() && fraction_part.is_empty())
		|| !is_digits(integer_part)
		|| !is_digits(fraction_part)
	{
		return Err(AmountError::Invalid(amount.to_string()));
	}
	if fraction_part.len() > decimals as usize {
		return Err(AmountError::TooPrecise {
			amount: amount.to_string(),
			decimals,
		});
	}

	let digits = format!(
		"{}{:0<width$}",
		integer_part,
		fraction_part,
		width = decimals as usize
	);
	let digits = digits.trim_start_matches('0');
	if digits.is_empty() {
		return Ok(U256::ZERO);
	}
	U256::from_str_radix(digits, 10).map_err(|_| AmountError::Overflow(amount.to_string()))
}
