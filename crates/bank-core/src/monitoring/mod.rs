//! Transaction monitoring.
//!
//! Watches submitted transactions until they reach a terminal status.

pub mod transaction;

pub use transaction::{TrackingOutcome, TransactionMonitor};
