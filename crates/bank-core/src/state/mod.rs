//! Flow state tracking.

pub mod operation;

pub use operation::{OperationRegistry, OperationStateError};
