//! Registry trait for implementations selected by name in configuration.

/// Ties a configuration name to the factory that builds the implementation.
///
/// Every pluggable component (key custodian, transaction submitter) exposes a
/// `Registry` type implementing this trait. The name is the key used under
/// `<section>.implementations.<name>` in the TOML configuration.
pub trait ImplementationRegistry {
	/// Configuration key of the implementation, e.g. `"local"` or `"evm_alloy"`.
	const NAME: &'static str;

	/// Factory function type of the owning component.
	type Factory;

	/// Returns the factory that builds the implementation from its TOML table.
	fn factory() -> Self::Factory;
}
