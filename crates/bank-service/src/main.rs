//! Main entry point for the token bank client.
//!
//! Loads the configuration, assembles the engine from the registered
//! custodian and delivery implementations and runs one flow step or query
//! per invocation.

use bank_config::Config;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod factory_registry;

use commands::Command;

/// Command-line arguments for the token bank client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/tokenbank.toml", env = "TOKENBANK_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.init();

	let path = args
		.config
		.to_str()
		.ok_or_else(|| format!("Config path is not valid UTF-8: {}", args.config.display()))?;
	let config = Config::from_file(path).await?;
	tracing::info!("Loaded configuration [{}]", config.bank.id);

	let engine = Arc::new(factory_registry::build_engine_from_config(config).await?);
	commands::execute(engine, args.command).await?;
	Ok(())
}
