pub mod worker;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;

use parity_service::{ParityService, PgGroupStore};
use parity_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = parity_cli::VERSION,
	rename_all = "kebab",
	styles = parity_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Run a single maintenance pass, print the reports as JSON, and exit.
	#[arg(long)]
	pub once: bool,
	/// Only maintain this chain. Repeat to select several.
	#[arg(long = "chain", value_name = "NAME")]
	pub chains: Vec<String>,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = parity_config::load(&args.config)?;

	parity_cli::init_tracing(&config.service.log_level);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let interval = config.worker.interval_seconds;
	let service = ParityService::new(config, Arc::new(PgGroupStore::new(db)))?;
	let state = worker::WorkerState { service, chains: args.chains, interval_seconds: interval };

	if args.once {
		let reports = worker::run_once(&state).await?;

		println!("{}", serde_json::to_string_pretty(&reports)?);

		return Ok(());
	}

	worker::run_worker(state).await
}

#[cfg(test)]
mod tests {
	use clap::{CommandFactory, Parser};

	use crate::Args;

	#[test]
	fn args_are_well_formed() {
		Args::command().debug_assert();
	}

	#[test]
	fn chains_repeat() {
		let args = Args::try_parse_from([
			"parity-worker",
			"-c",
			"parity.toml",
			"--once",
			"--chain",
			"acme",
			"--chain",
			"beta",
		])
		.expect("Failed to parse args.");

		assert!(args.once);
		assert_eq!(args.config.to_str(), Some("parity.toml"));
		assert_eq!(args.chains, vec!["acme".to_string(), "beta".to_string()]);
	}
}
