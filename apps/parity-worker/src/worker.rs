use std::time::Duration as StdDuration;

use color_eyre::Result;
use time::{Duration, OffsetDateTime};
use tokio::time as tokio_time;

use parity_service::{MaintenanceReport, ParityService};

pub struct WorkerState {
	pub service: ParityService,
	/// Chains requested on the command line. Empty means the configured or discovered chains.
	pub chains: Vec<String>,
	pub interval_seconds: u64,
}

pub async fn run_once(state: &WorkerState) -> Result<Vec<MaintenanceReport>> {
	let started = OffsetDateTime::now_utc();
	let reports = state.service.maintain(&state.chains, started).await?;
	let elapsed = OffsetDateTime::now_utc() - started;

	tracing::info!(
		chains = reports.len(),
		elapsed_ms = elapsed_millis(elapsed),
		"Maintenance run finished."
	);

	Ok(reports)
}

/// Runs maintenance on a fixed interval. Runs never overlap, which keeps one writer per chain.
pub async fn run_worker(state: WorkerState) -> Result<()> {
	let interval = StdDuration::from_secs(state.interval_seconds);

	loop {
		if let Err(err) = run_once(&state).await {
			tracing::error!(error = %err, "Maintenance run failed.");
		}

		tokio_time::sleep(interval).await;
	}
}

fn elapsed_millis(elapsed: Duration) -> i64 {
	i64::try_from(elapsed.whole_milliseconds()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
	use time::Duration;

	use crate::worker::elapsed_millis;

	#[test]
	fn elapsed_time_saturates_instead_of_wrapping() {
		assert_eq!(elapsed_millis(Duration::milliseconds(1_500)), 1_500);
		assert_eq!(elapsed_millis(Duration::MAX), i64::MAX);
	}
}
