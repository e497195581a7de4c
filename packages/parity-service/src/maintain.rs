use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
	ComparisonCaches, HealthReport, MergeSummary, ParityService, ServiceError, ServiceResult,
};
use parity_domain::freshness::FreshnessGate;

/// State shared by every step of one maintenance run.
///
/// `now` and the freshness gate are fixed when the run begins, so every chain is judged against
/// the same cutoff.
pub struct MaintenanceRun {
	pub now: OffsetDateTime,
	pub gate: FreshnessGate,
	pub caches: ComparisonCaches,
	pub(crate) rng: StdRng,
}
impl MaintenanceRun {
	pub fn new(
		now: OffsetDateTime,
		gate: FreshnessGate,
		caches: ComparisonCaches,
		sample_seed: Option<u64>,
	) -> Self {
		let rng = match sample_seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};

		Self { now, gate, caches, rng }
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct MaintenanceReport {
	pub chain: String,
	pub singletons_created: usize,
	pub health: HealthReport,
	pub merge: MergeSummary,
}

impl ParityService {
	/// Fixes the run clock and freshness gate, then loads the persisted comparison caches.
	///
	/// A cache that cannot be loaded only costs extra comparisons, so the run continues with empty
	/// caches instead of failing.
	pub async fn begin_run(&self, now: OffsetDateTime) -> ServiceResult<MaintenanceRun> {
		let latest_overall = self.store.latest_scrape_overall().await?;
		let gate = FreshnessGate::new(
			self.settings.freshness_mode,
			self.settings.freshness_window,
			now,
			latest_overall,
		);
		let caches = match ComparisonCaches::load(
			self.store.as_ref(),
			self.settings.health_cooldown,
			self.settings.pair_cooldown,
			now,
		)
		.await
		{
			Ok(caches) => caches,
			Err(err) => {
				tracing::warn!(error = %err, "Failed to load comparison caches. Starting empty.");

				ComparisonCaches::new(self.settings.health_cooldown, self.settings.pair_cooldown)
			},
		};

		tracing::debug!(
			mode = self.settings.freshness_mode.as_str(),
			cutoff = ?gate.cutoff(),
			health_entries = caches.health.len(),
			pair_entries = caches.pairs.len(),
			"Maintenance run started."
		);

		Ok(MaintenanceRun::new(now, gate, caches, self.settings.sample_seed))
	}

	pub async fn finish_run(&self, run: &mut MaintenanceRun) -> ServiceResult<()> {
		run.caches.persist(self.store.as_ref(), run.now).await
	}

	/// Singleton assignment, then the health check, then merge passes until nothing merges.
	pub async fn maintain_chain(
		&self,
		chain: &str,
		run: &mut MaintenanceRun,
	) -> ServiceResult<MaintenanceReport> {
		let chain = chain.trim();

		if chain.is_empty() {
			return Err(ServiceError::InvalidRequest {
				message: "chain must not be empty.".to_string(),
			});
		}

		let singletons = self.store.ensure_singletons(chain).await?;

		if !singletons.is_empty() {
			tracing::info!(
				chain,
				created = singletons.len(),
				"Assigned ungrouped stores to singleton groups."
			);
		}

		let health = self.run_health_check(chain, run).await?;
		let merge = self.merge_until_fixpoint(chain, run).await?;

		tracing::info!(
			chain,
			members_ejected = health.members_ejected,
			members_rehomed = health.members_rehomed,
			merges = merge.total_merges,
			converged = merge.converged,
			"Chain maintenance finished."
		);

		Ok(MaintenanceReport {
			chain: chain.to_string(),
			singletons_created: singletons.len(),
			health,
			merge,
		})
	}

	/// Maintains every chain in one run.
	///
	/// Chains come from `chains`, then from `grouping.chains`, then from the stores table. A chain
	/// that fails is logged and skipped so the others still run.
	pub async fn maintain(
		&self,
		chains: &[String],
		now: OffsetDateTime,
	) -> ServiceResult<Vec<MaintenanceReport>> {
		let chains = self.resolve_chains(chains).await?;
		let mut run = self.begin_run(now).await?;
		let mut reports = Vec::with_capacity(chains.len());

		for chain in &chains {
			match self.maintain_chain(chain, &mut run).await {
				Ok(report) => reports.push(report),
				Err(err) => {
					tracing::error!(chain = chain.as_str(), error = %err, "Chain maintenance failed.");
				},
			}
		}

		if let Err(err) = self.finish_run(&mut run).await {
			tracing::warn!(error = %err, "Failed to persist comparison caches.");
		}

		Ok(reports)
	}

	async fn resolve_chains(&self, chains: &[String]) -> ServiceResult<Vec<String>> {
		let requested =
			if chains.is_empty() { self.cfg.grouping.chains.as_slice() } else { chains };
		let mut resolved = requested
			.iter()
			.map(|chain| chain.trim().to_string())
			.filter(|chain| !chain.is_empty())
			.collect::<Vec<_>>();

		if resolved.is_empty() {
			resolved = self.store.list_chains().await?;
		}

		resolved.sort();
		resolved.dedup();

		Ok(resolved)
	}
}
