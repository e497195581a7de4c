use std::collections::{HashMap, HashSet};

use serde::Serialize;
use time::OffsetDateTime;

use crate::{EjectOutcome, GroupMembers, MaintenanceRun, ParityService, ServiceResult};
use parity_domain::{
	cooldown::CacheOutcome,
	overlap::{PriceSnapshot, true_overlap},
};

#[derive(Clone, Debug, Default, Serialize)]
pub struct HealthReport {
	pub groups_checked: usize,
	pub groups_stale: usize,
	pub groups_dissolved: usize,
	pub anchors_promoted: usize,
	pub members_confirmed: usize,
	pub members_diverged: usize,
	pub members_ejected: usize,
	pub members_rehomed: usize,
	pub stale_members: usize,
	/// Comparisons skipped because the member was confirmed within the cooldown.
	pub cache_skips: usize,
	pub prices_pruned: u64,
	pub failures: usize,
}
impl HealthReport {
	fn record(&mut self, verdict: MemberVerdict) {
		match verdict {
			MemberVerdict::CoolingDown => self.cache_skips += 1,
			MemberVerdict::Stale => self.stale_members += 1,
			MemberVerdict::Healthy => self.members_confirmed += 1,
			MemberVerdict::Rogue => self.members_diverged += 1,
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AnchorResolution {
	/// The recorded anchor is still a member.
	Resolved(i64),
	/// The recorded anchor was gone and the lowest member id took over.
	Promoted(i64),
	/// Nothing is left to anchor the group.
	Empty,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberVerdict {
	CoolingDown,
	Stale,
	Healthy,
	Rogue,
}

#[derive(Clone, Copy)]
enum MemberSelection<'a> {
	All,
	/// Only these stores, with the health cooldown ignored.
	Only(&'a HashSet<i64>),
}
impl MemberSelection<'_> {
	fn includes(self, store_id: i64) -> bool {
		match self {
			Self::All => true,
			Self::Only(targets) => targets.contains(&store_id),
		}
	}

	fn honors_cooldown(self) -> bool {
		matches!(self, Self::All)
	}
}

impl ParityService {
	/// Verifies every member of every group in `chain` against its anchor.
	pub async fn run_health_check(
		&self,
		chain: &str,
		run: &mut MaintenanceRun,
	) -> ServiceResult<HealthReport> {
		let groups = self.store.list_groups(chain).await?;

		self.check_groups(chain, &groups, MemberSelection::All, run).await
	}

	/// Re-verifies freshly scraped stores against their anchors right away.
	///
	/// Any health cooldown held by the listed stores is dropped first, so new data is never
	/// shadowed by an older confirmation.
	pub async fn verify_candidates(
		&self,
		chain: &str,
		store_ids: &[i64],
		run: &mut MaintenanceRun,
	) -> ServiceResult<HealthReport> {
		let targets = store_ids.iter().copied().collect::<HashSet<_>>();

		if targets.is_empty() {
			return Ok(HealthReport::default());
		}

		for store_id in &targets {
			run.caches.health.forget(store_id);
		}

		let groups = self
			.store
			.list_groups(chain)
			.await?
			.into_iter()
			.filter(|group| group.member_ids.iter().any(|store_id| targets.contains(store_id)))
			.collect::<Vec<_>>();

		self.check_groups(chain, &groups, MemberSelection::Only(&targets), run).await
	}

	async fn check_groups(
		&self,
		chain: &str,
		groups: &[GroupMembers],
		selection: MemberSelection<'_>,
		run: &mut MaintenanceRun,
	) -> ServiceResult<HealthReport> {
		let store_ids =
			groups.iter().flat_map(|group| group.member_ids.iter().copied()).collect::<Vec<_>>();
		let latest = self.store.latest_scrapes(&store_ids).await?;
		let mut report = HealthReport::default();

		for group in groups {
			if let Err(err) = self.check_group(chain, group, &latest, selection, run, &mut report).await
			{
				tracing::warn!(
					chain,
					group_id = group.group_id,
					error = %err,
					"Group health check failed. Continuing with the next group."
				);

				report.failures += 1;
			}
		}

		tracing::info!(
			chain,
			groups_checked = report.groups_checked,
			groups_stale = report.groups_stale,
			members_confirmed = report.members_confirmed,
			members_ejected = report.members_ejected,
			members_rehomed = report.members_rehomed,
			cache_skips = report.cache_skips,
			failures = report.failures,
			"Health check finished."
		);

		Ok(report)
	}

	async fn check_group(
		&self,
		chain: &str,
		group: &GroupMembers,
		latest: &HashMap<i64, OffsetDateTime>,
		selection: MemberSelection<'_>,
		run: &mut MaintenanceRun,
		report: &mut HealthReport,
	) -> ServiceResult<()> {
		let anchor = match self.resolve_anchor(group, run).await? {
			AnchorResolution::Resolved(anchor) => anchor,
			AnchorResolution::Promoted(anchor) => {
				report.anchors_promoted += 1;

				anchor
			},
			AnchorResolution::Empty => {
				if self.dissolve_group(group).await? {
					report.groups_dissolved += 1;
				}

				return Ok(());
			},
		};

		if group.member_count() < 2 {
			return Ok(());
		}

		report.groups_checked += 1;

		if !run.gate.is_fresh(latest.get(&anchor).copied()) {
			report.groups_stale += 1;

			tracing::info!(
				chain,
				group_id = group.group_id,
				anchor_store_id = anchor,
				"Anchor prices are stale. Skipping group until the anchor is rescraped."
			);

			if let Err(err) = self.store.flag_for_rescrape(anchor).await {
				tracing::warn!(
					chain,
					anchor_store_id = anchor,
					error = %err,
					"Failed to flag anchor for rescraping."
				);

				report.failures += 1;
			}

			return Ok(());
		}

		let mut pending = Vec::new();

		for &store_id in &group.member_ids {
			if store_id == anchor || !selection.includes(store_id) {
				continue;
			}

			match screen_member(store_id, latest, selection, run) {
				Some(verdict) => report.record(verdict),
				None => pending.push(store_id),
			}
		}

		if pending.is_empty() {
			return Ok(());
		}

		let mut fetch = pending.clone();

		fetch.push(anchor);

		let snapshots = self.store.snapshots(&fetch, self.snapshot_since(run)).await?;
		let empty = PriceSnapshot::new();
		let anchor_prices = snapshots.get(&anchor).unwrap_or(&empty);
		let mut confirmed = Vec::new();

		for store_id in pending {
			let member_prices = snapshots.get(&store_id).unwrap_or(&empty);
			let verdict = compare_member(anchor_prices, member_prices, self.settings.match_threshold);

			report.record(verdict);

			if verdict == MemberVerdict::Healthy {
				run.caches.health.record(store_id, CacheOutcome::Healthy, run.now);
				confirmed.push(store_id);

				continue;
			}

			tracing::info!(
				chain,
				group_id = group.group_id,
				store_id,
				anchor_store_id = anchor,
				"Member prices diverged from the anchor. Ejecting."
			);

			match self.eject_and_rehome(chain, store_id, group.group_id, run).await {
				Ok(outcome) => {
					report.members_ejected += 1;

					if matches!(outcome, EjectOutcome::Rehomed { .. }) {
						report.members_rehomed += 1;
					}

					tracing::debug!(
						chain,
						store_id,
						from_group_id = group.group_id,
						to_group_id = outcome.group_id(),
						"Member left its group."
					);
				},
				Err(err) => {
					tracing::warn!(
						chain,
						group_id = group.group_id,
						store_id,
						error = %err,
						"Ejection failed. Member stays in its group until the next pass."
					);

					report.failures += 1;
				},
			}
		}

		if self.settings.prune_member_prices && !confirmed.is_empty() {
			match self.store.delete_store_prices(&confirmed).await {
				Ok(pruned) => report.prices_pruned += pruned,
				Err(err) => {
					tracing::warn!(
						chain,
						group_id = group.group_id,
						error = %err,
						"Failed to prune confirmed member prices."
					);

					report.failures += 1;
				},
			}
		}

		Ok(())
	}

	/// Returns the group's anchor, promoting the lowest member id when the recorded one is gone.
	pub async fn resolve_anchor(
		&self,
		group: &GroupMembers,
		run: &mut MaintenanceRun,
	) -> ServiceResult<AnchorResolution> {
		if let Some(anchor) = group.resolved_anchor() {
			return Ok(AnchorResolution::Resolved(anchor));
		}

		let Some(&promoted) = group.member_ids.first() else {
			return Ok(AnchorResolution::Empty);
		};

		tracing::warn!(
			chain = group.chain.as_str(),
			group_id = group.group_id,
			missing_anchor_store_id = ?group.anchor_store_id,
			promoted_store_id = promoted,
			"Group anchor is missing. Promoting the lowest member id."
		);

		self.store.set_anchor(group.group_id, promoted).await?;

		// Confirmations against the previous anchor no longer hold.
		for store_id in &group.member_ids {
			run.caches.health.forget(store_id);
		}

		Ok(AnchorResolution::Promoted(promoted))
	}
}

/// A verdict reached without looking at prices, if any.
fn screen_member(
	store_id: i64,
	latest: &HashMap<i64, OffsetDateTime>,
	selection: MemberSelection<'_>,
	run: &MaintenanceRun,
) -> Option<MemberVerdict> {
	if selection.honors_cooldown() && run.caches.health.is_cooling(&store_id, run.now) {
		return Some(MemberVerdict::CoolingDown);
	}
	if !run.gate.is_fresh(latest.get(&store_id).copied()) {
		return Some(MemberVerdict::Stale);
	}

	None
}

fn compare_member(
	anchor_prices: &PriceSnapshot,
	member_prices: &PriceSnapshot,
	threshold: f64,
) -> MemberVerdict {
	if true_overlap(anchor_prices, member_prices, threshold) {
		MemberVerdict::Healthy
	} else {
		MemberVerdict::Rogue
	}
}

#[cfg(test)]
mod tests {
	use rust_decimal::Decimal;

	use crate::health::{HealthReport, MemberVerdict, compare_member};
	use parity_domain::overlap::PriceSnapshot;

	fn snapshot(prices: &[(i64, i64)]) -> PriceSnapshot {
		prices.iter().map(|&(product_id, cents)| (product_id, Decimal::new(cents, 2))).collect()
	}

	#[test]
	fn members_without_common_products_are_rogue() {
		let anchor = snapshot(&[(1, 199), (2, 299)]);
		let member = snapshot(&[(3, 199)]);

		assert_eq!(compare_member(&anchor, &member, 0.9), MemberVerdict::Rogue);
		assert_eq!(compare_member(&anchor, &PriceSnapshot::new(), 0.9), MemberVerdict::Rogue);
	}

	#[test]
	fn identical_common_prices_are_healthy() {
		let anchor = snapshot(&[(1, 199), (2, 299), (3, 399)]);
		let member = snapshot(&[(1, 199), (2, 299), (4, 10)]);

		assert_eq!(compare_member(&anchor, &member, 1.0), MemberVerdict::Healthy);
	}

	#[test]
	fn report_counts_each_verdict_once() {
		let mut report = HealthReport::default();

		for verdict in [
			MemberVerdict::CoolingDown,
			MemberVerdict::Stale,
			MemberVerdict::Healthy,
			MemberVerdict::Healthy,
			MemberVerdict::Rogue,
		] {
			report.record(verdict);
		}

		assert_eq!(report.cache_skips, 1);
		assert_eq!(report.stale_members, 1);
		assert_eq!(report.members_confirmed, 2);
		assert_eq!(report.members_diverged, 1);
	}
}
