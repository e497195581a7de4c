use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::{MaintenanceRun, ParityService, ServiceResult};
use parity_domain::{
	cooldown::CacheOutcome,
	merge_plan::{MergeCandidate, candidate_pairs, merge_direction, pair_key, sample_candidates},
	overlap::{PriceSnapshot, true_overlap},
};

#[derive(Clone, Debug, Default, Serialize)]
pub struct MergePassReport {
	/// Anchored groups whose anchor has qualifying price data.
	pub candidates: usize,
	pub sampled: usize,
	pub pairs: usize,
	/// Pairs skipped because they were recently found distinct.
	pub pairs_cached: usize,
	/// Pairs skipped because one side was merged earlier in the pass.
	pub pairs_consumed: usize,
	pub comparisons: usize,
	pub merges: usize,
	pub members_moved: usize,
	pub prices_pruned: u64,
	pub failures: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MergeSummary {
	pub passes: Vec<MergePassReport>,
	pub total_merges: usize,
	/// False when the pass limit was hit while merges were still happening.
	pub converged: bool,
}

impl ParityService {
	/// One merge pass over `chain`. Each group takes part in at most one merge.
	pub async fn run_merge_pass(
		&self,
		chain: &str,
		run: &mut MaintenanceRun,
	) -> ServiceResult<MergePassReport> {
		let mut report = MergePassReport::default();
		let candidates = self.merge_candidates(chain, run).await?;

		report.candidates = candidates.len();

		let sampled = sample_candidates(
			candidates,
			self.settings.candidate_cap,
			self.settings.sample_size,
			&mut run.rng,
		);

		report.sampled = sampled.len();

		let mut pairs = Vec::new();

		for (left, right) in candidate_pairs(&sampled) {
			report.pairs += 1;

			if run.caches.pairs.is_cooling(&pair_key(&sampled[left], &sampled[right]), run.now) {
				report.pairs_cached += 1;

				continue;
			}

			pairs.push((sampled[left], sampled[right]));
		}

		if pairs.is_empty() {
			return Ok(report);
		}

		let anchors = pairs
			.iter()
			.flat_map(|(a, b)| [a.anchor_store_id, b.anchor_store_id])
			.collect::<BTreeSet<_>>()
			.into_iter()
			.collect::<Vec<_>>();
		let snapshots = self.store.snapshots(&anchors, self.snapshot_since(run)).await?;
		let empty = PriceSnapshot::new();
		let mut consumed = HashSet::new();

		for (a, b) in pairs {
			if consumed.contains(&a.group_id) || consumed.contains(&b.group_id) {
				report.pairs_consumed += 1;

				continue;
			}

			report.comparisons += 1;

			let a_prices = snapshots.get(&a.anchor_store_id).unwrap_or(&empty);
			let b_prices = snapshots.get(&b.anchor_store_id).unwrap_or(&empty);

			if !true_overlap(a_prices, b_prices, self.settings.match_threshold) {
				run.caches.pairs.record(pair_key(&a, &b), CacheOutcome::Distinct, run.now);

				continue;
			}

			let direction = merge_direction(a, b);
			let survivor = direction.survivor.group_id;
			let absorbed = direction.absorbed.group_id;

			match self.store.merge_groups(survivor, absorbed, self.settings.prune_member_prices).await
			{
				Ok(outcome) => {
					consumed.insert(survivor);
					consumed.insert(absorbed);

					report.merges += 1;
					report.members_moved += outcome.moved_store_ids.len();
					report.prices_pruned += outcome.pruned_prices;

					run.caches.pairs.forget_where(|pair| pair.contains(absorbed));

					for store_id in &outcome.moved_store_ids {
						run.caches.health.forget(store_id);
					}

					tracing::info!(
						chain,
						survivor_group_id = survivor,
						absorbed_group_id = absorbed,
						moved_members = outcome.moved_store_ids.len(),
						pruned_prices = outcome.pruned_prices,
						"Merged converged groups."
					);
				},
				Err(err) => {
					tracing::warn!(
						chain,
						survivor_group_id = survivor,
						absorbed_group_id = absorbed,
						error = %err,
						"Group merge failed. The pair will be retried on a later pass."
					);

					report.failures += 1;
				},
			}
		}

		tracing::debug!(
			chain,
			candidates = report.candidates,
			sampled = report.sampled,
			comparisons = report.comparisons,
			pairs_cached = report.pairs_cached,
			merges = report.merges,
			"Merge pass finished."
		);

		Ok(report)
	}

	/// Repeats merge passes until one merges nothing, bounded by `grouping.merge.max_passes`.
	pub async fn merge_until_fixpoint(
		&self,
		chain: &str,
		run: &mut MaintenanceRun,
	) -> ServiceResult<MergeSummary> {
		let mut summary = MergeSummary::default();

		for _ in 0..self.settings.max_passes {
			let report = self.run_merge_pass(chain, run).await?;
			let merges = report.merges;

			summary.total_merges += merges;
			summary.passes.push(report);

			if merges == 0 {
				summary.converged = true;

				break;
			}
		}

		if !summary.converged {
			tracing::warn!(
				chain,
				passes = summary.passes.len(),
				total_merges = summary.total_merges,
				"Merge passes hit the pass limit before converging. The next run continues."
			);
		}

		Ok(summary)
	}

	async fn merge_candidates(
		&self,
		chain: &str,
		run: &MaintenanceRun,
	) -> ServiceResult<Vec<MergeCandidate>> {
		let anchored = self
			.store
			.list_groups(chain)
			.await?
			.into_iter()
			.filter_map(|group| {
				group.resolved_anchor().map(|anchor_store_id| MergeCandidate {
					group_id: group.group_id,
					anchor_store_id,
					member_count: group.member_count(),
				})
			})
			.collect::<Vec<_>>();
		let anchor_ids =
			anchored.iter().map(|candidate| candidate.anchor_store_id).collect::<Vec<_>>();
		let latest = self.store.latest_scrapes(&anchor_ids).await?;
		let require_fresh = self.settings.require_fresh_anchor;

		Ok(anchored
			.into_iter()
			.filter(|candidate| {
				let scraped_at = latest.get(&candidate.anchor_store_id).copied();

				if require_fresh { run.gate.is_fresh(scraped_at) } else { scraped_at.is_some() }
			})
			.collect())
	}
}
