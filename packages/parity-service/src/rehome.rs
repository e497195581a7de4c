use serde::Serialize;

use crate::{GroupMembers, MaintenanceRun, ParityService, ServiceResult};
use parity_domain::{cooldown::CacheOutcome, overlap::true_overlap};

/// Where an ejected store ended up.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EjectOutcome {
	/// Left alone in the singleton group created by the ejection.
	Singleton { group_id: i64 },
	/// Moved into an existing group whose anchor it matches.
	Rehomed { group_id: i64 },
}
impl EjectOutcome {
	pub fn group_id(self) -> i64 {
		match self {
			Self::Singleton { group_id } | Self::Rehomed { group_id } => group_id,
		}
	}
}

impl ParityService {
	/// Ejects `store_id` from `group_id`, then tries to rehome it.
	///
	/// Only a failed ejection is an error. A failed rehome leaves the store in its singleton group,
	/// which is a valid state that later merge passes pick up.
	pub async fn eject_and_rehome(
		&self,
		chain: &str,
		store_id: i64,
		group_id: i64,
		run: &mut MaintenanceRun,
	) -> ServiceResult<EjectOutcome> {
		let singleton = self.store.eject(store_id, group_id).await?;

		tracing::info!(
			chain,
			store_id,
			from_group_id = group_id,
			singleton_group_id = singleton,
			"Ejected store into a singleton group."
		);

		let target = match self.find_home(chain, store_id, &[group_id, singleton], run).await {
			Ok(Some(target)) => target,
			Ok(None) => return Ok(EjectOutcome::Singleton { group_id: singleton }),
			Err(err) => {
				tracing::warn!(
					chain,
					store_id,
					singleton_group_id = singleton,
					error = %err,
					"Rehome lookup failed. Store stays in its singleton group."
				);

				return Ok(EjectOutcome::Singleton { group_id: singleton });
			},
		};

		if let Err(err) = self.store.rehome(store_id, singleton, target).await {
			tracing::warn!(
				chain,
				store_id,
				singleton_group_id = singleton,
				target_group_id = target,
				error = %err,
				"Rehome failed. Store stays in its singleton group."
			);

			return Ok(EjectOutcome::Singleton { group_id: singleton });
		}

		run.caches.health.record(store_id, CacheOutcome::Healthy, run.now);

		tracing::info!(chain, store_id, group_id = target, "Rehomed ejected store.");

		Ok(EjectOutcome::Rehomed { group_id: target })
	}

	/// First active group of `chain`, by ascending group id, whose anchor matches `store_id`.
	pub async fn find_home(
		&self,
		chain: &str,
		store_id: i64,
		excluded_group_ids: &[i64],
		run: &MaintenanceRun,
	) -> ServiceResult<Option<i64>> {
		let targets = self
			.store
			.list_groups(chain)
			.await?
			.into_iter()
			.filter(|group| !excluded_group_ids.contains(&group.group_id))
			.filter_map(|group| {
				group
					.resolved_anchor()
					.filter(|&anchor| anchor != store_id)
					.map(|anchor| (group.group_id, anchor))
			})
			.collect::<Vec<_>>();

		if targets.is_empty() {
			return Ok(None);
		}

		let mut fetch = targets.iter().map(|&(_, anchor)| anchor).collect::<Vec<_>>();

		fetch.push(store_id);

		let snapshots = self.store.snapshots(&fetch, self.snapshot_since(run)).await?;
		let Some(prices) = snapshots.get(&store_id) else {
			return Ok(None);
		};

		for (group_id, anchor) in targets {
			let Some(anchor_prices) = snapshots.get(&anchor) else {
				continue;
			};

			if true_overlap(prices, anchor_prices, self.settings.match_threshold) {
				return Ok(Some(group_id));
			}
		}

		Ok(None)
	}

	/// Deactivates a group that has no members left. Returns whether it was dissolved.
	pub async fn dissolve_group(&self, group: &GroupMembers) -> ServiceResult<bool> {
		if !group.member_ids.is_empty() {
			return Ok(false);
		}

		let cleared = self.store.dissolve(group.group_id).await?;

		tracing::info!(
			chain = group.chain.as_str(),
			group_id = group.group_id,
			cleared,
			"Dissolved group without members."
		);

		Ok(true)
	}
}
