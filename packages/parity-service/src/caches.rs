use time::{Duration, OffsetDateTime};

use crate::{ComparisonCacheRow, GroupStore, ServiceResult};
use parity_domain::cooldown::{CacheEntry, CacheKey, CacheOutcome, CooldownCache, GroupPair};

pub const HEALTH_CACHE_KIND: &str = "store_health";
pub const PAIR_CACHE_KIND: &str = "group_pair";

/// Comparison memos carried through a maintenance run.
#[derive(Clone, Debug)]
pub struct ComparisonCaches {
	/// Members recently confirmed against their anchor, by store id.
	pub health: CooldownCache<i64>,
	/// Group pairs recently found distinct.
	pub pairs: CooldownCache<GroupPair>,
}
impl ComparisonCaches {
	pub fn new(health_cooldown: Duration, pair_cooldown: Duration) -> Self {
		Self {
			health: CooldownCache::new(health_cooldown),
			pairs: CooldownCache::new(pair_cooldown),
		}
	}

	/// Loads persisted entries, dropping the ones that already expired at `now`.
	pub async fn load(
		store: &dyn GroupStore,
		health_cooldown: Duration,
		pair_cooldown: Duration,
		now: OffsetDateTime,
	) -> ServiceResult<Self> {
		let mut caches = Self::new(health_cooldown, pair_cooldown);
		let health_rows = store.load_cache(HEALTH_CACHE_KIND).await?;
		let pair_rows = store.load_cache(PAIR_CACHE_KIND).await?;
		let skipped = restore_rows(&mut caches.health, &health_rows)
			+ restore_rows(&mut caches.pairs, &pair_rows);

		if skipped > 0 {
			tracing::warn!(skipped, "Ignored unreadable comparison cache rows.");
		}

		caches.prune(now);

		Ok(caches)
	}

	pub fn prune(&mut self, now: OffsetDateTime) -> usize {
		self.health.prune(now) + self.pairs.prune(now)
	}

	pub async fn persist(
		&mut self,
		store: &dyn GroupStore,
		now: OffsetDateTime,
	) -> ServiceResult<()> {
		self.prune(now);

		let health_rows = to_rows(HEALTH_CACHE_KIND, &self.health);
		let pair_rows = to_rows(PAIR_CACHE_KIND, &self.pairs);

		store.save_cache(HEALTH_CACHE_KIND, &health_rows).await?;
		store.save_cache(PAIR_CACHE_KIND, &pair_rows).await?;

		tracing::debug!(
			health_entries = health_rows.len(),
			pair_entries = pair_rows.len(),
			"Persisted comparison caches."
		);

		Ok(())
	}
}

fn restore_rows<K>(cache: &mut CooldownCache<K>, rows: &[ComparisonCacheRow]) -> usize
where
	K: CacheKey,
{
	let mut skipped = 0;

	for row in rows {
		match (K::decode(&row.subject_key), CacheOutcome::parse(&row.outcome)) {
			(Some(key), Some(outcome)) =>
				cache.restore(key, CacheEntry { outcome, checked_at: row.checked_at }),
			_ => skipped += 1,
		}
	}

	skipped
}

fn to_rows<K>(cache_kind: &str, cache: &CooldownCache<K>) -> Vec<ComparisonCacheRow>
where
	K: CacheKey,
{
	let mut rows = cache
		.iter()
		.map(|(key, entry)| ComparisonCacheRow {
			cache_kind: cache_kind.to_string(),
			subject_key: key.encode(),
			outcome: entry.outcome.as_str().to_string(),
			checked_at: entry.checked_at,
		})
		.collect::<Vec<_>>();

	rows.sort_by(|a, b| a.subject_key.cmp(&b.subject_key));

	rows
}

#[cfg(test)]
mod tests {
	use time::{Duration, macros::datetime};

	use crate::{
		ComparisonCacheRow,
		caches::{PAIR_CACHE_KIND, restore_rows, to_rows},
	};
	use parity_domain::cooldown::{CacheEntry, CacheOutcome, CooldownCache, GroupPair};

	fn row(key: &str, outcome: &str) -> ComparisonCacheRow {
		ComparisonCacheRow {
			cache_kind: PAIR_CACHE_KIND.to_string(),
			subject_key: key.to_string(),
			outcome: outcome.to_string(),
			checked_at: datetime!(2026-03-01 00:00 UTC),
		}
	}

	#[test]
	fn unreadable_rows_are_skipped() {
		let mut cache = CooldownCache::<GroupPair>::new(Duration::hours(24));
		let rows = vec![row("3:7", "distinct"), row("nope", "distinct"), row("1:2", "maybe")];

		assert_eq!(restore_rows(&mut cache, &rows), 2);
		assert_eq!(cache.len(), 1);
		assert_eq!(
			cache.get(&GroupPair::new(7, 3)),
			Some(&CacheEntry {
				outcome: CacheOutcome::Distinct,
				checked_at: datetime!(2026-03-01 00:00 UTC),
			})
		);
	}

	#[test]
	fn rows_are_written_in_key_order() {
		let mut cache = CooldownCache::<i64>::new(Duration::hours(24));
		let now = datetime!(2026-03-01 00:00 UTC);

		cache.record(30, CacheOutcome::Healthy, now);
		cache.record(4, CacheOutcome::Healthy, now);

		let rows = to_rows("store_health", &cache);
		let keys = rows.iter().map(|row| row.subject_key.as_str()).collect::<Vec<_>>();

		assert_eq!(keys, vec!["30", "4"]);
		assert!(rows.iter().all(|row| row.outcome == "healthy" && row.cache_kind == "store_health"));
	}
}
