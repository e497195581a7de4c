//! Short-lived memos of comparison outcomes.
//!
//! A cache entry only ever suppresses work. Dropping the whole cache is always safe.

use std::{collections::HashMap, fmt, hash::Hash};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Subject of a cache entry, with a stable text form for persistence.
pub trait CacheKey
where
	Self: Sized + Clone + Eq + Hash,
{
	fn encode(&self) -> String;

	fn decode(raw: &str) -> Option<Self>;
}

impl CacheKey for i64 {
	fn encode(&self) -> String {
		self.to_string()
	}

	fn decode(raw: &str) -> Option<Self> {
		raw.trim().parse().ok()
	}
}

/// Unordered pair of group ids, stored low id first.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GroupPair {
	low: i64,
	high: i64,
}
impl GroupPair {
	pub fn new(a: i64, b: i64) -> Self {
		if a <= b { Self { low: a, high: b } } else { Self { low: b, high: a } }
	}

	pub fn contains(&self, group_id: i64) -> bool {
		self.low == group_id || self.high == group_id
	}
}
impl fmt::Display for GroupPair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.low, self.high)
	}
}
impl CacheKey for GroupPair {
	fn encode(&self) -> String {
		self.to_string()
	}

	fn decode(raw: &str) -> Option<Self> {
		let (low, high) = raw.split_once(':')?;

		Some(Self::new(low.trim().parse().ok()?, high.trim().parse().ok()?))
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
	/// Member matched its anchor.
	Healthy,
	/// Two group anchors did not match.
	Distinct,
}
impl CacheOutcome {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Healthy => "healthy",
			Self::Distinct => "distinct",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"healthy" => Some(Self::Healthy),
			"distinct" => Some(Self::Distinct),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheEntry {
	pub outcome: CacheOutcome,
	pub checked_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct CooldownCache<K> {
	cooldown: Duration,
	entries: HashMap<K, CacheEntry>,
}
impl<K> CooldownCache<K>
where
	K: CacheKey,
{
	pub fn new(cooldown: Duration) -> Self {
		Self { cooldown, entries: HashMap::new() }
	}

	/// True while `key` was checked less than one cooldown before `now`.
	pub fn is_cooling(&self, key: &K, now: OffsetDateTime) -> bool {
		self.entries.get(key).is_some_and(|entry| self.entry_is_live(entry, now))
	}

	pub fn get(&self, key: &K) -> Option<&CacheEntry> {
		self.entries.get(key)
	}

	pub fn record(&mut self, key: K, outcome: CacheOutcome, now: OffsetDateTime) {
		self.entries.insert(key, CacheEntry { outcome, checked_at: now });
	}

	/// Restores a persisted entry, keeping the newer one when the key is already present.
	pub fn restore(&mut self, key: K, entry: CacheEntry) {
		match self.entries.get(&key) {
			Some(existing) if existing.checked_at >= entry.checked_at => {},
			_ => {
				self.entries.insert(key, entry);
			},
		}
	}

	pub fn forget(&mut self, key: &K) -> bool {
		self.entries.remove(key).is_some()
	}

	/// Drops every entry whose key matches `predicate`.
	pub fn forget_where<P>(&mut self, mut predicate: P) -> usize
	where
		P: FnMut(&K) -> bool,
	{
		let before = self.entries.len();

		self.entries.retain(|key, _| !predicate(key));

		before - self.entries.len()
	}

	/// Drops entries whose cooldown has lapsed. Returns how many were removed.
	pub fn prune(&mut self, now: OffsetDateTime) -> usize {
		let cooldown = self.cooldown;
		let before = self.entries.len();

		self.entries.retain(|_, entry| expires_at(entry, cooldown).is_none_or(|until| until > now));

		before - self.entries.len()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&K, &CacheEntry)> {
		self.entries.iter()
	}

	fn entry_is_live(&self, entry: &CacheEntry, now: OffsetDateTime) -> bool {
		entry.checked_at <= now
			&& expires_at(entry, self.cooldown).is_none_or(|until| now < until)
	}
}

/// End of the cooldown, or `None` when it lies past the representable range.
fn expires_at(entry: &CacheEntry, cooldown: Duration) -> Option<OffsetDateTime> {
	entry.checked_at.checked_add(cooldown)
}

#[cfg(test)]
mod tests {
	use time::{Duration, macros::datetime};

	use crate::cooldown::{CacheEntry, CacheKey, CacheOutcome, CooldownCache, GroupPair};

	#[test]
	fn group_pair_is_unordered() {
		assert_eq!(GroupPair::new(7, 3), GroupPair::new(3, 7));
		assert_eq!(GroupPair::new(7, 3).encode(), "3:7");
		assert_eq!(GroupPair::decode("7:3"), Some(GroupPair::new(3, 7)));
		assert_eq!(GroupPair::decode("7"), None);
		assert_eq!(GroupPair::decode("a:b"), None);
	}

	#[test]
	fn store_keys_round_trip_through_text() {
		assert_eq!(i64::decode(&42_i64.encode()), Some(42));
		assert_eq!(i64::decode("store-42"), None);
	}

	#[test]
	fn entries_cool_down_for_one_window() {
		let mut cache = CooldownCache::<i64>::new(Duration::hours(24));
		let checked_at = datetime!(2026-03-10 00:00 UTC);

		cache.record(5, CacheOutcome::Healthy, checked_at);

		assert!(cache.is_cooling(&5, datetime!(2026-03-10 23:59 UTC)));
		assert!(!cache.is_cooling(&5, datetime!(2026-03-11 00:00 UTC)));
		assert!(!cache.is_cooling(&6, datetime!(2026-03-10 01:00 UTC)));
	}

	#[test]
	fn zero_cooldown_never_suppresses() {
		let mut cache = CooldownCache::<i64>::new(Duration::ZERO);
		let now = datetime!(2026-03-10 00:00 UTC);

		cache.record(5, CacheOutcome::Healthy, now);

		assert!(!cache.is_cooling(&5, now));
	}

	#[test]
	fn oversized_cooldown_keeps_cooling() {
		let mut cache = CooldownCache::<i64>::new(Duration::MAX);
		let checked_at = datetime!(2026-03-10 00:00 UTC);

		cache.record(5, CacheOutcome::Healthy, checked_at);

		assert!(cache.is_cooling(&5, datetime!(2126-03-10 00:00 UTC)));
		assert_eq!(cache.prune(datetime!(2126-03-10 00:00 UTC)), 0);
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn prune_drops_lapsed_entries() {
		let mut cache = CooldownCache::<GroupPair>::new(Duration::hours(1));

		cache.record(GroupPair::new(1, 2), CacheOutcome::Distinct, datetime!(2026-03-10 00:00 UTC));
		cache.record(GroupPair::new(1, 3), CacheOutcome::Distinct, datetime!(2026-03-10 02:00 UTC));

		assert_eq!(cache.prune(datetime!(2026-03-10 02:30 UTC)), 1);
		assert_eq!(cache.len(), 1);
		assert!(cache.get(&GroupPair::new(3, 1)).is_some());
	}

	#[test]
	fn restore_keeps_the_newer_entry() {
		let mut cache = CooldownCache::<i64>::new(Duration::hours(1));
		let newer = datetime!(2026-03-10 02:00 UTC);

		cache.record(9, CacheOutcome::Healthy, newer);
		cache.restore(9, CacheEntry {
			outcome: CacheOutcome::Healthy,
			checked_at: datetime!(2026-03-10 01:00 UTC),
		});

		assert_eq!(cache.get(&9).map(|entry| entry.checked_at), Some(newer));
	}

	#[test]
	fn forget_where_clears_pairs_touching_a_group() {
		let mut cache = CooldownCache::<GroupPair>::new(Duration::hours(1));
		let now = datetime!(2026-03-10 00:00 UTC);

		cache.record(GroupPair::new(1, 2), CacheOutcome::Distinct, now);
		cache.record(GroupPair::new(2, 3), CacheOutcome::Distinct, now);
		cache.record(GroupPair::new(3, 4), CacheOutcome::Distinct, now);

		assert_eq!(cache.forget_where(|pair| pair.contains(2)), 2);
		assert!(cache.is_cooling(&GroupPair::new(3, 4), now));
	}
}
