//! In-process [`GroupStore`] for engine tests.
//!
//! Every mutation validates before it writes, so a rejected call leaves the state untouched just
//! like a rolled back transaction. Individual groups or stores can be set to fail their mutations.

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	future,
	sync::{Mutex, MutexGuard},
};

use rust_decimal::Decimal;
use time::OffsetDateTime;

use parity_domain::overlap::PriceSnapshot;
use parity_service::{
	BoxFuture, ComparisonCacheRow, GroupMembers, GroupStore, MergeOutcome, ServiceError,
	ServiceResult,
};

#[derive(Clone, Debug)]
struct StoreRow {
	chain: String,
	is_active: bool,
	needs_rescraping: bool,
}

#[derive(Clone, Debug)]
struct GroupRow {
	chain: String,
	anchor_store_id: Option<i64>,
	is_active: bool,
}

#[derive(Clone, Debug)]
struct PriceRow {
	price_id: i64,
	product_id: i64,
	store_id: i64,
	amount: Decimal,
	scraped_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct MemoryState {
	stores: BTreeMap<i64, StoreRow>,
	groups: BTreeMap<i64, GroupRow>,
	/// Store id to group id.
	memberships: BTreeMap<i64, i64>,
	prices: Vec<PriceRow>,
	caches: HashMap<String, Vec<ComparisonCacheRow>>,
	next_group_id: i64,
	next_price_id: i64,
	failing_groups: HashSet<i64>,
	failing_stores: HashSet<i64>,
}
impl MemoryState {
	fn members_of(&self, group_id: i64) -> Vec<i64> {
		self.memberships
			.iter()
			.filter(|&(_, &member_group)| member_group == group_id)
			.map(|(&store_id, _)| store_id)
			.collect()
	}

	fn group_members(&self, group_id: i64) -> Option<GroupMembers> {
		let group = self.groups.get(&group_id).filter(|group| group.is_active)?;

		Some(GroupMembers {
			group_id,
			chain: group.chain.clone(),
			anchor_store_id: group.anchor_store_id,
			member_ids: self.members_of(group_id),
		})
	}

	fn active_group(&self, group_id: i64) -> ServiceResult<&GroupRow> {
		if self.failing_groups.contains(&group_id) {
			return Err(ServiceError::Storage {
				message: format!("Injected failure for group {group_id}."),
			});
		}

		match self.groups.get(&group_id) {
			Some(group) if group.is_active => Ok(group),
			Some(_) =>
				Err(ServiceError::Conflict { message: format!("Group {group_id} is inactive.") }),
			None =>
				Err(ServiceError::NotFound { message: format!("Group {group_id} not found.") }),
		}
	}

	fn mutable_store(&self, store_id: i64) -> ServiceResult<()> {
		if self.failing_stores.contains(&store_id) {
			return Err(ServiceError::Storage {
				message: format!("Injected failure for store {store_id}."),
			});
		}

		Ok(())
	}

	fn create_singleton(&mut self, chain: &str, store_id: i64) -> i64 {
		self.next_group_id += 1;

		let group_id = self.next_group_id;

		self.groups.insert(
			group_id,
			GroupRow { chain: chain.to_string(), anchor_store_id: Some(store_id), is_active: true },
		);
		self.memberships.insert(store_id, group_id);

		group_id
	}

	fn delete_prices(&mut self, store_ids: &[i64]) -> u64 {
		let before = self.prices.len();

		self.prices.retain(|price| !store_ids.contains(&price.store_id));

		(before - self.prices.len()) as u64
	}

	fn delete_group(&mut self, group_id: i64) {
		self.groups.remove(&group_id);
	}
}

#[derive(Debug, Default)]
pub struct MemoryGroupStore {
	state: Mutex<MemoryState>,
}
impl MemoryGroupStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_store(&self, store_id: i64, chain: &str) {
		self.lock().stores.insert(
			store_id,
			StoreRow { chain: chain.to_string(), is_active: true, needs_rescraping: false },
		);
	}

	pub fn deactivate_store(&self, store_id: i64) {
		if let Some(store) = self.lock().stores.get_mut(&store_id) {
			store.is_active = false;
		}
	}

	pub fn add_price(
		&self,
		store_id: i64,
		product_id: i64,
		amount: Decimal,
		scraped_at: OffsetDateTime,
	) {
		let mut state = self.lock();

		state.next_price_id += 1;

		let price_id = state.next_price_id;

		state.prices.push(PriceRow { price_id, product_id, store_id, amount, scraped_at });
	}

	/// Creates an active group holding `members`, moving them out of any previous group.
	pub fn add_group(&self, chain: &str, anchor_store_id: Option<i64>, members: &[i64]) -> i64 {
		let mut state = self.lock();

		state.next_group_id += 1;

		let group_id = state.next_group_id;

		state.groups.insert(
			group_id,
			GroupRow { chain: chain.to_string(), anchor_store_id, is_active: true },
		);

		for &store_id in members {
			state.memberships.insert(store_id, group_id);
		}

		group_id
	}

	/// Makes every mutation touching `group_id` fail without changing anything.
	pub fn fail_mutations_on(&self, group_id: i64) {
		self.lock().failing_groups.insert(group_id);
	}

	/// Makes every mutation moving `store_id` fail, whichever groups are involved.
	pub fn fail_mutations_for_store(&self, store_id: i64) {
		self.lock().failing_stores.insert(store_id);
	}

	pub fn clear_failures(&self) {
		let mut state = self.lock();

		state.failing_groups.clear();
		state.failing_stores.clear();
	}

	pub fn group(&self, group_id: i64) -> Option<GroupMembers> {
		self.lock().group_members(group_id)
	}

	pub fn group_id_of(&self, store_id: i64) -> Option<i64> {
		self.lock().memberships.get(&store_id).copied()
	}

	pub fn active_groups(&self, chain: &str) -> Vec<GroupMembers> {
		let state = self.lock();

		state
			.groups
			.iter()
			.filter(|(_, group)| group.is_active && group.chain == chain)
			.filter_map(|(&group_id, _)| state.group_members(group_id))
			.collect()
	}

	pub fn needs_rescraping(&self, store_id: i64) -> bool {
		self.lock().stores.get(&store_id).is_some_and(|store| store.needs_rescraping)
	}

	pub fn price_count(&self, store_id: i64) -> usize {
		self.lock().prices.iter().filter(|price| price.store_id == store_id).count()
	}

	pub fn cache_rows(&self, cache_kind: &str) -> Vec<ComparisonCacheRow> {
		self.lock().caches.get(cache_kind).cloned().unwrap_or_default()
	}

	/// Checks the structural invariants of the stored grouping.
	///
	/// Every membership points at an active group, every active group has members, anchors are
	/// members, and every active store belongs to exactly one group.
	pub fn check_invariants(&self) -> Result<(), String> {
		let state = self.lock();

		for (&store_id, &group_id) in &state.memberships {
			match state.groups.get(&group_id) {
				Some(group) if group.is_active => {},
				_ => return Err(format!("store {store_id} points at inactive group {group_id}")),
			}
		}

		for (&group_id, group) in state.groups.iter().filter(|(_, group)| group.is_active) {
			let members = state.members_of(group_id);

			if members.is_empty() {
				return Err(format!("active group {group_id} has no members"));
			}

			match group.anchor_store_id {
				Some(anchor) if members.contains(&anchor) => {},
				anchor => {
					return Err(format!("group {group_id} anchor {anchor:?} is not a member"));
				},
			}

			for store_id in &members {
				let same_chain =
					state.stores.get(store_id).is_none_or(|store| store.chain == group.chain);

				if !same_chain {
					return Err(format!("store {store_id} sits in group {group_id} of another chain"));
				}
			}
		}

		for (&store_id, store) in &state.stores {
			if store.is_active && !state.memberships.contains_key(&store_id) {
				return Err(format!("active store {store_id} has no group"));
			}
		}

		Ok(())
	}

	fn lock(&self) -> MutexGuard<'_, MemoryState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn snapshots_now(
		&self,
		store_ids: &[i64],
		since: Option<OffsetDateTime>,
	) -> HashMap<i64, PriceSnapshot> {
		let state = self.lock();
		let mut newest: HashMap<(i64, i64), &PriceRow> = HashMap::new();

		for price in &state.prices {
			if !store_ids.contains(&price.store_id) {
				continue;
			}
			if since.is_some_and(|since| price.scraped_at < since) {
				continue;
			}

			let key = (price.store_id, price.product_id);
			let replace = newest.get(&key).is_none_or(|current| {
				(price.scraped_at, price.price_id) > (current.scraped_at, current.price_id)
			});

			if replace {
				newest.insert(key, price);
			}
		}

		let mut snapshots: HashMap<i64, PriceSnapshot> = HashMap::new();

		for ((store_id, product_id), price) in newest {
			snapshots.entry(store_id).or_default().insert(product_id, price.amount);
		}

		snapshots
	}

	fn ensure_singletons_now(&self, chain: &str) -> Vec<i64> {
		let mut state = self.lock();
		let unassigned = state
			.stores
			.iter()
			.filter(|(store_id, store)| {
				store.is_active && store.chain == chain && !state.memberships.contains_key(store_id)
			})
			.map(|(&store_id, _)| store_id)
			.collect::<Vec<_>>();

		unassigned.into_iter().map(|store_id| state.create_singleton(chain, store_id)).collect()
	}

	fn set_anchor_now(&self, group_id: i64, store_id: i64) -> ServiceResult<()> {
		let mut state = self.lock();

		state.active_group(group_id)?;
		state.mutable_store(store_id)?;

		if state.memberships.get(&store_id) != Some(&group_id) {
			return Err(ServiceError::Conflict {
				message: format!("Store {store_id} is not a member of group {group_id}."),
			});
		}
		if let Some(group) = state.groups.get_mut(&group_id) {
			group.anchor_store_id = Some(store_id);
		}

		Ok(())
	}

	fn eject_now(&self, store_id: i64, group_id: i64) -> ServiceResult<i64> {
		let mut state = self.lock();

		state.mutable_store(store_id)?;

		let group = state.active_group(group_id)?;
		let chain = group.chain.clone();

		if group.anchor_store_id == Some(store_id) {
			return Err(ServiceError::Conflict {
				message: format!("Store {store_id} anchors group {group_id} and cannot be ejected."),
			});
		}
		if state.memberships.get(&store_id) != Some(&group_id) {
			return Err(ServiceError::Conflict {
				message: format!("Store {store_id} is not a member of group {group_id}."),
			});
		}

		state.memberships.remove(&store_id);

		Ok(state.create_singleton(&chain, store_id))
	}

	fn rehome_now(
		&self,
		store_id: i64,
		singleton_group_id: i64,
		target_group_id: i64,
	) -> ServiceResult<()> {
		let mut state = self.lock();

		state.mutable_store(store_id)?;

		let singleton_chain = state.active_group(singleton_group_id)?.chain.clone();
		let target_chain = state.active_group(target_group_id)?.chain.clone();

		if singleton_chain != target_chain {
			return Err(ServiceError::Conflict {
				message: format!(
					"Groups {singleton_group_id} and {target_group_id} belong to different chains."
				),
			});
		}
		if state.memberships.get(&store_id) != Some(&singleton_group_id) {
			return Err(ServiceError::Conflict {
				message: format!("Store {store_id} is not a member of group {singleton_group_id}."),
			});
		}

		state.memberships.insert(store_id, target_group_id);
		state.delete_group(singleton_group_id);

		Ok(())
	}

	fn merge_now(
		&self,
		survivor_group_id: i64,
		absorbed_group_id: i64,
		prune_prices: bool,
	) -> ServiceResult<MergeOutcome> {
		if survivor_group_id == absorbed_group_id {
			return Err(ServiceError::InvalidRequest {
				message: format!("Cannot merge group {survivor_group_id} into itself."),
			});
		}

		let mut state = self.lock();
		let survivor_chain = state.active_group(survivor_group_id)?.chain.clone();
		let absorbed_chain = state.active_group(absorbed_group_id)?.chain.clone();

		if survivor_chain != absorbed_chain {
			return Err(ServiceError::Conflict {
				message: format!(
					"Groups {survivor_group_id} and {absorbed_group_id} belong to different chains."
				),
			});
		}

		let moved_store_ids = state.members_of(absorbed_group_id);

		for store_id in &moved_store_ids {
			state.memberships.insert(*store_id, survivor_group_id);
		}

		let pruned_prices = if prune_prices { state.delete_prices(&moved_store_ids) } else { 0 };

		state.delete_group(absorbed_group_id);

		Ok(MergeOutcome { survivor_group_id, absorbed_group_id, moved_store_ids, pruned_prices })
	}

	fn dissolve_now(&self, group_id: i64) -> ServiceResult<u64> {
		let mut state = self.lock();

		state.active_group(group_id)?;

		let members = state.members_of(group_id);

		for store_id in &members {
			state.memberships.remove(store_id);
		}
		if let Some(group) = state.groups.get_mut(&group_id) {
			group.is_active = false;
			group.anchor_store_id = None;
		}

		Ok(members.len() as u64)
	}
}

impl GroupStore for MemoryGroupStore {
	fn list_chains(&self) -> BoxFuture<'_, ServiceResult<Vec<String>>> {
		let state = self.lock();
		let mut chains = state
			.stores
			.values()
			.filter(|store| store.is_active)
			.map(|store| store.chain.clone())
			.collect::<Vec<_>>();

		chains.sort();
		chains.dedup();

		Box::pin(future::ready(Ok(chains)))
	}

	fn latest_scrape_overall(&self) -> BoxFuture<'_, ServiceResult<Option<OffsetDateTime>>> {
		let latest = self.lock().prices.iter().map(|price| price.scraped_at).max();

		Box::pin(future::ready(Ok(latest)))
	}

	fn latest_scrapes<'a>(
		&'a self,
		store_ids: &'a [i64],
	) -> BoxFuture<'a, ServiceResult<HashMap<i64, OffsetDateTime>>> {
		let state = self.lock();
		let mut latest: HashMap<i64, OffsetDateTime> = HashMap::new();

		for price in state.prices.iter().filter(|price| store_ids.contains(&price.store_id)) {
			let entry = latest.entry(price.store_id).or_insert(price.scraped_at);

			if price.scraped_at > *entry {
				*entry = price.scraped_at;
			}
		}

		Box::pin(future::ready(Ok(latest)))
	}

	fn snapshots<'a>(
		&'a self,
		store_ids: &'a [i64],
		since: Option<OffsetDateTime>,
	) -> BoxFuture<'a, ServiceResult<HashMap<i64, PriceSnapshot>>> {
		Box::pin(future::ready(Ok(self.snapshots_now(store_ids, since))))
	}

	fn delete_store_prices<'a>(
		&'a self,
		store_ids: &'a [i64],
	) -> BoxFuture<'a, ServiceResult<u64>> {
		let deleted = self.lock().delete_prices(store_ids);

		Box::pin(future::ready(Ok(deleted)))
	}

	fn flag_for_rescrape(&self, store_id: i64) -> BoxFuture<'_, ServiceResult<()>> {
		let result = match self.lock().stores.get_mut(&store_id) {
			Some(store) => {
				store.needs_rescraping = true;

				Ok(())
			},
			None => Err(ServiceError::NotFound { message: format!("Store {store_id} not found.") }),
		};

		Box::pin(future::ready(result))
	}

	fn ensure_singletons<'a>(&'a self, chain: &'a str) -> BoxFuture<'a, ServiceResult<Vec<i64>>> {
		Box::pin(future::ready(Ok(self.ensure_singletons_now(chain))))
	}

	fn list_groups<'a>(
		&'a self,
		chain: &'a str,
	) -> BoxFuture<'a, ServiceResult<Vec<GroupMembers>>> {
		Box::pin(future::ready(Ok(self.active_groups(chain))))
	}

	fn group_of_store(
		&self,
		store_id: i64,
	) -> BoxFuture<'_, ServiceResult<Option<GroupMembers>>> {
		let state = self.lock();
		let group =
			state.memberships.get(&store_id).and_then(|&group_id| state.group_members(group_id));

		Box::pin(future::ready(Ok(group)))
	}

	fn set_anchor(&self, group_id: i64, store_id: i64) -> BoxFuture<'_, ServiceResult<()>> {
		Box::pin(future::ready(self.set_anchor_now(group_id, store_id)))
	}

	fn eject(&self, store_id: i64, group_id: i64) -> BoxFuture<'_, ServiceResult<i64>> {
		Box::pin(future::ready(self.eject_now(store_id, group_id)))
	}

	fn rehome(
		&self,
		store_id: i64,
		singleton_group_id: i64,
		target_group_id: i64,
	) -> BoxFuture<'_, ServiceResult<()>> {
		Box::pin(future::ready(self.rehome_now(store_id, singleton_group_id, target_group_id)))
	}

	fn merge_groups(
		&self,
		survivor_group_id: i64,
		absorbed_group_id: i64,
		prune_prices: bool,
	) -> BoxFuture<'_, ServiceResult<MergeOutcome>> {
		Box::pin(future::ready(self.merge_now(survivor_group_id, absorbed_group_id, prune_prices)))
	}

	fn dissolve(&self, group_id: i64) -> BoxFuture<'_, ServiceResult<u64>> {
		Box::pin(future::ready(self.dissolve_now(group_id)))
	}

	fn load_cache<'a>(
		&'a self,
		cache_kind: &'a str,
	) -> BoxFuture<'a, ServiceResult<Vec<ComparisonCacheRow>>> {
		Box::pin(future::ready(Ok(self.cache_rows(cache_kind))))
	}

	fn save_cache<'a>(
		&'a self,
		cache_kind: &'a str,
		rows: &'a [ComparisonCacheRow],
	) -> BoxFuture<'a, ServiceResult<()>> {
		self.lock().caches.insert(cache_kind.to_string(), rows.to_vec());

		Box::pin(future::ready(Ok(())))
	}
}

#[cfg(test)]
mod tests {
	use rust_decimal::Decimal;
	use time::macros::datetime;

	use crate::MemoryGroupStore;
	use parity_service::{GroupStore, ServiceError};

	#[tokio::test]
	async fn snapshots_keep_the_newest_price_per_product() {
		let store = MemoryGroupStore::new();

		store.add_store(1, "acme");
		store.add_price(1, 10, Decimal::new(100, 2), datetime!(2026-03-01 00:00 UTC));
		store.add_price(1, 10, Decimal::new(120, 2), datetime!(2026-03-02 00:00 UTC));
		store.add_price(1, 11, Decimal::new(50, 2), datetime!(2026-02-01 00:00 UTC));

		let all = store.snapshots(&[1], None).await.expect("Snapshot failed.");

		assert_eq!(all[&1].get(&10), Some(&Decimal::new(120, 2)));
		assert_eq!(all[&1].len(), 2);

		let recent = store
			.snapshots(&[1], Some(datetime!(2026-03-01 00:00 UTC)))
			.await
			.expect("Snapshot failed.");

		assert_eq!(recent[&1].len(), 1);
	}

	#[tokio::test]
	async fn anchors_cannot_be_ejected() {
		let store = MemoryGroupStore::new();

		store.add_store(1, "acme");
		store.add_store(2, "acme");

		let group_id = store.add_group("acme", Some(1), &[1, 2]);
		let err = store.eject(1, group_id).await.expect_err("Ejecting the anchor must fail.");

		assert!(matches!(err, ServiceError::Conflict { .. }));
		assert_eq!(store.group_id_of(1), Some(group_id));
	}

	#[tokio::test]
	async fn injected_failures_leave_state_untouched() {
		let store = MemoryGroupStore::new();

		store.add_store(1, "acme");
		store.add_store(2, "acme");

		let left = store.add_group("acme", Some(1), &[1]);
		let right = store.add_group("acme", Some(2), &[2]);

		store.fail_mutations_on(right);

		assert!(store.merge_groups(left, right, true).await.is_err());
		assert_eq!(store.group_id_of(2), Some(right));
		assert!(store.check_invariants().is_ok());
	}

	#[tokio::test]
	async fn store_failures_only_block_that_store() {
		let store = MemoryGroupStore::new();

		for store_id in 1..=3 {
			store.add_store(store_id, "acme");
		}

		let group_id = store.add_group("acme", Some(1), &[1, 2, 3]);

		store.fail_mutations_for_store(3);

		let singleton = store.eject(2, group_id).await.expect("Ejecting store 2 must succeed.");
		let err = store.eject(3, group_id).await.expect_err("Ejecting store 3 must fail.");

		assert!(matches!(err, ServiceError::Storage { .. }));
		assert_eq!(store.group_id_of(2), Some(singleton));
		assert_eq!(store.group_id_of(3), Some(group_id));
		assert!(store.check_invariants().is_ok());
	}
}
