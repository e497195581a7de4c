//! [`GroupStore`] over Postgres.

use std::collections::HashMap;

use time::OffsetDateTime;

use crate::{
	BoxFuture, ComparisonCacheRow, GroupMembers, GroupStore, MergeOutcome, ServiceError,
	ServiceResult,
};
use parity_domain::overlap::PriceSnapshot;
use parity_storage::{cache, db::Db, groups, prices, stores};

pub struct PgGroupStore {
	pub db: Db,
}
impl PgGroupStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}

	async fn ensure_singletons_tx(&self, chain: &str) -> ServiceResult<Vec<i64>> {
		let mut tx = self.db.pool.begin().await?;
		let unassigned = stores::list_unassigned_stores(&mut tx, chain).await?;
		let mut created = Vec::with_capacity(unassigned.len());

		for store_id in unassigned {
			created.push(groups::create_singleton_group(&mut tx, chain, store_id).await?);
		}

		tx.commit().await?;

		Ok(created)
	}

	async fn eject_tx(&self, store_id: i64, group_id: i64) -> ServiceResult<i64> {
		let mut tx = self.db.pool.begin().await?;
		let group = groups::lock_group(&mut tx, group_id).await?;

		if !group.is_active {
			return Err(ServiceError::Conflict {
				message: format!("Cannot eject from inactive group {group_id}."),
			});
		}
		if group.anchor_store_id == Some(store_id) {
			return Err(ServiceError::Conflict {
				message: format!("Store {store_id} anchors group {group_id} and cannot be ejected."),
			});
		}
		if groups::remove_membership(&mut tx, store_id, group_id).await? == 0 {
			return Err(ServiceError::Conflict {
				message: format!("Store {store_id} is not a member of group {group_id}."),
			});
		}

		let singleton = groups::create_singleton_group(&mut tx, &group.chain, store_id).await?;

		tx.commit().await?;

		Ok(singleton)
	}

	async fn rehome_tx(
		&self,
		store_id: i64,
		singleton_group_id: i64,
		target_group_id: i64,
	) -> ServiceResult<()> {
		let mut tx = self.db.pool.begin().await?;
		let (first, second) = lock_order(singleton_group_id, target_group_id);
		let first = groups::lock_group(&mut tx, first).await?;
		let second = groups::lock_group(&mut tx, second).await?;

		if !first.is_active || !second.is_active {
			return Err(ServiceError::Conflict {
				message: format!(
					"Cannot rehome store {store_id} between inactive groups {singleton_group_id} and {target_group_id}."
				),
			});
		}
		if first.chain != second.chain {
			return Err(ServiceError::Conflict {
				message: format!(
					"Groups {singleton_group_id} and {target_group_id} belong to different chains."
				),
			});
		}
		if groups::move_membership(&mut tx, store_id, singleton_group_id, target_group_id).await?
			== 0
		{
			return Err(ServiceError::Conflict {
				message: format!("Store {store_id} is not a member of group {singleton_group_id}."),
			});
		}

		groups::delete_group(&mut tx, singleton_group_id).await?;

		tx.commit().await?;

		Ok(())
	}

	async fn merge_tx(
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

		let mut tx = self.db.pool.begin().await?;
		let (first, second) = lock_order(survivor_group_id, absorbed_group_id);
		let first = groups::lock_group(&mut tx, first).await?;
		let second = groups::lock_group(&mut tx, second).await?;

		if !first.is_active || !second.is_active {
			return Err(ServiceError::Conflict {
				message: format!(
					"Cannot merge inactive groups {survivor_group_id} and {absorbed_group_id}."
				),
			});
		}
		if first.chain != second.chain {
			return Err(ServiceError::Conflict {
				message: format!(
					"Groups {survivor_group_id} and {absorbed_group_id} belong to different chains."
				),
			});
		}

		let moved_store_ids =
			groups::reassign_memberships(&mut tx, absorbed_group_id, survivor_group_id).await?;
		let pruned_prices = if prune_prices {
			prices::delete_prices_for_stores(&mut tx, &moved_store_ids).await?
		} else {
			0
		};

		groups::delete_group(&mut tx, absorbed_group_id).await?;

		tx.commit().await?;

		Ok(MergeOutcome { survivor_group_id, absorbed_group_id, moved_store_ids, pruned_prices })
	}

	async fn dissolve_tx(&self, group_id: i64) -> ServiceResult<u64> {
		let mut tx = self.db.pool.begin().await?;

		groups::lock_group(&mut tx, group_id).await?;

		let cleared = groups::clear_memberships(&mut tx, group_id).await?;

		groups::deactivate_group(&mut tx, group_id).await?;

		tx.commit().await?;

		Ok(cleared)
	}

	async fn snapshots_of(
		&self,
		store_ids: &[i64],
		since: Option<OffsetDateTime>,
	) -> ServiceResult<HashMap<i64, PriceSnapshot>> {
		let mut conn = self.db.pool.acquire().await?;
		let rows = prices::snapshot_rows(&mut conn, store_ids, since).await?;
		let mut snapshots: HashMap<i64, PriceSnapshot> = HashMap::new();

		for row in rows {
			snapshots.entry(row.store_id).or_default().insert(row.product_id, row.amount);
		}

		Ok(snapshots)
	}

	async fn group_of(&self, store_id: i64) -> ServiceResult<Option<GroupMembers>> {
		let mut conn = self.db.pool.acquire().await?;
		let Some(group_id) = groups::group_id_of_store(&mut conn, store_id).await? else {
			return Ok(None);
		};

		Ok(groups::get_group_members(&mut conn, group_id).await?)
	}

	async fn save_cache_tx(
		&self,
		cache_kind: &str,
		rows: &[ComparisonCacheRow],
	) -> ServiceResult<()> {
		let mut tx = self.db.pool.begin().await?;

		cache::replace_entries(&mut tx, cache_kind, rows).await?;

		tx.commit().await?;

		Ok(())
	}
}

impl GroupStore for PgGroupStore {
	fn list_chains(&self) -> BoxFuture<'_, ServiceResult<Vec<String>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			Ok(stores::list_active_chains(&mut conn).await?)
		})
	}

	fn latest_scrape_overall(&self) -> BoxFuture<'_, ServiceResult<Option<OffsetDateTime>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			Ok(prices::latest_scrape_overall(&mut conn).await?)
		})
	}

	fn latest_scrapes<'a>(
		&'a self,
		store_ids: &'a [i64],
	) -> BoxFuture<'a, ServiceResult<HashMap<i64, OffsetDateTime>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;
			let rows = prices::latest_scrapes(&mut conn, store_ids).await?;

			Ok(rows.into_iter().map(|row| (row.store_id, row.scraped_at)).collect())
		})
	}

	fn snapshots<'a>(
		&'a self,
		store_ids: &'a [i64],
		since: Option<OffsetDateTime>,
	) -> BoxFuture<'a, ServiceResult<HashMap<i64, PriceSnapshot>>> {
		Box::pin(self.snapshots_of(store_ids, since))
	}

	fn delete_store_prices<'a>(
		&'a self,
		store_ids: &'a [i64],
	) -> BoxFuture<'a, ServiceResult<u64>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			Ok(prices::delete_prices_for_stores(&mut conn, store_ids).await?)
		})
	}

	fn flag_for_rescrape(&self, store_id: i64) -> BoxFuture<'_, ServiceResult<()>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			Ok(stores::flag_for_rescrape(&mut conn, store_id).await?)
		})
	}

	fn ensure_singletons<'a>(&'a self, chain: &'a str) -> BoxFuture<'a, ServiceResult<Vec<i64>>> {
		Box::pin(self.ensure_singletons_tx(chain))
	}

	fn list_groups<'a>(
		&'a self,
		chain: &'a str,
	) -> BoxFuture<'a, ServiceResult<Vec<GroupMembers>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			Ok(groups::list_active_groups(&mut conn, chain).await?)
		})
	}

	fn group_of_store(
		&self,
		store_id: i64,
	) -> BoxFuture<'_, ServiceResult<Option<GroupMembers>>> {
		Box::pin(self.group_of(store_id))
	}

	fn set_anchor(&self, group_id: i64, store_id: i64) -> BoxFuture<'_, ServiceResult<()>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			Ok(groups::set_anchor(&mut conn, group_id, store_id).await?)
		})
	}

	fn eject(&self, store_id: i64, group_id: i64) -> BoxFuture<'_, ServiceResult<i64>> {
		Box::pin(self.eject_tx(store_id, group_id))
	}

	fn rehome(
		&self,
		store_id: i64,
		singleton_group_id: i64,
		target_group_id: i64,
	) -> BoxFuture<'_, ServiceResult<()>> {
		Box::pin(self.rehome_tx(store_id, singleton_group_id, target_group_id))
	}

	fn merge_groups(
		&self,
		survivor_group_id: i64,
		absorbed_group_id: i64,
		prune_prices: bool,
	) -> BoxFuture<'_, ServiceResult<MergeOutcome>> {
		Box::pin(self.merge_tx(survivor_group_id, absorbed_group_id, prune_prices))
	}

	fn dissolve(&self, group_id: i64) -> BoxFuture<'_, ServiceResult<u64>> {
		Box::pin(self.dissolve_tx(group_id))
	}

	fn load_cache<'a>(
		&'a self,
		cache_kind: &'a str,
	) -> BoxFuture<'a, ServiceResult<Vec<ComparisonCacheRow>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;

			Ok(cache::load_entries(&mut conn, cache_kind).await?)
		})
	}

	fn save_cache<'a>(
		&'a self,
		cache_kind: &'a str,
		rows: &'a [ComparisonCacheRow],
	) -> BoxFuture<'a, ServiceResult<()>> {
		Box::pin(self.save_cache_tx(cache_kind, rows))
	}
}

/// Group rows are always locked in ascending id order so concurrent writers cannot deadlock.
fn lock_order(a: i64, b: i64) -> (i64, i64) {
	if a <= b { (a, b) } else { (b, a) }
}
