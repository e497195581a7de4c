pub mod caches;
pub mod health;
pub mod maintain;
pub mod merge;
pub mod pg;
pub mod prices;
pub mod rehome;

mod error;

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde::Serialize;
use time::{Duration, OffsetDateTime};

pub use caches::{ComparisonCaches, HEALTH_CACHE_KIND, PAIR_CACHE_KIND};
pub use error::{ServiceError, ServiceResult};
pub use health::{AnchorResolution, HealthReport, MemberVerdict};
pub use maintain::{MaintenanceReport, MaintenanceRun};
pub use merge::{MergePassReport, MergeSummary};
use parity_config::Config;
use parity_domain::{freshness::FreshnessMode, overlap::PriceSnapshot};
pub use parity_storage::models::{ComparisonCacheRow, GroupMembers};
pub use pg::PgGroupStore;
pub use prices::StorePrices;
pub use rehome::EjectOutcome;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one committed merge transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MergeOutcome {
	pub survivor_group_id: i64,
	pub absorbed_group_id: i64,
	/// Former members of the absorbed group, sorted by store id.
	pub moved_store_ids: Vec<i64>,
	pub pruned_prices: u64,
}

/// Persistence seam of the grouping engine.
///
/// Every mutating method is one transaction: it either commits completely or leaves the stored
/// groups untouched.
pub trait GroupStore
where
	Self: Send + Sync,
{
	fn list_chains(&self) -> BoxFuture<'_, ServiceResult<Vec<String>>>;

	fn latest_scrape_overall(&self) -> BoxFuture<'_, ServiceResult<Option<OffsetDateTime>>>;

	/// Newest scrape per store. Stores without prices are absent.
	fn latest_scrapes<'a>(
		&'a self,
		store_ids: &'a [i64],
	) -> BoxFuture<'a, ServiceResult<HashMap<i64, OffsetDateTime>>>;

	/// Current price snapshot per store, batched. Stores without prices are absent.
	fn snapshots<'a>(
		&'a self,
		store_ids: &'a [i64],
		since: Option<OffsetDateTime>,
	) -> BoxFuture<'a, ServiceResult<HashMap<i64, PriceSnapshot>>>;

	fn delete_store_prices<'a>(
		&'a self,
		store_ids: &'a [i64],
	) -> BoxFuture<'a, ServiceResult<u64>>;

	fn flag_for_rescrape(&self, store_id: i64) -> BoxFuture<'_, ServiceResult<()>>;

	/// Puts every active, ungrouped store of `chain` into its own group. Returns the new group ids.
	fn ensure_singletons<'a>(&'a self, chain: &'a str) -> BoxFuture<'a, ServiceResult<Vec<i64>>>;

	/// Active groups of `chain`, ordered by group id.
	fn list_groups<'a>(
		&'a self,
		chain: &'a str,
	) -> BoxFuture<'a, ServiceResult<Vec<GroupMembers>>>;

	fn group_of_store(
		&self,
		store_id: i64,
	) -> BoxFuture<'_, ServiceResult<Option<GroupMembers>>>;

	fn set_anchor(&self, group_id: i64, store_id: i64) -> BoxFuture<'_, ServiceResult<()>>;

	/// Moves a non-anchor member out of `group_id` into a new singleton group and returns its id.
	fn eject(&self, store_id: i64, group_id: i64) -> BoxFuture<'_, ServiceResult<i64>>;

	/// Moves `store_id` from its singleton group into `target_group_id` and deletes the singleton.
	fn rehome(
		&self,
		store_id: i64,
		singleton_group_id: i64,
		target_group_id: i64,
	) -> BoxFuture<'_, ServiceResult<()>>;

	fn merge_groups(
		&self,
		survivor_group_id: i64,
		absorbed_group_id: i64,
		prune_prices: bool,
	) -> BoxFuture<'_, ServiceResult<MergeOutcome>>;

	/// Clears the memberships of a group and deactivates it. Returns the number of cleared members.
	fn dissolve(&self, group_id: i64) -> BoxFuture<'_, ServiceResult<u64>>;

	fn load_cache<'a>(
		&'a self,
		cache_kind: &'a str,
	) -> BoxFuture<'a, ServiceResult<Vec<ComparisonCacheRow>>>;

	fn save_cache<'a>(
		&'a self,
		cache_kind: &'a str,
		rows: &'a [ComparisonCacheRow],
	) -> BoxFuture<'a, ServiceResult<()>>;
}

/// Grouping knobs resolved from [`Config`] once at startup.
#[derive(Clone, Debug)]
pub struct GroupingSettings {
	pub match_threshold: f64,
	pub freshness_mode: FreshnessMode,
	pub freshness_window: Duration,
	pub restrict_snapshots: bool,
	pub prune_member_prices: bool,
	pub health_cooldown: Duration,
	pub pair_cooldown: Duration,
	pub candidate_cap: usize,
	pub sample_size: usize,
	pub max_passes: u32,
	pub require_fresh_anchor: bool,
	pub sample_seed: Option<u64>,
}
impl GroupingSettings {
	/// Rejects configs that did not pass [`parity_config::validate`], so every duration below is
	/// in range.
	pub fn from_config(cfg: &Config) -> ServiceResult<Self> {
		parity_config::validate(cfg)
			.map_err(|err| ServiceError::InvalidRequest { message: err.to_string() })?;

		let grouping = &cfg.grouping;
		let freshness_mode = FreshnessMode::parse(&grouping.freshness.mode).ok_or_else(|| {
			ServiceError::InvalidRequest {
				message: format!("Unknown freshness mode {:?}.", grouping.freshness.mode),
			}
		})?;

		Ok(Self {
			match_threshold: grouping.match_threshold,
			freshness_mode,
			freshness_window: Duration::days(grouping.freshness.window_days),
			restrict_snapshots: grouping.freshness.restrict_snapshots,
			prune_member_prices: grouping.prune_member_prices,
			health_cooldown: Duration::hours(grouping.health.cooldown_hours),
			pair_cooldown: Duration::hours(grouping.merge.cooldown_hours),
			candidate_cap: grouping.merge.candidate_cap as usize,
			sample_size: grouping.merge.sample_size as usize,
			max_passes: grouping.merge.max_passes,
			require_fresh_anchor: grouping.merge.require_fresh_anchor,
			sample_seed: grouping.merge.sample_seed,
		})
	}
}

pub struct ParityService {
	pub cfg: Config,
	pub settings: GroupingSettings,
	pub store: Arc<dyn GroupStore>,
}
impl ParityService {
	pub fn new(cfg: Config, store: Arc<dyn GroupStore>) -> ServiceResult<Self> {
		let settings = GroupingSettings::from_config(&cfg)?;

		Ok(Self { cfg, settings, store })
	}

	/// Lower bound for the prices loaded into comparison snapshots, if snapshots are restricted.
	pub(crate) fn snapshot_since(&self, run: &MaintenanceRun) -> Option<OffsetDateTime> {
		if self.settings.restrict_snapshots { run.gate.cutoff() } else { None }
	}
}
