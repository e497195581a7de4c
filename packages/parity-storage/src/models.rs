use rust_decimal::Decimal;
use time::OffsetDateTime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Store {
	pub store_id: i64,
	pub chain: String,
	pub name: String,
	pub is_active: bool,
	pub needs_rescraping: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoreGroup {
	pub group_id: i64,
	pub chain: String,
	pub anchor_store_id: Option<i64>,
	pub is_active: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

/// An active group together with its current members, sorted by store id.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct GroupMembers {
	pub group_id: i64,
	pub chain: String,
	pub anchor_store_id: Option<i64>,
	pub member_ids: Vec<i64>,
}
impl GroupMembers {
	/// The anchor, provided it is still a member of the group.
	pub fn resolved_anchor(&self) -> Option<i64> {
		self.anchor_store_id.filter(|anchor| self.member_ids.contains(anchor))
	}

	pub fn member_count(&self) -> usize {
		self.member_ids.len()
	}
}

/// Most recent amount per (store, product).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
	pub store_id: i64,
	pub product_id: i64,
	pub amount: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LatestScrape {
	pub store_id: i64,
	pub scraped_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ComparisonCacheRow {
	pub cache_kind: String,
	pub subject_key: String,
	pub outcome: String,
	pub checked_at: OffsetDateTime,
}
