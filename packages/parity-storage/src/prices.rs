use rust_decimal::Decimal;
use sqlx::PgConnection;
use time::OffsetDateTime;

use crate::{
	Result,
	models::{LatestScrape, SnapshotRow},
};

pub async fn insert_price(
	executor: &mut PgConnection,
	product_id: i64,
	store_id: i64,
	amount: Decimal,
	scraped_at: OffsetDateTime,
) -> Result<i64> {
	let price_id = sqlx::query_scalar::<_, i64>(
		"\
INSERT INTO prices (product_id, store_id, amount, scraped_at)
VALUES ($1, $2, $3, $4)
RETURNING price_id",
	)
	.bind(product_id)
	.bind(store_id)
	.bind(amount)
	.bind(scraped_at)
	.fetch_one(&mut *executor)
	.await?;

	Ok(price_id)
}

pub async fn latest_scrape_overall(executor: &mut PgConnection) -> Result<Option<OffsetDateTime>> {
	let latest = sqlx::query_scalar::<_, Option<OffsetDateTime>>("SELECT max(scraped_at) FROM prices")
		.fetch_one(&mut *executor)
		.await?;

	Ok(latest)
}

/// Newest scrape timestamp per store. Stores without prices are absent from the result.
pub async fn latest_scrapes(
	executor: &mut PgConnection,
	store_ids: &[i64],
) -> Result<Vec<LatestScrape>> {
	if store_ids.is_empty() {
		return Ok(vec![]);
	}

	let rows = sqlx::query_as::<_, LatestScrape>(
		"\
SELECT store_id, max(scraped_at) AS scraped_at
FROM prices
WHERE store_id = ANY($1::bigint[])
GROUP BY store_id",
	)
	.bind(store_ids)
	.fetch_all(&mut *executor)
	.await?;

	Ok(rows)
}

/// Current amount of every product for each store in `store_ids`, in one query.
///
/// With `since`, only prices scraped at or after it are considered.
pub async fn snapshot_rows(
	executor: &mut PgConnection,
	store_ids: &[i64],
	since: Option<OffsetDateTime>,
) -> Result<Vec<SnapshotRow>> {
	if store_ids.is_empty() {
		return Ok(vec![]);
	}

	let rows = sqlx::query_as::<_, SnapshotRow>(
		"\
SELECT DISTINCT ON (store_id, product_id)
	store_id,
	product_id,
	amount
FROM prices
WHERE store_id = ANY($1::bigint[])
	AND ($2::timestamptz IS NULL OR scraped_at >= $2)
ORDER BY store_id, product_id, scraped_at DESC, price_id DESC",
	)
	.bind(store_ids)
	.bind(since)
	.fetch_all(&mut *executor)
	.await?;

	Ok(rows)
}

pub async fn delete_prices_for_stores(executor: &mut PgConnection, store_ids: &[i64]) -> Result<u64> {
	if store_ids.is_empty() {
		return Ok(0);
	}

	let result = sqlx::query("DELETE FROM prices WHERE store_id = ANY($1::bigint[])")
		.bind(store_ids)
		.execute(&mut *executor)
		.await?;

	Ok(result.rows_affected())
}
