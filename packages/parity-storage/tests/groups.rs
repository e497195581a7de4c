use rust_decimal::Decimal;
use time::macros::datetime;

use parity_config::Postgres;
use parity_storage::{Error, cache, db::Db, groups, models::ComparisonCacheRow, prices, stores};
use parity_testkit::TestDatabase;

async fn setup(test_db: &TestDatabase) -> Db {
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	db
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PARITY_PG_DSN to run."]
async fn singleton_groups_are_self_anchored() {
	let Some(base_dsn) = parity_testkit::env_dsn() else {
		eprintln!("Skipping singleton_groups_are_self_anchored; set PARITY_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = setup(&test_db).await;
	let mut conn = db.pool.acquire().await.expect("Failed to acquire connection.");

	stores::upsert_store(&mut conn, 1, "acme", "Acme Downtown", true)
		.await
		.expect("Failed to insert store.");
	stores::upsert_store(&mut conn, 2, "acme", "Acme Uptown", false)
		.await
		.expect("Failed to insert store.");

	let unassigned =
		stores::list_unassigned_stores(&mut conn, "acme").await.expect("Failed to list stores.");

	assert_eq!(unassigned, vec![1]);

	let group_id = groups::create_singleton_group(&mut conn, "acme", 1)
		.await
		.expect("Failed to create group.");
	let group = groups::get_group_members(&mut conn, group_id)
		.await
		.expect("Failed to load group.")
		.expect("Group missing.");

	assert_eq!(group.member_ids, vec![1]);
	assert_eq!(group.resolved_anchor(), Some(1));
	assert!(
		stores::list_unassigned_stores(&mut conn, "acme")
			.await
			.expect("Failed to list stores.")
			.is_empty()
	);

	let err = groups::set_anchor(&mut conn, group_id, 2).await.expect_err("Non-member anchor.");

	assert!(matches!(err, Error::Conflict(_)));

	drop(conn);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PARITY_PG_DSN to run."]
async fn snapshot_rows_keep_newest_price_per_product() {
	let Some(base_dsn) = parity_testkit::env_dsn() else {
		eprintln!("Skipping snapshot_rows_keep_newest_price_per_product; set PARITY_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = setup(&test_db).await;
	let mut conn = db.pool.acquire().await.expect("Failed to acquire connection.");

	stores::upsert_store(&mut conn, 1, "acme", "Acme Downtown", true)
		.await
		.expect("Failed to insert store.");

	for (product_id, cents, scraped_at) in [
		(10, 100, datetime!(2026-03-01 00:00 UTC)),
		(10, 120, datetime!(2026-03-02 00:00 UTC)),
		(11, 50, datetime!(2026-02-01 00:00 UTC)),
	] {
		prices::insert_price(&mut conn, product_id, 1, Decimal::new(cents, 2), scraped_at)
			.await
			.expect("Failed to insert price.");
	}

	let rows = prices::snapshot_rows(&mut conn, &[1], None).await.expect("Failed to snapshot.");

	assert_eq!(rows.len(), 2);
	assert_eq!(rows[0].product_id, 10);
	assert_eq!(rows[0].amount, Decimal::new(120, 2));

	let recent = prices::snapshot_rows(&mut conn, &[1], Some(datetime!(2026-03-01 00:00 UTC)))
		.await
		.expect("Failed to snapshot.");

	assert_eq!(recent.len(), 1);

	let latest = prices::latest_scrape_overall(&mut conn).await.expect("Failed to read latest.");

	assert_eq!(latest, Some(datetime!(2026-03-02 00:00 UTC)));
	assert_eq!(prices::delete_prices_for_stores(&mut conn, &[1]).await.expect("Delete failed."), 3);

	drop(conn);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PARITY_PG_DSN to run."]
async fn comparison_cache_is_replaced_per_kind() {
	let Some(base_dsn) = parity_testkit::env_dsn() else {
		eprintln!("Skipping comparison_cache_is_replaced_per_kind; set PARITY_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = setup(&test_db).await;
	let mut conn = db.pool.acquire().await.expect("Failed to acquire connection.");
	let checked_at = datetime!(2026-03-01 00:00 UTC);
	let row = |kind: &str, key: &str| ComparisonCacheRow {
		cache_kind: kind.to_string(),
		subject_key: key.to_string(),
		outcome: "distinct".to_string(),
		checked_at,
	};

	cache::replace_entries(&mut conn, "group_pair", &[row("group_pair", "1:2")])
		.await
		.expect("Failed to save cache.");
	cache::replace_entries(&mut conn, "store_health", &[row("store_health", "7")])
		.await
		.expect("Failed to save cache.");
	cache::replace_entries(&mut conn, "group_pair", &[row("group_pair", "3:4")])
		.await
		.expect("Failed to save cache.");

	let pairs = cache::load_entries(&mut conn, "group_pair").await.expect("Failed to load cache.");
	let health =
		cache::load_entries(&mut conn, "store_health").await.expect("Failed to load cache.");

	assert_eq!(pairs, vec![row("group_pair", "3:4")]);
	assert_eq!(health.len(), 1);

	let err = cache::replace_entries(&mut conn, "group_pair", &[row("store_health", "8")])
		.await
		.expect_err("Mismatched kind must be rejected.");

	assert!(matches!(err, Error::InvalidArgument(_)));

	drop(conn);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
