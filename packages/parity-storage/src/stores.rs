use sqlx::PgConnection;

use crate::{Error, Result, models::Store};

pub async fn upsert_store(
	executor: &mut PgConnection,
	store_id: i64,
	chain: &str,
	name: &str,
	is_active: bool,
) -> Result<Store> {
	let chain = chain.trim();

	if chain.is_empty() {
		return Err(Error::InvalidArgument("store chain must not be empty".to_string()));
	}

	let row = sqlx::query_as::<_, Store>(
		"\
INSERT INTO stores (store_id, chain, name, is_active)
VALUES ($1, $2, $3, $4)
ON CONFLICT (store_id) DO UPDATE
SET
	chain = EXCLUDED.chain,
	name = EXCLUDED.name,
	is_active = EXCLUDED.is_active,
	updated_at = now()
RETURNING
	store_id,
	chain,
	name,
	is_active,
	needs_rescraping,
	created_at,
	updated_at",
	)
	.bind(store_id)
	.bind(chain)
	.bind(name)
	.bind(is_active)
	.fetch_one(&mut *executor)
	.await?;

	Ok(row)
}

pub async fn list_active_chains(executor: &mut PgConnection) -> Result<Vec<String>> {
	let chains = sqlx::query_scalar::<_, String>(
		"SELECT DISTINCT chain FROM stores WHERE is_active ORDER BY chain",
	)
	.fetch_all(&mut *executor)
	.await?;

	Ok(chains)
}

/// Active stores of `chain` that do not belong to any group yet.
pub async fn list_unassigned_stores(executor: &mut PgConnection, chain: &str) -> Result<Vec<i64>> {
	let ids = sqlx::query_scalar::<_, i64>(
		"\
SELECT s.store_id
FROM stores s
LEFT JOIN store_group_memberships m ON m.store_id = s.store_id
WHERE s.chain = $1
	AND s.is_active
	AND m.store_id IS NULL
ORDER BY s.store_id",
	)
	.bind(chain)
	.fetch_all(&mut *executor)
	.await?;

	Ok(ids)
}

pub async fn flag_for_rescrape(executor: &mut PgConnection, store_id: i64) -> Result<()> {
	let result = sqlx::query(
		"UPDATE stores SET needs_rescraping = true, updated_at = now() WHERE store_id = $1",
	)
	.bind(store_id)
	.execute(&mut *executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::NotFound(format!("store not found; store_id={store_id}")));
	}

	Ok(())
}
