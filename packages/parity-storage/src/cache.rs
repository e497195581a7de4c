use sqlx::PgConnection;

use crate::{Error, Result, models::ComparisonCacheRow};

pub async fn load_entries(
	executor: &mut PgConnection,
	cache_kind: &str,
) -> Result<Vec<ComparisonCacheRow>> {
	let rows = sqlx::query_as::<_, ComparisonCacheRow>(
		"\
SELECT
	cache_kind,
	subject_key,
	outcome,
	checked_at
FROM comparison_cache
WHERE cache_kind = $1
ORDER BY subject_key",
	)
	.bind(cache_kind)
	.fetch_all(&mut *executor)
	.await?;

	Ok(rows)
}

/// Replaces every entry of `cache_kind` with `rows`. Run inside a transaction.
pub async fn replace_entries(
	executor: &mut PgConnection,
	cache_kind: &str,
	rows: &[ComparisonCacheRow],
) -> Result<()> {
	if let Some(row) = rows.iter().find(|row| row.cache_kind != cache_kind) {
		return Err(Error::InvalidArgument(format!(
			"cache row kind {:?} does not match {cache_kind:?}",
			row.cache_kind
		)));
	}

	sqlx::query("DELETE FROM comparison_cache WHERE cache_kind = $1")
		.bind(cache_kind)
		.execute(&mut *executor)
		.await?;

	if rows.is_empty() {
		return Ok(());
	}

	let keys = rows.iter().map(|row| row.subject_key.clone()).collect::<Vec<_>>();
	let outcomes = rows.iter().map(|row| row.outcome.clone()).collect::<Vec<_>>();
	let checked_at = rows.iter().map(|row| row.checked_at).collect::<Vec<_>>();

	sqlx::query(
		"\
INSERT INTO comparison_cache (cache_kind, subject_key, outcome, checked_at)
SELECT $1, entry.subject_key, entry.outcome, entry.checked_at
FROM UNNEST($2::text[], $3::text[], $4::timestamptz[])
	AS entry (subject_key, outcome, checked_at)
ON CONFLICT (cache_kind, subject_key) DO UPDATE
SET
	outcome = EXCLUDED.outcome,
	checked_at = EXCLUDED.checked_at",
	)
	.bind(cache_kind)
	.bind(&keys)
	.bind(&outcomes)
	.bind(&checked_at)
	.execute(&mut *executor)
	.await?;

	Ok(())
}
