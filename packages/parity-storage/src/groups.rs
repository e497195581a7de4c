use sqlx::PgConnection;

use crate::{
	Error, Result,
	models::{GroupMembers, StoreGroup},
};

const GROUP_MEMBERS_SELECT: &str = "\
SELECT
	g.group_id,
	g.chain,
	g.anchor_store_id,
	COALESCE(
		array_agg(m.store_id ORDER BY m.store_id) FILTER (WHERE m.store_id IS NOT NULL),
		'{}'::bigint[]
	) AS member_ids
FROM store_groups g
LEFT JOIN store_group_memberships m ON m.group_id = g.group_id";

pub async fn list_active_groups(
	executor: &mut PgConnection,
	chain: &str,
) -> Result<Vec<GroupMembers>> {
	let sql = format!(
		"{GROUP_MEMBERS_SELECT}
WHERE g.chain = $1 AND g.is_active
GROUP BY g.group_id
ORDER BY g.group_id"
	);
	let rows =
		sqlx::query_as::<_, GroupMembers>(&sql).bind(chain).fetch_all(&mut *executor).await?;

	Ok(rows)
}

pub async fn get_group_members(
	executor: &mut PgConnection,
	group_id: i64,
) -> Result<Option<GroupMembers>> {
	let sql = format!(
		"{GROUP_MEMBERS_SELECT}
WHERE g.group_id = $1 AND g.is_active
GROUP BY g.group_id"
	);
	let row = sqlx::query_as::<_, GroupMembers>(&sql)
		.bind(group_id)
		.fetch_optional(&mut *executor)
		.await?;

	Ok(row)
}

pub async fn group_id_of_store(executor: &mut PgConnection, store_id: i64) -> Result<Option<i64>> {
	let group_id = sqlx::query_scalar::<_, i64>(
		"SELECT group_id FROM store_group_memberships WHERE store_id = $1",
	)
	.bind(store_id)
	.fetch_optional(&mut *executor)
	.await?;

	Ok(group_id)
}

/// Locks the group row for the rest of the transaction.
pub async fn lock_group(executor: &mut PgConnection, group_id: i64) -> Result<StoreGroup> {
	let row = sqlx::query_as::<_, StoreGroup>(
		"\
SELECT
	group_id,
	chain,
	anchor_store_id,
	is_active,
	created_at,
	updated_at
FROM store_groups
WHERE group_id = $1
FOR UPDATE",
	)
	.bind(group_id)
	.fetch_optional(&mut *executor)
	.await?;

	row.ok_or_else(|| Error::NotFound(format!("store group not found; group_id={group_id}")))
}

/// Creates a self-anchored group holding only `store_id`. The store must not have a membership.
pub async fn create_singleton_group(
	executor: &mut PgConnection,
	chain: &str,
	store_id: i64,
) -> Result<i64> {
	let group_id = sqlx::query_scalar::<_, i64>(
		"\
INSERT INTO store_groups (chain, anchor_store_id, is_active)
VALUES ($1, $2, true)
RETURNING group_id",
	)
	.bind(chain)
	.bind(store_id)
	.fetch_one(&mut *executor)
	.await?;

	sqlx::query("INSERT INTO store_group_memberships (store_id, group_id) VALUES ($1, $2)")
		.bind(store_id)
		.bind(group_id)
		.execute(&mut *executor)
		.await?;

	Ok(group_id)
}

pub async fn set_anchor(executor: &mut PgConnection, group_id: i64, store_id: i64) -> Result<()> {
	let result = sqlx::query(
		"\
UPDATE store_groups
SET anchor_store_id = $2, updated_at = now()
WHERE group_id = $1
	AND EXISTS (
		SELECT 1
		FROM store_group_memberships
		WHERE group_id = $1 AND store_id = $2
	)",
	)
	.bind(group_id)
	.bind(store_id)
	.execute(&mut *executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::Conflict(format!(
			"anchor must be a member of its group; group_id={group_id} store_id={store_id}"
		)));
	}

	Ok(())
}

pub async fn remove_membership(
	executor: &mut PgConnection,
	store_id: i64,
	group_id: i64,
) -> Result<u64> {
	let result =
		sqlx::query("DELETE FROM store_group_memberships WHERE store_id = $1 AND group_id = $2")
			.bind(store_id)
			.bind(group_id)
			.execute(&mut *executor)
			.await?;

	Ok(result.rows_affected())
}

pub async fn move_membership(
	executor: &mut PgConnection,
	store_id: i64,
	from_group_id: i64,
	to_group_id: i64,
) -> Result<u64> {
	let result = sqlx::query(
		"\
UPDATE store_group_memberships
SET group_id = $3, joined_at = now()
WHERE store_id = $1 AND group_id = $2",
	)
	.bind(store_id)
	.bind(from_group_id)
	.bind(to_group_id)
	.execute(&mut *executor)
	.await?;

	Ok(result.rows_affected())
}

/// Moves every member of `from_group_id` into `to_group_id`. Returns the moved store ids.
pub async fn reassign_memberships(
	executor: &mut PgConnection,
	from_group_id: i64,
	to_group_id: i64,
) -> Result<Vec<i64>> {
	let mut moved = sqlx::query_scalar::<_, i64>(
		"\
UPDATE store_group_memberships
SET group_id = $2, joined_at = now()
WHERE group_id = $1
RETURNING store_id",
	)
	.bind(from_group_id)
	.bind(to_group_id)
	.fetch_all(&mut *executor)
	.await?;

	moved.sort_unstable();

	Ok(moved)
}

pub async fn clear_memberships(executor: &mut PgConnection, group_id: i64) -> Result<u64> {
	let result = sqlx::query("DELETE FROM store_group_memberships WHERE group_id = $1")
		.bind(group_id)
		.execute(&mut *executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn delete_group(executor: &mut PgConnection, group_id: i64) -> Result<u64> {
	let result = sqlx::query("DELETE FROM store_groups WHERE group_id = $1")
		.bind(group_id)
		.execute(&mut *executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn deactivate_group(executor: &mut PgConnection, group_id: i64) -> Result<u64> {
	let result = sqlx::query(
		"\
UPDATE store_groups
SET is_active = false, anchor_store_id = NULL, updated_at = now()
WHERE group_id = $1",
	)
	.bind(group_id)
	.execute(&mut *executor)
	.await?;

	Ok(result.rows_affected())
}
