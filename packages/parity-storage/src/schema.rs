pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_stores.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_stores.sql")),
				"tables/002_prices.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_prices.sql")),
				"tables/003_store_groups.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_store_groups.sql")),
				"tables/004_store_group_memberships.sql" => out
					.push_str(include_str!("../../../sql/tables/004_store_group_memberships.sql")),
				"tables/005_comparison_cache.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_comparison_cache.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use crate::schema::render_schema;

	#[test]
	fn includes_are_expanded() {
		let sql = render_schema();

		assert!(!sql.contains("\\ir "));

		for table in
			["stores", "prices", "store_groups", "store_group_memberships", "comparison_cache"]
		{
			assert!(
				sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
				"Missing table {table}."
			);
		}
	}
}
