mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Freshness, Grouping, HealthCheck, Merge, Postgres, Service, Storage, Worker,
};

use std::{collections::HashSet, fs, path::Path};

/// Longest accepted freshness window, in days.
pub const MAX_WINDOW_DAYS: i64 = 3_650;
/// Longest accepted cooldown, in hours.
pub const MAX_COOLDOWN_HOURS: i64 = 87_600;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::Read { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::Parse { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::invalid("service.log_level", "must be non-empty."));
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::invalid("storage.postgres.dsn", "must be non-empty."));
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::invalid("storage.postgres.pool_max_conns", "must be greater than zero."));
	}

	let mut seen = HashSet::new();

	for chain in &cfg.grouping.chains {
		if chain.is_empty() {
			return Err(Error::invalid("grouping.chains", "entries must be non-empty."));
		}
		if !seen.insert(chain.as_str()) {
			return Err(Error::invalid(
				"grouping.chains",
				format!("contains duplicate chain {chain:?}."),
			));
		}
	}

	let threshold = cfg.grouping.match_threshold;

	if !threshold.is_finite() {
		return Err(Error::invalid("grouping.match_threshold", "must be a finite number."));
	}
	if threshold <= 0.0 || threshold > 1.0 {
		return Err(Error::invalid(
			"grouping.match_threshold",
			"must be greater than 0.0 and at most 1.0.",
		));
	}
	if !matches!(cfg.grouping.freshness.mode.as_str(), "absolute" | "relative") {
		return Err(Error::invalid(
			"grouping.freshness.mode",
			"must be one of absolute or relative.",
		));
	}
	if cfg.grouping.freshness.window_days <= 0 {
		return Err(Error::invalid("grouping.freshness.window_days", "must be greater than zero."));
	}
	if cfg.grouping.freshness.window_days > MAX_WINDOW_DAYS {
		return Err(Error::invalid(
			"grouping.freshness.window_days",
			format!("must be at most {MAX_WINDOW_DAYS}."),
		));
	}
	if cfg.grouping.health.cooldown_hours < 0 {
		return Err(Error::invalid("grouping.health.cooldown_hours", "must be zero or greater."));
	}
	if cfg.grouping.health.cooldown_hours > MAX_COOLDOWN_HOURS {
		return Err(Error::invalid(
			"grouping.health.cooldown_hours",
			format!("must be at most {MAX_COOLDOWN_HOURS}."),
		));
	}

	let merge = &cfg.grouping.merge;

	if merge.cooldown_hours < 0 {
		return Err(Error::invalid("grouping.merge.cooldown_hours", "must be zero or greater."));
	}
	if merge.cooldown_hours > MAX_COOLDOWN_HOURS {
		return Err(Error::invalid(
			"grouping.merge.cooldown_hours",
			format!("must be at most {MAX_COOLDOWN_HOURS}."),
		));
	}
	if merge.candidate_cap == 0 {
		return Err(Error::invalid("grouping.merge.candidate_cap", "must be greater than zero."));
	}
	if merge.sample_size == 0 {
		return Err(Error::invalid("grouping.merge.sample_size", "must be greater than zero."));
	}
	if merge.sample_size > merge.candidate_cap {
		return Err(Error::invalid(
			"grouping.merge.sample_size",
			"must not exceed grouping.merge.candidate_cap.",
		));
	}
	if merge.max_passes == 0 {
		return Err(Error::invalid("grouping.merge.max_passes", "must be greater than zero."));
	}
	if cfg.worker.interval_seconds == 0 {
		return Err(Error::invalid("worker.interval_seconds", "must be greater than zero."));
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for chain in &mut cfg.grouping.chains {
		*chain = chain.trim().to_string();
	}

	cfg.grouping.freshness.mode = cfg.grouping.freshness.mode.trim().to_ascii_lowercase();
}
