use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub grouping: Grouping,
	pub worker: Worker,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Grouping {
	/// Optional. When empty, every chain with at least one active store is maintained.
	#[serde(default)]
	pub chains: Vec<String>,
	/// Fraction of commonly priced products that must carry identical prices for two stores to
	/// count as equivalent.
	pub match_threshold: f64,
	/// Delete a member's own price rows once its prices are attributable through the anchor.
	#[serde(default = "default_prune_member_prices")]
	pub prune_member_prices: bool,
	pub freshness: Freshness,
	pub health: HealthCheck,
	pub merge: Merge,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Freshness {
	/// One of "absolute" or "relative".
	pub mode: String,
	pub window_days: i64,
	/// Only compare prices scraped inside the freshness window.
	#[serde(default)]
	pub restrict_snapshots: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheck {
	pub cooldown_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Merge {
	pub cooldown_hours: i64,
	#[serde(default = "default_candidate_cap")]
	pub candidate_cap: u32,
	#[serde(default = "default_sample_size")]
	pub sample_size: u32,
	#[serde(default = "default_max_passes")]
	pub max_passes: u32,
	#[serde(default = "default_require_fresh_anchor")]
	pub require_fresh_anchor: bool,
	pub sample_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Worker {
	pub interval_seconds: u64,
}

fn default_prune_member_prices() -> bool {
	true
}

fn default_candidate_cap() -> u32 {
	100
}

fn default_sample_size() -> u32 {
	50
}

fn default_max_passes() -> u32 {
	32
}

fn default_require_fresh_anchor() -> bool {
	true
}
