use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessMode {
	/// Measured back from wall-clock now.
	Absolute,
	/// Measured back from the newest scrape anywhere, so a system-wide scraping slowdown does not
	/// fail every store at once.
	Relative,
}
impl FreshnessMode {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"absolute" => Some(Self::Absolute),
			"relative" => Some(Self::Relative),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Absolute => "absolute",
			Self::Relative => "relative",
		}
	}
}

/// Freshness cutoff fixed for the duration of one maintenance run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FreshnessGate {
	cutoff: Option<OffsetDateTime>,
}
impl FreshnessGate {
	pub fn new(
		mode: FreshnessMode,
		window: Duration,
		now: OffsetDateTime,
		latest_scrape_overall: Option<OffsetDateTime>,
	) -> Self {
		let reference = match mode {
			FreshnessMode::Absolute => Some(now),
			FreshnessMode::Relative => latest_scrape_overall,
		};

		// A window reaching past the representable range leaves nothing fresh.
		Self { cutoff: reference.and_then(|reference| reference.checked_sub(window)) }
	}

	/// Oldest scrape timestamp still considered fresh. `None` when nothing can be fresh.
	pub fn cutoff(&self) -> Option<OffsetDateTime> {
		self.cutoff
	}

	pub fn is_fresh(&self, latest_scrape: Option<OffsetDateTime>) -> bool {
		match (self.cutoff, latest_scrape) {
			(Some(cutoff), Some(latest)) => latest >= cutoff,
			_ => false,
		}
	}
}
