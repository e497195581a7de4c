use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use parity_config::{Config, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(section: &[&str], key: &str, replacement: Value) -> String {
	let mut value: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let mut table = value.as_table_mut().expect("Template config must be a table.");

	for name in section {
		table = table
			.get_mut(*name)
			.and_then(Value::as_table_mut)
			.unwrap_or_else(|| panic!("Template config must include [{name}]."));
	}

	table.insert(key.to_string(), replacement);

	toml::to_string(&value).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("parity_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> parity_config::Result<Config> {
	let path = write_temp_config(payload);
	let result = parity_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn assert_validation_error(payload: String, expected: &str) {
	let err = load_payload(payload).expect_err("Expected validation error.");

	assert!(matches!(err, Error::Invalid { .. }), "Unexpected error kind: {err:?}");

	let message = err.to_string();

	assert!(message.contains(expected), "Unexpected error message: {message}");
}

#[test]
fn sample_config_loads() {
	let cfg = load_payload(SAMPLE_CONFIG_TEMPLATE_TOML.to_string())
		.expect("Sample config must be valid.");

	assert_eq!(cfg.grouping.chains, vec!["acme".to_string()]);
	assert_eq!(cfg.grouping.freshness.mode, "relative");
	assert_eq!(cfg.grouping.merge.candidate_cap, 100);
	assert_eq!(cfg.grouping.merge.sample_size, 50);
	assert!(cfg.grouping.merge.sample_seed.is_none());
}

#[test]
fn merge_defaults_apply_when_omitted() {
	let mut value: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let merge = value
		.get_mut("grouping")
		.and_then(|grouping| grouping.get_mut("merge"))
		.and_then(Value::as_table_mut)
		.expect("Template config must include [grouping.merge].");

	for key in ["candidate_cap", "sample_size", "max_passes", "require_fresh_anchor"] {
		merge.remove(key);
	}

	let cfg = load_payload(toml::to_string(&value).expect("Failed to render config."))
		.expect("Config with defaults must be valid.");

	assert_eq!(cfg.grouping.merge.candidate_cap, 100);
	assert_eq!(cfg.grouping.merge.sample_size, 50);
	assert_eq!(cfg.grouping.merge.max_passes, 32);
	assert!(cfg.grouping.merge.require_fresh_anchor);
}

#[test]
fn freshness_mode_is_normalized() {
	let payload =
		sample_toml_with(&["grouping", "freshness"], "mode", Value::String(" Absolute ".into()));
	let cfg = load_payload(payload).expect("Mixed-case mode must be accepted.");

	assert_eq!(cfg.grouping.freshness.mode, "absolute");
}

#[test]
fn freshness_mode_must_be_known() {
	let payload =
		sample_toml_with(&["grouping", "freshness"], "mode", Value::String("sliding".into()));

	assert_validation_error(payload, "grouping.freshness.mode must be one of absolute or relative.");
}

#[test]
fn match_threshold_must_be_in_range() {
	for threshold in [0.0, -0.5, 1.01] {
		let payload = sample_toml_with(&["grouping"], "match_threshold", Value::Float(threshold));

		assert_validation_error(
			payload,
			"grouping.match_threshold must be greater than 0.0 and at most 1.0.",
		);
	}
}

#[test]
fn match_threshold_of_one_is_allowed() {
	let payload = sample_toml_with(&["grouping"], "match_threshold", Value::Float(1.0));

	load_payload(payload).expect("Exact matching must be allowed.");
}

#[test]
fn window_days_must_be_positive() {
	let payload = sample_toml_with(&["grouping", "freshness"], "window_days", Value::Integer(0));

	assert_validation_error(payload, "grouping.freshness.window_days must be greater than zero.");
}

#[test]
fn sample_size_must_not_exceed_cap() {
	let payload = sample_toml_with(&["grouping", "merge"], "sample_size", Value::Integer(101));

	assert_validation_error(
		payload,
		"grouping.merge.sample_size must not exceed grouping.merge.candidate_cap.",
	);
}

#[test]
fn negative_cooldown_is_rejected() {
	let payload = sample_toml_with(&["grouping", "health"], "cooldown_hours", Value::Integer(-1));

	assert_validation_error(payload, "grouping.health.cooldown_hours must be zero or greater.");
}

#[test]
fn duplicate_chains_are_rejected() {
	let chains = Value::Array(vec![Value::String("acme".into()), Value::String(" acme".into())]);
	let payload = sample_toml_with(&["grouping"], "chains", chains);

	assert_validation_error(payload, "grouping.chains contains duplicate chain \"acme\".");
}

#[test]
fn missing_file_reports_path() {
	let path = env::temp_dir().join("parity_config_test_does_not_exist.toml");
	let err = parity_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::Read { .. }), "Unexpected error kind: {err:?}");
}

#[test]
fn validation_errors_carry_the_key() {
	let payload = sample_toml_with(&["worker"], "interval_seconds", Value::Integer(0));
	let err = load_payload(payload).expect_err("Expected validation error.");

	assert!(
		matches!(err, Error::Invalid { key: "worker.interval_seconds", .. }),
		"Unexpected error: {err:?}"
	);
}

#[test]
fn window_days_has_an_upper_bound() {
	let payload =
		sample_toml_with(&["grouping", "freshness"], "window_days", Value::Integer(10_000_000));

	assert_validation_error(payload, "grouping.freshness.window_days must be at most 3650.");

	let payload = sample_toml_with(&["grouping", "freshness"], "window_days", Value::Integer(3_650));

	load_payload(payload).expect("Ten years must be accepted.");
}

#[test]
fn cooldowns_have_an_upper_bound() {
	let payload = sample_toml_with(
		&["grouping", "health"],
		"cooldown_hours",
		Value::Integer(1_000_000_000),
	);

	assert_validation_error(payload, "grouping.health.cooldown_hours must be at most 87600.");

	let payload =
		sample_toml_with(&["grouping", "merge"], "cooldown_hours", Value::Integer(87_601));

	assert_validation_error(payload, "grouping.merge.cooldown_hours must be at most 87600.");
}
