//! Approximate equality of two stores' price snapshots.
//!
//! Two snapshots overlap when, among the products both stores price, at least `threshold` of
//! them carry the identical amount. Products priced by only one store never count for or
//! against the match. An empty intersection is inconclusive and therefore a non-match.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

/// Product id to the store's current amount for it. Ordered so every walk over a snapshot is
/// deterministic.
pub type PriceSnapshot = BTreeMap<i64, Decimal>;

/// Smallest number of identical prices out of `common` that satisfies `threshold`.
///
/// Equal to `ceil(common * threshold)`, settled against the ratio test itself so rounding in the
/// float product can never make the early exit disagree with the final ratio check.
pub fn required_matches(common: usize, threshold: f64) -> usize {
	let total = common as f64;
	let mut required = (total * threshold).ceil().clamp(0.0, total + 1.0) as usize;

	while required > 0 && ratio(required - 1, common) >= threshold {
		required -= 1;
	}
	while required <= common && ratio(required, common) < threshold {
		required += 1;
	}

	required
}

pub fn true_overlap(a: &PriceSnapshot, b: &PriceSnapshot, threshold: f64) -> bool {
	true_overlap_by(a, b, threshold, |left, right| left == right)
}

/// [`true_overlap`] with a caller-supplied price equality.
///
/// Stops as soon as the remaining unchecked products can no longer lift the match count to
/// [`required_matches`].
pub fn true_overlap_by<F>(a: &PriceSnapshot, b: &PriceSnapshot, threshold: f64, mut same: F) -> bool
where
	F: FnMut(&Decimal, &Decimal) -> bool,
{
	if a.is_empty() || b.is_empty() {
		return false;
	}

	let common = common_products(a, b);

	if common.is_empty() {
		return false;
	}

	let total = common.len();
	let required = required_matches(total, threshold);
	let mut matched = 0_usize;

	for (checked, &(left, right)) in common.iter().enumerate() {
		if same(left, right) {
			matched += 1;
		}

		let remaining = total - (checked + 1);

		if matched + remaining < required {
			return false;
		}
	}

	ratio(matched, total) >= threshold
}

/// Reference implementation that always compares every common product.
pub fn exhaustive_overlap(a: &PriceSnapshot, b: &PriceSnapshot, threshold: f64) -> bool {
	match overlap_ratio(a, b) {
		Some(value) => value >= threshold,
		None => false,
	}
}

/// Fraction of common products priced identically, or `None` when nothing is comparable.
pub fn overlap_ratio(a: &PriceSnapshot, b: &PriceSnapshot) -> Option<f64> {
	let common = common_products(a, b);

	if common.is_empty() {
		return None;
	}

	let matched = common.iter().filter(|(left, right)| left == right).count();

	Some(ratio(matched, common.len()))
}

fn common_products<'a>(
	a: &'a PriceSnapshot,
	b: &'a PriceSnapshot,
) -> Vec<(&'a Decimal, &'a Decimal)> {
	a.iter().filter_map(|(product_id, left)| b.get(product_id).map(|right| (left, right))).collect()
}

fn ratio(matched: usize, total: usize) -> f64 {
	matched as f64 / total as f64
}
