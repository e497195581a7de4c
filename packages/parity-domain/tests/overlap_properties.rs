use proptest::prelude::*;
use rust_decimal::Decimal;

use parity_domain::overlap::{PriceSnapshot, exhaustive_overlap, true_overlap, true_overlap_by};

fn snapshot_strategy() -> impl Strategy<Value = PriceSnapshot> {
	// Narrow product and price ranges so random snapshots share products and prices often.
	prop::collection::btree_map(0_i64..40, 95_i64..105, 0..40).prop_map(|prices| {
		prices.into_iter().map(|(product_id, cents)| (product_id, Decimal::new(cents, 2))).collect()
	})
}

/// A snapshot plus a copy of it with a few prices changed, to exercise thresholds near the edge.
fn near_copy_strategy() -> impl Strategy<Value = (PriceSnapshot, PriceSnapshot)> {
	(snapshot_strategy(), prop::collection::vec(any::<bool>(), 40)).prop_map(|(base, flips)| {
		let copy = base
			.iter()
			.enumerate()
			.map(|(idx, (product_id, amount))| {
				let amount =
					if flips[idx % flips.len()] && idx % 3 == 0 { *amount + Decimal::ONE } else { *amount };

				(*product_id, amount)
			})
			.collect();

		(base, copy)
	})
}

fn threshold_strategy() -> impl Strategy<Value = f64> {
	prop_oneof![
		Just(0.95),
		Just(0.98),
		Just(1.0),
		Just(0.5),
		0.01_f64..=1.0,
	]
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(512))]

	#[test]
	fn overlap_is_symmetric(a in snapshot_strategy(), b in snapshot_strategy(), threshold in threshold_strategy()) {
		prop_assert_eq!(true_overlap(&a, &b, threshold), true_overlap(&b, &a, threshold));
	}

	#[test]
	fn fail_fast_agrees_with_exhaustive(a in snapshot_strategy(), b in snapshot_strategy(), threshold in threshold_strategy()) {
		prop_assert_eq!(true_overlap(&a, &b, threshold), exhaustive_overlap(&a, &b, threshold));
	}

	#[test]
	fn fail_fast_agrees_on_near_copies((a, b) in near_copy_strategy(), threshold in threshold_strategy()) {
		prop_assert_eq!(true_overlap(&a, &b, threshold), exhaustive_overlap(&a, &b, threshold));
		prop_assert_eq!(true_overlap(&a, &b, threshold), true_overlap(&b, &a, threshold));
	}

	#[test]
	fn snapshot_always_matches_itself(a in snapshot_strategy(), threshold in threshold_strategy()) {
		prop_assert_eq!(true_overlap(&a, &a, threshold), !a.is_empty());
	}

	#[test]
	fn fail_fast_never_compares_more_than_common(a in snapshot_strategy(), b in snapshot_strategy(), threshold in threshold_strategy()) {
		let common = a.keys().filter(|product_id| b.contains_key(product_id)).count();
		let mut calls = 0_usize;

		true_overlap_by(&a, &b, threshold, |left, right| {
			calls += 1;

			left == right
		});

		prop_assert!(calls <= common);
	}
}
