use rand::{Rng, seq::SliceRandom};

use crate::cooldown::GroupPair;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MergeCandidate {
	pub group_id: i64,
	pub anchor_store_id: i64,
	pub member_count: usize,
}

/// Which group survives a merge and which one is absorbed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MergeDirection {
	pub survivor: MergeCandidate,
	pub absorbed: MergeCandidate,
}

/// Bounds one pass to `sample_size` candidates once more than `cap` are eligible.
///
/// The result is sorted by group id so pair enumeration stays deterministic for a given sample.
pub fn sample_candidates<R>(
	mut candidates: Vec<MergeCandidate>,
	cap: usize,
	sample_size: usize,
	rng: &mut R,
) -> Vec<MergeCandidate>
where
	R: Rng + ?Sized,
{
	if candidates.len() > cap {
		candidates.shuffle(rng);
		candidates.truncate(sample_size);
	}

	candidates.sort_by_key(|candidate| candidate.group_id);

	candidates
}

/// Every unordered pair of candidates, as index pairs into `candidates`.
pub fn candidate_pairs(candidates: &[MergeCandidate]) -> Vec<(usize, usize)> {
	let mut pairs = Vec::with_capacity(candidates.len() * candidates.len().saturating_sub(1) / 2);

	for left in 0..candidates.len() {
		for right in (left + 1)..candidates.len() {
			pairs.push((left, right));
		}
	}

	pairs
}

pub fn pair_key(a: &MergeCandidate, b: &MergeCandidate) -> GroupPair {
	GroupPair::new(a.group_id, b.group_id)
}

/// The group with fewer members is absorbed. On equal size the lower group id survives.
pub fn merge_direction(a: MergeCandidate, b: MergeCandidate) -> MergeDirection {
	let a_survives = match a.member_count.cmp(&b.member_count) {
		std::cmp::Ordering::Greater => true,
		std::cmp::Ordering::Less => false,
		std::cmp::Ordering::Equal => a.group_id < b.group_id,
	};

	if a_survives {
		MergeDirection { survivor: a, absorbed: b }
	} else {
		MergeDirection { survivor: b, absorbed: a }
	}
}

#[cfg(test)]
mod tests {
	use rand::{SeedableRng, rngs::StdRng};

	use crate::merge_plan::{MergeCandidate, candidate_pairs, merge_direction, sample_candidates};

	fn candidate(group_id: i64, member_count: usize) -> MergeCandidate {
		MergeCandidate { group_id, anchor_store_id: group_id * 10, member_count }
	}

	#[test]
	fn small_candidate_sets_are_kept_whole() {
		let mut rng = StdRng::seed_from_u64(7);
		let sampled =
			sample_candidates(vec![candidate(3, 1), candidate(1, 1), candidate(2, 1)], 3, 2, &mut rng);

		assert_eq!(sampled.iter().map(|c| c.group_id).collect::<Vec<_>>(), vec![1, 2, 3]);
	}

	#[test]
	fn large_candidate_sets_are_sampled() {
		let mut rng = StdRng::seed_from_u64(7);
		let candidates = (1..=120).map(|id| candidate(id, 1)).collect::<Vec<_>>();
		let sampled = sample_candidates(candidates, 100, 50, &mut rng);

		assert_eq!(sampled.len(), 50);
		assert!(sampled.windows(2).all(|pair| pair[0].group_id < pair[1].group_id));
	}

	#[test]
	fn sampling_is_reproducible_for_a_seed() {
		let candidates = (1..=120).map(|id| candidate(id, 1)).collect::<Vec<_>>();
		let first = sample_candidates(candidates.clone(), 100, 50, &mut StdRng::seed_from_u64(11));
		let second = sample_candidates(candidates, 100, 50, &mut StdRng::seed_from_u64(11));

		assert_eq!(first, second);
	}

	#[test]
	fn pairs_are_unique_and_unordered() {
		let candidates = (1..=4).map(|id| candidate(id, 1)).collect::<Vec<_>>();
		let pairs = candidate_pairs(&candidates);

		assert_eq!(pairs, vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
		assert!(candidate_pairs(&candidates[..1]).is_empty());
	}

	#[test]
	fn larger_group_survives() {
		let direction = merge_direction(candidate(1, 2), candidate(2, 5));

		assert_eq!(direction.survivor.group_id, 2);
		assert_eq!(direction.absorbed.group_id, 1);
	}

	#[test]
	fn lower_id_survives_a_tie() {
		let direction = merge_direction(candidate(9, 3), candidate(4, 3));

		assert_eq!(direction.survivor.group_id, 4);
		assert_eq!(direction.absorbed.group_id, 9);
	}
}
