//! Reciprocal Rank Fusion over independently ordered candidate lists.
//!
//! Scores are never normalized across lists. A document earns `1 / (RRF_K + rank)` from every
//! list that contains it, where `rank` is its 1-based position in that list.

use std::{
	cmp::Ordering,
	collections::{HashMap, HashSet},
};

use crate::model::{Candidate, RankedResult};

pub const RRF_K: f64 = 60.0;

#[derive(Debug)]
struct FusedEntry<'a> {
	id: &'a str,
	content: &'a str,
	score: f64,
	rank_sum: u64,
}

/// Fuses a dense list with a sparse list. Content for ids present in both comes from `dense`.
pub fn merge(dense: &[Candidate], sparse: &[Candidate], limit: usize) -> Vec<RankedResult> {
	fuse(&[dense, sparse], limit)
}

pub fn fuse(lists: &[&[Candidate]], limit: usize) -> Vec<RankedResult> {
	if limit == 0 {
		return Vec::new();
	}

	let mut by_id: HashMap<&str, FusedEntry<'_>> = HashMap::new();

	for list in lists {
		let mut seen_in_list = HashSet::new();

		for (idx, candidate) in list.iter().enumerate() {
			let id = candidate.id.as_str();

			if !seen_in_list.insert(id) {
				continue;
			}

			let rank = idx as u64 + 1;
			let contribution = reciprocal_rank(rank);

			match by_id.get_mut(id) {
				Some(existing) => {
					existing.score += contribution;
					existing.rank_sum += rank;
				},
				None => {
					by_id.insert(
						id,
						FusedEntry {
							id,
							content: candidate.content.as_str(),
							score: contribution,
							rank_sum: rank,
						},
					);
				},
			}
		}
	}

	let mut fused: Vec<FusedEntry<'_>> = by_id.into_values().collect();

	fused.sort_by(cmp_fused);

	fused
		.into_iter()
		.take(limit)
		.map(|entry| RankedResult {
			id: entry.id.to_string(),
			content: entry.content.to_string(),
			score: entry.score,
		})
		.collect()
}

pub fn reciprocal_rank(rank: u64) -> f64 {
	1.0 / (RRF_K + rank as f64)
}

fn cmp_fused(left: &FusedEntry<'_>, right: &FusedEntry<'_>) -> Ordering {
	right
		.score
		.total_cmp(&left.score)
		.then_with(|| left.rank_sum.cmp(&right.rank_sum))
		.then_with(|| left.id.cmp(right.id))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::SourceTag;

	fn candidate(id: &str, content: &str) -> Candidate {
		Candidate {
			id: id.to_string(),
			content: content.to_string(),
			score: 0.0,
			source: SourceTag::Dense,
		}
	}

	#[test]
	fn repeated_id_within_one_list_keeps_first_rank() {
		let list = vec![candidate("a", "first"), candidate("a", "second"), candidate("b", "")];
		let fused = fuse(&[&list], 10);

		assert_eq!(fused.len(), 2);
		assert_eq!(fused[0].id, "a");
		assert_eq!(fused[0].content, "first");
		assert_eq!(fused[0].score, reciprocal_rank(1));
		assert_eq!(fused[1].score, reciprocal_rank(3));
	}

	#[test]
	fn limit_zero_is_empty() {
		let list = vec![candidate("a", "")];

		assert!(merge(&list, &list, 0).is_empty());
	}
}
