use sift_domain::{RankedResult, RetrieveReply, Stage};

use crate::saga::{SagaState, StageOutput};

/// Substitute result used when a stage times out, errors, or replies with a payload that
/// cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
	/// The only variant is the original query.
	OriginalQuery,
	/// Whatever retrieval source survived. When the whole stage fails nothing survives.
	SurvivingSource,
	/// The fused retrieval order, truncated to the final size, every score zero.
	FusedOrder,
	/// Results are returned without an answer.
	OmitAnswer,
}
impl FallbackPolicy {
	pub fn for_stage(stage: Stage) -> Self {
		match stage {
			Stage::Expand => Self::OriginalQuery,
			Stage::Retrieve => Self::SurvivingSource,
			Stage::Rank => Self::FusedOrder,
			Stage::Answer => Self::OmitAnswer,
		}
	}

	pub fn stage(self) -> Stage {
		match self {
			Self::OriginalQuery => Stage::Expand,
			Self::SurvivingSource => Stage::Retrieve,
			Self::FusedOrder => Stage::Rank,
			Self::OmitAnswer => Stage::Answer,
		}
	}

	pub(crate) fn output(self, state: &SagaState) -> StageOutput {
		match self {
			Self::OriginalQuery => StageOutput::Expanded(vec![state.query.clone()]),
			Self::SurvivingSource => StageOutput::Retrieved(RetrieveReply::default()),
			Self::FusedOrder => StageOutput::Ranked(
				state
					.retrieved
					.iter()
					.take(state.plan.final_size as usize)
					.map(|candidate| RankedResult {
						id: candidate.id.clone(),
						content: candidate.content.clone(),
						score: 0.0,
					})
					.collect(),
			),
			Self::OmitAnswer => StageOutput::Answered(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_stage_has_its_own_policy() {
		for stage in Stage::ALL {
			assert_eq!(FallbackPolicy::for_stage(stage).stage(), stage);
		}
	}
}
