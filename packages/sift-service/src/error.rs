use sift_domain::{CorrelationId, Stage};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Dispatch of the {stage} stage failed: {message}")]
	Dispatch { stage: Stage, message: String },
	#[error("Correlation id {correlation_id} is already in flight.")]
	DuplicateCorrelation { correlation_id: CorrelationId },
	#[error("Search {correlation_id} was dropped before it resolved.")]
	Abandoned { correlation_id: CorrelationId },
}
