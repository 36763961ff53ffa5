use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecommendationError>;

/// Fatal conditions of a recommendation run.
///
/// Nothing in the pipeline recovers from these: a run either produces the
/// complete message stream or fails with exactly one of these errors.
#[derive(Debug, Error)]
pub enum RecommendationError {
    /// Environment is not in a state where a run can start (e.g. no trained model).
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Dataset '{table}' unavailable: {reason}")]
    DatasetUnavailable { table: String, reason: String },

    #[error("Empty candidate set: {0}")]
    EmptyCandidateSet(String),

    #[error("Recommendations not generated: {0}")]
    RecommendationsNotGenerated(String),

    #[error("Unable to load model '{model_id}': {diagnostic}")]
    ModelLoad { model_id: String, diagnostic: String },

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

impl RecommendationError {
    pub fn dataset_unavailable(table: impl Into<String>, reason: impl ToString) -> Self {
        RecommendationError::DatasetUnavailable {
            table: table.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for RecommendationError {
    fn from(err: config::ConfigError) -> Self {
        RecommendationError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for RecommendationError {
    fn from(err: serde_json::Error) -> Self {
        RecommendationError::Publish(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_unavailable_message() {
        let err = RecommendationError::dataset_unavailable("recording", "path not found");
        assert_eq!(
            err.to_string(),
            "Dataset 'recording' unavailable: path not found"
        );
    }
}
