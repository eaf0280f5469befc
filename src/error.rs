use thiserror::Error;

use crate::cluster::ClusterError;

/// Rejections raised before the pipeline runs. Each message names what the caller must fix.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),

    #[error("request is missing the `grades` collection")]
    MissingGrades,

    #[error("grade batch is empty")]
    EmptyBatch,

    #[error("grades[{index}] is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("no valid scores remain after dropping {dropped} unusable value(s)")]
    NoValidScores { dropped: usize },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("clustering failed for {term}: {source}")]
    Clustering {
        term: String,
        #[source]
        source: ClusterError,
    },
}
