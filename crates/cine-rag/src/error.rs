//! Error kinds surfaced by the retrieval and generation pipeline.
//!
//! Collaborators (model, embedding, index, secret store) report plain
//! `anyhow` errors; the layer that calls them decides which kind applies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Missing prompt variable, missing event field, unusable config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Index or embedding call failed or timed out.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Model call failed or timed out.
    #[error("generation error: {0}")]
    Generation(String),

    /// The model replied but the required tag was absent.
    #[error("extraction failure: {0}")]
    Extraction(String),

    /// Malformed input shape from the caller.
    #[error("validation error: {0}")]
    Validation(String),
}

pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    /// Stable name used in route responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Retrieval(_) => "RetrievalError",
            Self::Generation(_) => "GenerationError",
            Self::Extraction(_) => "ExtractionFailure",
            Self::Validation(_) => "ValidationError",
        }
    }

    /// Wrap a collaborator failure from the index or embedding service.
    pub fn retrieval(stage: &str, err: impl std::fmt::Display) -> Self {
        Self::Retrieval(format!("{}: {}", stage, err))
    }

    /// Wrap a collaborator failure from the model service.
    pub fn generation(stage: &str, err: impl std::fmt::Display) -> Self {
        Self::Generation(format!("{}: {}", stage, err))
    }

    /// Errors that must abort before any remote call is attempted.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Validation(_))
    }
}
