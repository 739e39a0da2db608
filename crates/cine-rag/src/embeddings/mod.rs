pub mod cached;
pub mod remote;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use cached::CachedEmbeddings;
pub use remote::RemoteEmbeddings;

/// What the embedding will be used for. Cohere models embed queries and
/// documents differently; Titan ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    SearchDocument,
    SearchQuery,
    Classification,
    Clustering,
}

impl InputType {
    /// Unknown values fall back to `search_query` instead of failing.
    pub fn parse(value: &str) -> Self {
        match value {
            "search_document" => Self::SearchDocument,
            "search_query" => Self::SearchQuery,
            "classification" => Self::Classification,
            "clustering" => Self::Clustering,
            other => {
                tracing::debug!(input_type = other, "Unknown input_type, using search_query");
                Self::SearchQuery
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchDocument => "search_document",
            Self::SearchQuery => "search_query",
            Self::Classification => "classification",
            Self::Clustering => "clustering",
        }
    }
}

/// Embedding model families with their request/response shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingModel {
    Cohere,
    Titan,
}

impl EmbeddingModel {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "cohere" => Ok(Self::Cohere),
            "titan" => Ok(Self::Titan),
            other => Err(anyhow!("Embedding model '{}' not recognized, use titan or cohere", other)),
        }
    }

    pub fn model_id(&self) -> &'static str {
        match self {
            Self::Cohere => "cohere.embed-english-v3",
            Self::Titan => "amazon.titan-embed-text-v1",
        }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cohere => f.write_str("cohere"),
            Self::Titan => f.write_str("titan"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: EmbeddingModel,
    /// Base URL of the model runtime; requests go to `{endpoint}/model/{model_id}/invoke`.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    /// LRU entries, 0 disables caching
    pub cache_size: usize,
    /// `input_type` for query embeddings; unknown values fall back to `search_query`.
    #[serde(default = "default_query_input_type")]
    pub query_input_type: String,
}

fn default_query_input_type() -> String {
    InputType::SearchQuery.as_str().to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingModel::Cohere,
            endpoint: "https://bedrock-runtime.us-east-1.amazonaws.com".to_string(),
            api_key: String::new(),
            cache_size: 1000,
            query_input_type: default_query_input_type(),
        }
    }
}

/// Remote text embedding
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str, model: EmbeddingModel, input_type: InputType) -> Result<Vec<f32>>;
}
