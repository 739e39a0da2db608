use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::embeddings::{EmbeddingConfig, EmbeddingModel};
use crate::error::{RagError, RagResult};
use crate::index::IndexConfig;
use crate::llm::LLMConfig;
use crate::memory::MemoryConfig;
use crate::rag::ChainConfig;

pub const ENV_INDEX_HOST: &str = "CINE_RAG_INDEX_HOST";
pub const ENV_INDEX_NAME: &str = "CINE_RAG_INDEX_NAME";
pub const ENV_LLM_API_KEY: &str = "CINE_RAG_LLM_API_KEY";
pub const ENV_EMBEDDING_API_KEY: &str = "CINE_RAG_EMBEDDING_API_KEY";
pub const ENV_EMBEDDING_MODEL: &str = "CINE_RAG_EMBEDDING_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LLMConfig,
    pub memory: MemoryConfig,
    pub timeouts: TimeoutConfig,
    pub chain: ChainConfig,
    /// Secret holding `{"os_host", "index_name"}` for agent invocations.
    pub secret_id: String,
}

/// Per-call timeouts for remote collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub llm_secs: u64,
    pub embedding_secs: u64,
    pub index_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_secs: 120,
            embedding_secs: 30,
            index_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_secs)
    }
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }
    pub fn index(&self) -> Duration {
        Duration::from_secs(self.index_secs)
    }
}

impl RagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> RagResult<()> {
        let invalid = |msg: &str| Err(RagError::Configuration(msg.to_string()));

        if self.index.data_columns.is_empty() {
            return invalid("index.data_columns must not be empty");
        }
        if self.index.default_k == 0 {
            return invalid("index.default_k must be > 0");
        }
        if self.index.host.trim().is_empty() || self.index.index_name.trim().is_empty() {
            return invalid("index.host and index.index_name are required");
        }
        if self.timeouts.llm_secs == 0 || self.timeouts.embedding_secs == 0 || self.timeouts.index_secs == 0 {
            return invalid("timeouts must be > 0");
        }
        self.llm.generation.validate()?;
        self.chain.validate()?;
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> RagResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| RagError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/cine-rag/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cine-rag")
            .join("config.json")
    }

    /// Apply `CINE_RAG_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = lookup(ENV_INDEX_HOST) {
            self.index.host = host;
        }
        if let Some(name) = lookup(ENV_INDEX_NAME) {
            self.index.index_name = name;
        }
        if let Some(key) = lookup(ENV_LLM_API_KEY) {
            self.llm.api_key = key;
        }
        if let Some(key) = lookup(ENV_EMBEDDING_API_KEY) {
            self.embedding.api_key = key;
        }
        if let Some(name) = lookup(ENV_EMBEDDING_MODEL) {
            match EmbeddingModel::parse(&name) {
                Ok(model) => self.embedding.model = model,
                Err(e) => tracing::warn!(error = %e, "Ignoring {}", ENV_EMBEDDING_MODEL),
            }
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LLMConfig::default(),
            memory: MemoryConfig::default(),
            timeouts: TimeoutConfig::default(),
            chain: ChainConfig::default(),
            secret_id: "semantic-api".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.index.data_columns.len(), 13);
        assert_eq!(config.memory.capacity, 5);
    }

    #[test]
    fn test_validate_rejects_broken_values() {
        let mut config = RagConfig::default();
        config.index.default_k = 0;
        assert!(matches!(config.validate(), Err(RagError::Configuration(_))));

        let mut config = RagConfig::default();
        config.index.data_columns.clear();
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.timeouts.index_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.llm.generation.temperature = -0.1;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.memory.capacity = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RagConfig =
            serde_json::from_str(r#"{"secret_id": "movies-prod", "memory": {"capacity": 2}}"#).unwrap();
        assert_eq!(config.secret_id, "movies-prod");
        assert_eq!(config.memory.capacity, 2);
        assert_eq!(config.index.vector_field, "vector_index");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_INDEX_HOST, "https://search.example.com"),
            (ENV_LLM_API_KEY, "sk-test"),
            (ENV_INDEX_NAME, ""),
        ]
        .into_iter()
        .collect();

        let mut config = RagConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.index.host, "https://search.example.com");
        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.index.index_name, "movies");
    }

    #[test]
    fn test_embedding_model_override() {
        let mut config = RagConfig::default();
        config.apply_overrides(|key| (key == ENV_EMBEDDING_MODEL).then(|| "TITAN".to_string()));
        assert_eq!(config.embedding.model, EmbeddingModel::Titan);

        config.apply_overrides(|key| (key == ENV_EMBEDDING_MODEL).then(|| "word2vec".to_string()));
        assert_eq!(config.embedding.model, EmbeddingModel::Titan);
        assert_eq!(config.embedding.query_input_type, "search_query");
    }

    #[test]
    fn test_from_file_missing_is_configuration_error() {
        let err = RagConfig::from_file(Path::new("/nonexistent/cine-rag.json")).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
