//! Secret lookup for index locations
//!
//! Secrets are opaque strings; only [`IndexLocation::from_secret`] gives them
//! a shape.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RagError, RagResult};

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, secret_id: &str) -> Result<String>;
}

/// Reads `CINE_RAG_SECRET_<ID>` (id upper-cased, `-` and `/` as `_`).
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn var_name(secret_id: &str) -> String {
        let id: String = secret_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("CINE_RAG_SECRET_{}", id)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, secret_id: &str) -> Result<String> {
        let name = Self::var_name(secret_id);
        std::env::var(&name).map_err(|_| anyhow!("secret {} not found (expected env var {})", secret_id, name))
    }
}

/// JSON object file mapping secret ids to secret strings.
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, secret_id: &str) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read secrets file {}", self.path.display()))?;
        let secrets: HashMap<String, serde_json::Value> =
            serde_json::from_str(&content).context("Secrets file is not a JSON object")?;

        match secrets.get(secret_id) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(anyhow!("secret {} not found in {}", secret_id, self.path.display())),
        }
    }
}

/// Where the movie index lives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexLocation {
    #[serde(rename = "os_host")]
    pub host: String,
    pub index_name: String,
}

impl IndexLocation {
    pub fn from_secret(secret: &str) -> RagResult<Self> {
        serde_json::from_str(secret).map_err(|e| {
            RagError::Configuration(format!("index secret must hold os_host and index_name: {}", e))
        })
    }

    /// Fetch and parse `secret_id`; a store failure is a configuration error.
    pub async fn resolve(store: &dyn SecretStore, secret_id: &str) -> RagResult<Self> {
        let secret = store.get(secret_id).await.map_err(|e| {
            tracing::error!(secret_id = secret_id, error = %e, "Secret lookup failed");
            RagError::Configuration(format!("secret lookup failed: {}", e))
        })?;
        Self::from_secret(&secret)
    }
}
