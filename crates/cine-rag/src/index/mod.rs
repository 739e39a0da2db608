//! Document index collaborator
//!
//! The index itself (storage, scoring, kNN) is external. This module only
//! defines the call surface and the response envelope the query builder reads.

pub mod opensearch;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::DATA_COLUMNS;

pub use opensearch::OpenSearchClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// `https://host:port`; a bare host is treated as https.
    pub host: String,
    pub index_name: String,
    /// Fields a filter may target and the fields returned with each hit.
    pub data_columns: Vec<String>,
    /// Internal embedding field, never returned to callers.
    pub vector_field: String,
    pub default_k: usize,
    pub sort_field: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            host: "https://localhost:9200".to_string(),
            index_name: "movies".to_string(),
            data_columns: DATA_COLUMNS.iter().map(|c| c.to_string()).collect(),
            vector_field: "vector_index".to_string(),
            default_k: 10,
            sort_field: "popularity".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Raw `_search` response; only the hit list is read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: HitList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HitList {
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl SearchResponse {
    pub fn into_sources(self) -> Vec<Value> {
        self.hits.hits.into_iter().map(|hit| hit.source).collect()
    }
}

/// A search backend that accepts OpenSearch query DSL.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Returns canned sources and records every query body it receives.
    pub struct RecordingIndex {
        sources: Vec<Value>,
        fail: bool,
        hang: bool,
        pub queries: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingIndex {
        pub fn with_sources(sources: Vec<Value>) -> Self {
            Self { sources, fail: false, hang: false, queries: Mutex::new(Vec::new()) }
        }

        pub fn failing() -> Self {
            Self { sources: Vec::new(), fail: true, hang: false, queries: Mutex::new(Vec::new()) }
        }

        /// Never answers.
        pub fn hanging() -> Self {
            Self { sources: Vec::new(), fail: false, hang: true, queries: Mutex::new(Vec::new()) }
        }

        pub fn calls(&self) -> usize {
            self.queries.lock().len()
        }

        pub fn last_body(&self) -> Option<Value> {
            self.queries.lock().last().map(|(_, body)| body.clone())
        }
    }

    #[async_trait]
    impl DocumentIndex for RecordingIndex {
        async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse> {
            self.queries.lock().push((index.to_string(), body.clone()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(anyhow::anyhow!("connection refused"));
            }
            let size = body["size"].as_u64().unwrap_or(10) as usize;
            let hits = self
                .sources
                .iter()
                .take(size)
                .map(|source| SearchHit { id: None, score: Some(1.0), source: source.clone() })
                .collect();
            Ok(SearchResponse { hits: HitList { hits } })
        }
    }
}
