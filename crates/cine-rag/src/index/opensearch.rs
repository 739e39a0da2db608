use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{DocumentIndex, IndexConfig, SearchResponse};

/// `_search` over HTTP against an OpenSearch domain.
pub struct OpenSearchClient {
    base_url: String,
    credentials: Option<(String, String)>,
    client: Client,
}

impl OpenSearchClient {
    pub fn new(config: &IndexConfig, timeout: Duration) -> Result<Self> {
        Self::for_host(&config.host, config.username.clone().zip(config.password.clone()), timeout)
    }

    pub fn for_host(host: &str, credentials: Option<(String, String)>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        let base_url = normalize_host(host);
        tracing::info!(host = %base_url, "Creating OpenSearch client");

        Ok(Self { base_url, credentials, client })
    }

    fn search_url(&self, index: &str) -> String {
        format!("{}/{}/_search", self.base_url, index)
    }
}

pub(crate) fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl DocumentIndex for OpenSearchClient {
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse> {
        let url = self.search_url(index);
        let mut request = self.client.post(&url).json(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Search request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Search error ({}) on index {}: {}", status, index, error));
        }

        response
            .json::<SearchResponse>()
            .await
            .with_context(|| format!("Unreadable search response from {}", url))
    }
}
