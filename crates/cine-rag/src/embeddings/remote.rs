//! HTTP embedding client for Cohere and Titan model runtimes

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{EmbeddingConfig, EmbeddingModel, EmbeddingService, InputType};

pub struct RemoteEmbeddings {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl RemoteEmbeddings {
    pub fn new(config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn invoke_url(&self, model: EmbeddingModel) -> String {
        format!("{}/model/{}/invoke", self.endpoint, model.model_id())
    }
}

pub(crate) fn request_body(text: &str, model: EmbeddingModel, input_type: InputType) -> Value {
    match model {
        EmbeddingModel::Titan => json!({ "inputText": text }),
        EmbeddingModel::Cohere => json!({
            "texts": [text],
            "input_type": input_type.as_str(),
        }),
    }
}

pub(crate) fn parse_vector(body: &Value, model: EmbeddingModel) -> Result<Vec<f32>> {
    let vector = match model {
        EmbeddingModel::Titan => body.get("embedding"),
        EmbeddingModel::Cohere => body.pointer("/embeddings/0"),
    }
    .and_then(Value::as_array)
    .ok_or_else(|| anyhow!("{} response carries no embedding", model))?;

    vector
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("{} embedding contains a non-numeric value", model))
        })
        .collect()
}

#[async_trait]
impl EmbeddingService for RemoteEmbeddings {
    async fn embed(&self, text: &str, model: EmbeddingModel, input_type: InputType) -> Result<Vec<f32>> {
        let url = self.invoke_url(model);
        let mut request = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&request_body(text, model, input_type));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Embedding API error ({}): {}", status, error));
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Embedding response from {} is not JSON", url))?;
        let vector = parse_vector(&body, model)?;

        tracing::debug!(model = %model, dimension = vector.len(), "Computed embedding");
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohere_body_and_response() {
        let body = request_body("space opera", EmbeddingModel::Cohere, InputType::SearchQuery);
        assert_eq!(body, json!({"texts": ["space opera"], "input_type": "search_query"}));

        let response = json!({"embeddings": [[0.25, -1.0, 2]], "id": "x"});
        assert_eq!(parse_vector(&response, EmbeddingModel::Cohere).unwrap(), vec![0.25, -1.0, 2.0]);
    }

    #[test]
    fn test_titan_body_ignores_input_type() {
        let body = request_body("space opera", EmbeddingModel::Titan, InputType::Clustering);
        assert_eq!(body, json!({"inputText": "space opera"}));

        let response = json!({"embedding": [1.5], "inputTextTokenCount": 2});
        assert_eq!(parse_vector(&response, EmbeddingModel::Titan).unwrap(), vec![1.5]);
    }

    #[test]
    fn test_missing_or_bad_vector_is_error() {
        assert!(parse_vector(&json!({"embeddings": []}), EmbeddingModel::Cohere).is_err());
        assert!(parse_vector(&json!({"embedding": ["a"]}), EmbeddingModel::Titan).is_err());
    }

    #[test]
    fn test_invoke_url() {
        let config = EmbeddingConfig {
            endpoint: "http://localhost:9000/".into(),
            ..EmbeddingConfig::default()
        };
        let client = RemoteEmbeddings::new(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.invoke_url(EmbeddingModel::Titan),
            "http://localhost:9000/model/amazon.titan-embed-text-v1/invoke"
        );
    }
}
