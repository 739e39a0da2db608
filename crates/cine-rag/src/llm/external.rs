//! External API provider for hosted chat models
//! Anthropic Messages API plus any OpenAI-compatible chat completions endpoint

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ApiProvider, ChatMessage, ChatRole, ConverseOutput, ConverseRequest, LLMConfig, LLMProvider,
    ProviderInfo, ToolSchema, ToolUse,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ExternalProvider {
    provider: ApiProvider,
    api_key: String,
    model: String,
    endpoint: Option<String>,
    client: Client,
}

impl ExternalProvider {
    pub fn new(config: &LLMConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        tracing::info!(
            provider = ?config.provider,
            model = %config.model,
            timeout_secs = timeout.as_secs(),
            "Creating ExternalProvider"
        );

        Ok(Self {
            provider: config.provider.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    fn get_endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        match &self.provider {
            ApiProvider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
            ApiProvider::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
            ApiProvider::Ollama => "http://localhost:11434/v1/chat/completions".to_string(),
            ApiProvider::Custom { endpoint } => endpoint.clone(),
        }
    }

    /// Parse a response body as JSON, returning a clear error if the server returned HTML
    /// (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response(response: reqwest::Response, endpoint: &str) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

        if !status.is_success() {
            let preview: String = body.chars().take(300).collect();
            return Err(anyhow!("Chat API error ({}) from {}: {}", status, endpoint, preview));
        }

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}): {}",
                endpoint,
                status,
                preview
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("Failed to parse JSON from {} (HTTP {}): {}. Response body: {}", endpoint, status, e, preview)
        })
    }

    async fn post(&self, request: &Value) -> Result<Value> {
        let endpoint = self.get_endpoint();
        let mut builder = self.client.post(&endpoint).json(request);
        builder = match self.provider {
            ApiProvider::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            _ => builder.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::error!(endpoint = %endpoint, "Request timed out (connect or response timeout)");
                anyhow!("Chat request to {} timed out", endpoint)
            } else if e.is_connect() {
                anyhow!("Failed to connect to {}: {}", endpoint, e)
            } else {
                anyhow!("Chat request to {} failed: {}", endpoint, e)
            }
        })?;

        Self::parse_json_response(response, &endpoint).await
    }
}

#[async_trait]
impl LLMProvider for ExternalProvider {
    async fn converse(&self, request: &ConverseRequest) -> Result<ConverseOutput> {
        match self.provider {
            ApiProvider::Anthropic => {
                let body = self.post(&anthropic_request(&self.model, request)).await?;
                parse_anthropic_response(&body)
            }
            _ => {
                let body = self.post(&openai_request(&self.model, request)).await?;
                parse_openai_response(&body)
            }
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: format!("{:?}", self.provider),
            model: self.model.clone(),
            supports_tools: true,
        }
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn anthropic_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let last = messages.len().saturating_sub(1);
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            // a trailing assistant turn may not end in whitespace
            let content = if i == last && m.role == ChatRole::Assistant {
                m.content.trim_end()
            } else {
                m.content.as_str()
            };
            json!({ "role": role_name(m.role), "content": content })
        })
        .collect()
}

fn anthropic_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

pub(crate) fn anthropic_request(model: &str, request: &ConverseRequest) -> Value {
    let config = &request.config;
    let mut body = json!({
        "model": model,
        "messages": anthropic_messages(&request.messages),
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "top_p": config.top_p,
    });

    if !request.system.is_empty() {
        body["system"] = json!(request.system);
    }
    if let Some(top_k) = config.top_k {
        body["top_k"] = json!(top_k);
    }
    if !config.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(config.stop_sequences);
    }
    if !request.tools.is_empty() {
        body["tools"] = json!(anthropic_tools(&request.tools));
    }
    body
}

pub(crate) fn parse_anthropic_response(body: &Value) -> Result<ConverseOutput> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| anyhow!("Anthropic response has no content blocks"))?;

    let mut output = ConverseOutput::default();
    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    output.text.push_str(text);
                }
            }
            Some("tool_use") if output.tool_use.is_none() => {
                if let Some(name) = block["name"].as_str() {
                    output.tool_use = Some(ToolUse {
                        id: block["id"].as_str().map(String::from),
                        name: name.to_string(),
                        input: block["input"].clone(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(output)
}

fn openai_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

pub(crate) fn openai_request(model: &str, request: &ConverseRequest) -> Value {
    let config = &request.config;
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system.is_empty() {
        messages.push(json!({ "role": "system", "content": request.system }));
    }
    messages.extend(
        request
            .messages
            .iter()
            .map(|m| json!({ "role": role_name(m.role), "content": m.content })),
    );

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "top_p": config.top_p,
        "stream": false,
    });
    if !config.stop_sequences.is_empty() {
        body["stop"] = json!(config.stop_sequences);
    }
    if !request.tools.is_empty() {
        body["tools"] = json!(openai_tools(&request.tools));
        body["tool_choice"] = json!("auto");
    }
    body
}

pub(crate) fn parse_openai_response(body: &Value) -> Result<ConverseOutput> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow!("Chat response has no choices"))?;

    let tool_use = match message["tool_calls"].as_array().and_then(|calls| calls.first()) {
        Some(call) => {
            let name = call["function"]["name"]
                .as_str()
                .ok_or_else(|| anyhow!("Tool call without a function name"))?;
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments)
                .map_err(|e| anyhow!("Tool call arguments are not JSON: {}", e))?;
            Some(ToolUse {
                id: call["id"].as_str().map(String::from),
                name: name.to_string(),
                input,
            })
        }
        None => None,
    };

    Ok(ConverseOutput {
        text: message["content"].as_str().unwrap_or_default().to_string(),
        tool_use,
    })
}
