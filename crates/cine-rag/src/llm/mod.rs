//! LLM Module - conversational model calls
//!
//! `LLMProvider` is the seam to the external model service. `LLMClient`
//! wraps a provider with the per-call timeout and the history discipline the
//! rest of the crate relies on: history is input-only, every call works on a
//! copy with the new user turn appended.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RagError, RagResult};

pub mod external;

pub use external::ExternalProvider;

/// External API providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiProvider {
    Anthropic,
    OpenAI,
    Ollama,
    /// OpenAI-compatible endpoint
    Custom { endpoint: String },
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub provider: ApiProvider,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's public endpoint (gateways, proxies).
    #[serde(default)]
    pub endpoint: Option<String>,
    pub generation: GenerationConfig,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: ApiProvider::Anthropic,
            model: "claude-3-haiku-20240307".to_string(),
            api_key: String::new(),
            endpoint: None,
            generation: GenerationConfig::default(),
        }
    }
}

/// Generation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    /// 0 = deterministic
    pub temperature: f32,
    /// Nucleus sampling mass
    pub top_p: f32,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.9,
            top_p: 0.999,
            top_k: Some(250),
            stop_sequences: vec![],
        }
    }
}

impl GenerationConfig {
    /// Settings used for classification and extraction calls.
    pub fn deterministic() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.0,
            top_p: 1.0,
            top_k: None,
            stop_sequences: vec![],
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.max_tokens == 0 {
            return Err(RagError::Configuration("max_tokens must be > 0".into()));
        }
        if self.temperature < 0.0 {
            return Err(RagError::Configuration("temperature must be >= 0".into()));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(RagError::Configuration("top_p must be in (0, 1]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One conversation turn.
///
/// Accepts both `{"role":"user","content":"text"}` and the block form
/// `{"role":"user","content":[{"text":"..."}]}`; always serializes to blocks
/// so histories round-trip to callers unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: ChatRole,
    content: WireContent,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Serialize, Deserialize)]
struct WireBlock {
    #[serde(default)]
    text: String,
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        let content = match wire.content {
            WireContent::Text(text) => text,
            WireContent::Blocks(blocks) => blocks
                .into_iter()
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join(""),
        };
        Self { role: wire.role, content }
    }
}

impl From<ChatMessage> for WireMessage {
    fn from(message: ChatMessage) -> Self {
        Self {
            role: message.role,
            content: WireContent::Blocks(vec![WireBlock { text: message.content }]),
        }
    }
}

/// Schema describing a tool the model can call.
///
/// Deserializes from either `{"name","description","parameters"}` or the
/// `{"toolSpec":{"name","description","inputSchema":{"json":..}}}` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireTool")]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input
    pub parameters: JsonValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTool {
    Spec {
        #[serde(rename = "toolSpec")]
        tool_spec: WireToolSpec,
    },
    Plain {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        parameters: JsonValue,
    },
}

#[derive(Deserialize)]
struct WireToolSpec {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "inputSchema", default)]
    input_schema: JsonValue,
}

impl From<WireTool> for ToolSchema {
    fn from(wire: WireTool) -> Self {
        match wire {
            WireTool::Spec { tool_spec } => {
                let parameters = match tool_spec.input_schema.get("json") {
                    Some(schema) => schema.clone(),
                    None => tool_spec.input_schema,
                };
                Self {
                    name: tool_spec.name,
                    description: tool_spec.description,
                    parameters,
                }
            }
            WireTool::Plain { name, description, parameters } => Self {
                name,
                description,
                parameters,
            },
        }
    }
}

/// A tool invocation chosen by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: Option<String>,
    pub name: String,
    pub input: JsonValue,
}

/// Everything a provider needs for one round trip.
#[derive(Debug, Clone)]
pub struct ConverseRequest {
    pub messages: Vec<ChatMessage>,
    pub system: String,
    pub config: GenerationConfig,
    pub tools: Vec<ToolSchema>,
}

/// Model reply: text plus the first tool call, if the model made one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverseOutput {
    pub text: String,
    pub tool_use: Option<ToolUse>,
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub supports_tools: bool,
}

/// Core trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// One synchronous request/response against the model service.
    async fn converse(&self, request: &ConverseRequest) -> Result<ConverseOutput>;

    fn info(&self) -> ProviderInfo;
}

/// Per-call options for [`LLMClient::converse`].
#[derive(Debug, Clone, Copy)]
pub struct ConverseOptions<'a> {
    pub system: &'a str,
    pub config: &'a GenerationConfig,
    pub tools: &'a [ToolSchema],
    /// Sent as a trailing assistant turn; reattached to the reply text.
    pub prefill: Option<&'a str>,
}

impl<'a> ConverseOptions<'a> {
    pub fn new(system: &'a str, config: &'a GenerationConfig) -> Self {
        Self {
            system,
            config,
            tools: &[],
            prefill: None,
        }
    }

    pub fn with_tools(mut self, tools: &'a [ToolSchema]) -> Self {
        self.tools = tools;
        self
    }

    /// Empty prefills are ignored.
    pub fn with_prefill(mut self, prefill: &'a str) -> Self {
        self.prefill = if prefill.is_empty() { None } else { Some(prefill) };
        self
    }
}

/// Timeout-bounded model client shared by the orchestrator and the routes.
#[derive(Clone)]
pub struct LLMClient {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LLMClient {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Send `history` + a new user turn and return the reply.
    ///
    /// `history` is never modified. Timeouts and service errors become
    /// [`RagError::Generation`] naming `stage`. No retries.
    pub async fn converse(
        &self,
        stage: &str,
        history: &[ChatMessage],
        user_text: &str,
        options: ConverseOptions<'_>,
    ) -> RagResult<ConverseOutput> {
        options.config.validate()?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(user_text));
        if let Some(prefill) = options.prefill {
            messages.push(ChatMessage::assistant(prefill));
        }

        let request = ConverseRequest {
            messages,
            system: options.system.to_string(),
            config: options.config.clone(),
            tools: options.tools.to_vec(),
        };

        let start = Instant::now();
        let mut output = match tokio::time::timeout(self.timeout, self.provider.converse(&request)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(stage = stage, error = %e, "Model call failed");
                return Err(RagError::generation(stage, e));
            }
            Err(_) => {
                tracing::error!(stage = stage, timeout_secs = self.timeout.as_secs(), "Model call timed out");
                return Err(RagError::generation(
                    stage,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        // Providers that ignore the trailing assistant turn echo the prefill themselves.
        if let Some(prefill) = options.prefill {
            if !output.text.trim_start().starts_with(prefill) {
                output.text = format!("{}{}", prefill, output.text);
            }
        }

        tracing::debug!(
            stage = stage,
            elapsed_ms = start.elapsed().as_millis() as u64,
            tool = output.tool_use.as_ref().map(|t| t.name.as_str()),
            text = %output.text,
            "Model replied"
        );
        Ok(output)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider shared by the crate's tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    pub enum Scripted {
        Reply(ConverseOutput),
        Fail(String),
        Hang,
    }

    pub struct ScriptedProvider {
        script: Mutex<VecDeque<Scripted>>,
        pub requests: Mutex<Vec<ConverseRequest>>,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn text(text: &str) -> Scripted {
            Scripted::Reply(ConverseOutput { text: text.to_string(), tool_use: None })
        }

        pub fn tool(name: &str, input: JsonValue) -> Scripted {
            Scripted::Reply(ConverseOutput {
                text: String::new(),
                tool_use: Some(ToolUse { id: Some("toolu_1".into()), name: name.into(), input }),
            })
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn converse(&self, request: &ConverseRequest) -> Result<ConverseOutput> {
            self.requests.lock().push(request.clone());
            let next = self.script.lock().pop_front();
            match next {
                Some(Scripted::Reply(output)) => Ok(output),
                Some(Scripted::Fail(message)) => Err(anyhow::anyhow!(message)),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(anyhow::anyhow!("unreachable"))
                }
                None => Err(anyhow::anyhow!("script exhausted")),
            }
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "scripted".into(),
                model: "test".into(),
                supports_tools: true,
            }
        }
    }

    pub fn client(provider: Arc<ScriptedProvider>) -> LLMClient {
        LLMClient::new(provider, Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_config_validation() {
        assert!(GenerationConfig::default().validate().is_ok());
        assert!(GenerationConfig::deterministic().validate().is_ok());

        let mut config = GenerationConfig::default();
        config.max_tokens = 0;
        assert!(matches!(config.validate(), Err(RagError::Configuration(_))));

        let config = GenerationConfig { top_p: 0.0, ..GenerationConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chat_message_accepts_both_shapes() {
        let blocks: ChatMessage =
            serde_json::from_value(json!({"role": "user", "content": [{"text": "hi"}]})).unwrap();
        let plain: ChatMessage =
            serde_json::from_value(json!({"role": "assistant", "content": "hello"})).unwrap();
        assert_eq!(blocks, ChatMessage::user("hi"));
        assert_eq!(plain, ChatMessage::assistant("hello"));

        let out = serde_json::to_value(&plain).unwrap();
        assert_eq!(out, json!({"role": "assistant", "content": [{"text": "hello"}]}));
    }

    #[test]
    fn test_tool_schema_from_tool_spec() {
        let tool: ToolSchema = serde_json::from_value(json!({
            "toolSpec": {
                "name": "sort_movies",
                "description": "Pick a sort field",
                "inputSchema": {"json": {"type": "object", "properties": {"sort_by": {"type": "string"}}}}
            }
        }))
        .unwrap();
        assert_eq!(tool.name, "sort_movies");
        assert_eq!(tool.parameters["properties"]["sort_by"]["type"], "string");
    }

    #[tokio::test]
    async fn test_converse_leaves_history_untouched() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text("yes</answer>")]);
        let llm = client(provider.clone());
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];
        let config = GenerationConfig::deterministic();

        let output = llm
            .converse(
                "routing",
                &history,
                "new question",
                ConverseOptions::new("system", &config).with_prefill("<answer>"),
            )
            .await
            .unwrap();

        assert_eq!(output.text, "<answer>yes</answer>");
        assert_eq!(history.len(), 2);

        let sent = &provider.requests.lock()[0];
        assert_eq!(sent.messages.len(), 4);
        assert_eq!(sent.messages[2], ChatMessage::user("new question"));
        assert_eq!(sent.messages[3], ChatMessage::assistant("<answer>"));
        assert_eq!(sent.system, "system");
    }

    #[tokio::test]
    async fn test_prefill_not_doubled_when_reply_repeats_it() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text("<answer>yes</answer>")]);
        let llm = client(provider);
        let config = GenerationConfig::deterministic();

        let output = llm
            .converse(
                "decision",
                &[],
                "q",
                ConverseOptions::new("system", &config).with_prefill("<answer>"),
            )
            .await
            .unwrap();
        assert_eq!(output.text, "<answer>yes</answer>");
    }

    #[tokio::test]
    async fn test_converse_maps_failure_to_generation_error() {
        let provider = ScriptedProvider::new(vec![Scripted::Fail("503 overloaded".into())]);
        let llm = client(provider);
        let config = GenerationConfig::deterministic();
        let err = llm
            .converse("open", &[], "q", ConverseOptions::new("", &config))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
        assert!(err.to_string().contains("open"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_converse_timeout_is_generation_error() {
        let provider = ScriptedProvider::new(vec![Scripted::Hang]);
        let llm = LLMClient::new(provider, Duration::from_secs(2));
        let config = GenerationConfig::deterministic();
        let err = llm
            .converse("decision", &[], "q", ConverseOptions::new("", &config))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_remote_call() {
        let provider = ScriptedProvider::new(vec![]);
        let llm = client(provider.clone());
        let config = GenerationConfig { max_tokens: 0, ..GenerationConfig::deterministic() };
        let err = llm
            .converse("open", &[], "q", ConverseOptions::new("", &config))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert_eq!(provider.calls(), 0);
    }
}
