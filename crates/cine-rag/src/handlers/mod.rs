//! Route handlers
//!
//! Each route takes a JSON event, runs one slice of the pipeline and answers
//! with a [`RouteResponse`]. Handlers never fail: every error is folded into
//! the response with `statusCode` 500 and an `errorKind`.

pub mod agent;
pub mod conversation;
pub mod search;

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::RagConfig;
use crate::embeddings::{CachedEmbeddings, EmbeddingService, RemoteEmbeddings};
use crate::error::{RagError, RagResult};
use crate::index::OpenSearchClient;
use crate::llm::{ChatMessage, ExternalProvider, GenerationConfig, LLMClient, LLMProvider};
use crate::memory::{BufferMemory, SessionStore};
use crate::rag::StageTimings;
use crate::search::QueryBuilder;
use crate::secrets::{IndexLocation, SecretStore};
use crate::types::Movie;

pub const STATUS_OK: u16 = 200;
pub const STATUS_FAILED: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Routing,
    StandardSearch,
    SemanticSearch,
    Similar,
    Specific,
    Sorting,
    Open,
    Chat,
    ActionGroup,
    AgentSemantic,
}

impl Route {
    pub const ALL: [Route; 10] = [
        Route::Routing,
        Route::StandardSearch,
        Route::SemanticSearch,
        Route::Similar,
        Route::Specific,
        Route::Sorting,
        Route::Open,
        Route::Chat,
        Route::ActionGroup,
        Route::AgentSemantic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::StandardSearch => "standard_search",
            Self::SemanticSearch => "semantic_search",
            Self::Similar => "similar",
            Self::Specific => "specific",
            Self::Sorting => "sorting",
            Self::Open => "open",
            Self::Chat => "chat",
            Self::ActionGroup => "action_group",
            Self::AgentSemantic => "agent_semantic",
        }
    }

    /// Agent routes read their index location from the secret store.
    pub fn is_agent(&self) -> bool {
        matches!(self, Self::ActionGroup | Self::AgentSemantic)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Route::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| RagError::Validation(format!("unknown route '{}'", s)))
    }
}

/// Response shape shared by every non-agent route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_output: Option<Vec<Value>>,
    #[serde(rename = "errorKind", skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sorted_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimised_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<BufferMemory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<StageTimings>,
}

impl RouteResponse {
    fn with_status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            search_output: None,
            error_kind: None,
            question: None,
            category: None,
            history: None,
            sorted_by: None,
            optimised_query: None,
            movie_name: None,
            session_id: None,
            memory: None,
            timings: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::with_status(STATUS_OK, message)
    }

    /// The model replied but did not follow the output contract.
    pub fn soft_failure(message: impl Into<String>) -> Self {
        Self::with_status(STATUS_FAILED, message)
    }

    pub fn failure(err: &RagError) -> Self {
        let mut response = Self::with_status(STATUS_FAILED, err.to_string());
        response.error_kind = Some(err.kind());
        response.search_output = Some(Vec::new());
        response
    }

    pub fn documents(mut self, movies: Vec<Movie>) -> Self {
        let documents = movies.iter().filter_map(|movie| serde_json::to_value(movie).ok()).collect();
        self.raw_documents(documents)
    }

    /// Documents passed through as the caller sent them.
    pub fn raw_documents(mut self, documents: Vec<Value>) -> Self {
        self.search_output = Some(documents);
        self
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn movie_name(mut self, name: impl Into<String>) -> Self {
        self.movie_name = Some(name.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == STATUS_OK
    }
}

/// Clients and settings shared by every route.
pub struct RouteContext {
    pub llm: LLMClient,
    pub search: Arc<QueryBuilder>,
    pub config: RagConfig,
    pub sessions: SessionStore,
}

impl RouteContext {
    pub fn new(llm: LLMClient, search: Arc<QueryBuilder>, config: RagConfig) -> Self {
        let sessions = SessionStore::new(config.memory.clone());
        Self {
            llm,
            search,
            config,
            sessions,
        }
    }

    /// Build the HTTP-backed clients described by `config`.
    pub fn from_config(config: RagConfig) -> RagResult<Self> {
        config.validate()?;
        let timeouts = &config.timeouts;
        let setup = |what: &str, e: anyhow::Error| RagError::Configuration(format!("{}: {}", what, e));

        let provider = ExternalProvider::new(&config.llm, timeouts.llm())
            .map_err(|e| setup("model client", e))?;
        let info = provider.info();
        tracing::info!(
            provider = %info.name,
            model = %info.model,
            tools = info.supports_tools,
            "Model client ready"
        );
        let llm = LLMClient::new(Arc::new(provider), timeouts.llm());

        let remote = RemoteEmbeddings::new(&config.embedding, timeouts.embedding())
            .map_err(|e| setup("embedding client", e))?;
        let embeddings: Arc<dyn EmbeddingService> =
            Arc::new(CachedEmbeddings::new(Arc::new(remote), config.embedding.cache_size));

        let index = OpenSearchClient::new(&config.index, timeouts.index())
            .map_err(|e| setup("index client", e))?;
        let search = Arc::new(QueryBuilder::new(
            Arc::new(index),
            embeddings,
            config.index.clone(),
            timeouts.index(),
        )
        .with_input_type(&config.embedding.query_input_type));

        Ok(Self::new(llm, search, config))
    }

    pub fn index_name(&self) -> &str {
        &self.config.index.index_name
    }

    /// Settings for classification and extraction calls.
    pub fn extraction_config(&self) -> GenerationConfig {
        GenerationConfig::deterministic()
    }
}

/// Point `config` at the index an event targets.
///
/// Agent routes use the configured secret; other routes may carry
/// `os_host`/`index_name` in the event itself.
pub async fn prepare_config(
    route: Route,
    event: &Value,
    mut config: RagConfig,
    secrets: &dyn SecretStore,
) -> RagResult<RagConfig> {
    if route.is_agent() {
        let location = IndexLocation::resolve(secrets, &config.secret_id).await?;
        config.index.host = location.host;
        config.index.index_name = location.index_name;
        return Ok(config);
    }

    let non_empty = |key: &str| {
        event
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if let Some(host) = non_empty("os_host") {
        config.index.host = host;
    }
    if let Some(index) = non_empty("index_name") {
        config.index.index_name = index;
    }
    Ok(config)
}

/// Missing fields are configuration errors, wrong shapes are validation errors.
pub(crate) fn parse_event<T: serde::de::DeserializeOwned>(event: Value) -> RagResult<T> {
    serde_json::from_value(event).map_err(|e| {
        let message = e.to_string();
        if message.starts_with("missing field") {
            RagError::Configuration(format!("event {}", message))
        } else {
            RagError::Validation(format!("malformed event: {}", message))
        }
    })
}

/// Run `route` on `event` and return the JSON response.
pub async fn dispatch(ctx: &RouteContext, route: Route, event: Value) -> Value {
    tracing::info!(route = %route, "Handling event");

    let response = match route {
        Route::ActionGroup => return agent::action_group(ctx, event).await,
        Route::AgentSemantic => return agent::agent_semantic(ctx, event).await,
        Route::Routing => conversation::routing(ctx, event).await,
        Route::Open => conversation::open(ctx, event).await,
        Route::Chat => conversation::chat(ctx, event).await,
        Route::StandardSearch => search::standard_search(ctx, event).await,
        Route::SemanticSearch => search::semantic_search(ctx, event).await,
        Route::Similar => search::similar(ctx, event).await,
        Route::Specific => search::specific(ctx, event).await,
        Route::Sorting => search::sorting(ctx, event).await,
    };

    if !response.is_ok() {
        tracing::warn!(
            route = %route,
            status = response.status_code,
            error_kind = response.error_kind,
            message = %response.message,
            "Route finished with failure status"
        );
    }

    serde_json::to_value(&response).unwrap_or_else(|e| {
        serde_json::json!({
            "statusCode": STATUS_FAILED,
            "message": format!("response serialization failed: {}", e),
            "search_output": []
        })
    })
}

/// Fold a handler result into a response.
pub(crate) fn respond(result: RagResult<RouteResponse>) -> RouteResponse {
    result.unwrap_or_else(|e| RouteResponse::failure(&e))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::embeddings::testing::CountingEmbeddings;
    use crate::index::testing::RecordingIndex;
    use crate::llm::testing::{client, ScriptedProvider};
    use std::time::Duration;

    pub fn context(provider: Arc<ScriptedProvider>, index: Arc<RecordingIndex>) -> RouteContext {
        let config = RagConfig::default();
        let search = Arc::new(QueryBuilder::new(
            index,
            Arc::new(CountingEmbeddings::new()),
            config.index.clone(),
            Duration::from_secs(5),
        ));
        RouteContext::new(client(provider), search, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;

    struct OneSecret(String);

    #[async_trait]
    impl SecretStore for OneSecret {
        async fn get(&self, _secret_id: &str) -> anyhow::Result<String> {
            if self.0.is_empty() {
                return Err(anyhow!("denied"));
            }
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_route_names_roundtrip() {
        for route in Route::ALL {
            assert_eq!(route.as_str().parse::<Route>().unwrap(), route);
        }
        assert!(matches!("nope".parse::<Route>(), Err(RagError::Validation(_))));
    }

    #[test]
    fn test_failure_response_shape() {
        let response = RouteResponse::failure(&RagError::Retrieval("vector query: refused".into()));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 500);
        assert_eq!(value["errorKind"], "RetrievalError");
        assert_eq!(value["search_output"], json!([]));
        assert!(value.get("category").is_none());
    }

    #[test]
    fn test_parse_event_error_kinds() {
        #[derive(serde::Deserialize, Debug)]
        struct Event {
            #[allow(dead_code)]
            question: String,
        }
        let missing = parse_event::<Event>(json!({})).unwrap_err();
        assert!(matches!(missing, RagError::Configuration(_)));
        let wrong = parse_event::<Event>(json!({"question": 3})).unwrap_err();
        assert!(matches!(wrong, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_prepare_config_uses_event_then_secret() {
        let secrets = OneSecret(r#"{"os_host":"agent-host","index_name":"agent-index"}"#.into());
        let event = json!({"os_host": "event-host", "index_name": ""});

        let config = prepare_config(Route::Open, &event, RagConfig::default(), &secrets).await.unwrap();
        assert_eq!(config.index.host, "event-host");
        assert_eq!(config.index.index_name, "movies");

        let config = prepare_config(Route::ActionGroup, &event, RagConfig::default(), &secrets).await.unwrap();
        assert_eq!(config.index.host, "agent-host");
        assert_eq!(config.index.index_name, "agent-index");

        let denied = OneSecret(String::new());
        let err = prepare_config(Route::AgentSemantic, &event, RagConfig::default(), &denied).await.unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
