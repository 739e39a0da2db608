//! Agent action-group routes.
//!
//! These answer in the agent envelope rather than a [`RouteResponse`]:
//! `{"messageVersion": "1.0", "response": {actionGroup, apiPath, httpMethod,
//! httpStatusCode, responseBody: {"application/json": {"body": ...}}}}`.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_event, RouteContext, RouteResponse};
use crate::error::{RagError, RagResult};
use crate::search::{documents_json, list_literal, sort_movies};
use crate::types::{FilterCriterion, Movie, SortField};

const MESSAGE_VERSION: &str = "1.0";
const DEFAULT_QUESTION: &str = "popular movies";
const AGENT_K: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentParameter {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub action_group: String,
    pub api_path: String,
    pub http_method: String,
    #[serde(default)]
    pub parameters: Option<Vec<AgentParameter>>,
}

impl AgentEvent {
    fn parameters(&self) -> RagResult<&[AgentParameter]> {
        self.parameters.as_deref().ok_or_else(|| {
            RagError::Validation("invalid agent event: 'parameters' missing or not a list".into())
        })
    }

    /// Value of the last parameter called `name`.
    fn parameter(&self, name: &str) -> RagResult<Option<&str>> {
        Ok(self
            .parameters()?
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str()))
    }

    fn envelope(&self, status: u16, body: String) -> Value {
        json!({
            "messageVersion": MESSAGE_VERSION,
            "response": {
                "actionGroup": self.action_group,
                "apiPath": self.api_path,
                "httpMethod": self.http_method,
                "httpStatusCode": status,
                "responseBody": {
                    "application/json": { "body": body }
                }
            }
        })
    }

    fn error_envelope(&self, err: &RagError) -> Value {
        let status = if err.is_caller_fault() { 400 } else { 500 };
        let body = json!({ "errorKind": err.kind(), "message": err.to_string() }).to_string();
        self.envelope(status, body)
    }
}

#[derive(Debug, Clone, Copy)]
enum AgentAction {
    Filter,
    Semantic,
}

/// Filter search with criteria supplied by the agent.
pub async fn action_group(ctx: &RouteContext, event: Value) -> Value {
    run_agent(ctx, event, AgentAction::Filter).await
}

/// Vector search on the agent's question, optionally re-ordered.
pub async fn agent_semantic(ctx: &RouteContext, event: Value) -> Value {
    run_agent(ctx, event, AgentAction::Semantic).await
}

async fn run_agent(ctx: &RouteContext, event: Value, action: AgentAction) -> Value {
    let event: AgentEvent = match parse_event(event) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Unreadable agent event");
            return serde_json::to_value(RouteResponse::failure(&e)).unwrap_or(Value::Null);
        }
    };
    tracing::info!(
        action_group = %event.action_group,
        api_path = %event.api_path,
        "Agent invocation"
    );

    let result = match action {
        AgentAction::Filter => filter_movies(ctx, &event).await,
        AgentAction::Semantic => semantic_movies(ctx, &event).await,
    };
    match result {
        Ok(movies) => event.envelope(200, documents_json(&movies)),
        Err(e) => {
            tracing::error!(api_path = %event.api_path, error = %e, "Agent action failed");
            event.error_envelope(&e)
        }
    }
}

async fn filter_movies(ctx: &RouteContext, event: &AgentEvent) -> RagResult<Vec<Movie>> {
    let criteria = match event.parameter("properties")? {
        Some(raw) => parse_properties(raw, &ctx.config.index.data_columns)?,
        None => Vec::new(),
    };
    ctx.search
        .filter_query(&criteria, ctx.index_name(), ctx.config.index.default_k)
        .await
}

/// Criteria arrive as JSON or as a Python-style list with single quotes.
fn parse_properties(raw: &str, allowed_fields: &[String]) -> RagResult<Vec<FilterCriterion>> {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => list_literal::parse_value(raw)?,
    };
    FilterCriterion::from_tool_input(&value, allowed_fields)
}

async fn semantic_movies(ctx: &RouteContext, event: &AgentEvent) -> RagResult<Vec<Movie>> {
    let question = event.parameter("question")?.unwrap_or(DEFAULT_QUESTION);
    let order_by = event.parameter("orderby")?.unwrap_or("popularity");
    tracing::debug!(question = question, order_by = order_by, "Agent semantic search");

    let mut movies = ctx
        .search
        .vector_query(question, ctx.index_name(), ctx.config.embedding.model, AGENT_K)
        .await?;

    match agent_sort_field(order_by) {
        Some(field) => sort_movies(&mut movies, field),
        None => tracing::debug!(order_by = order_by, "Keeping similarity order"),
    }

    // agents fail to escape quotes inside descriptions
    for movie in &mut movies {
        if let Some(description) = movie.description.as_mut() {
            description.retain(|c| c != '"');
        }
    }
    Ok(movies)
}

fn agent_sort_field(order_by: &str) -> Option<SortField> {
    match order_by.trim().to_lowercase().as_str() {
        "rating" | "ratings" => Some(SortField::VoteAverage),
        other => SortField::parse(other).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::context;
    use crate::index::testing::RecordingIndex;
    use crate::llm::testing::ScriptedProvider;
    use std::sync::Arc;

    fn agent_event(parameters: Value) -> Value {
        json!({
            "messageVersion": "1.0",
            "actionGroup": "movies",
            "apiPath": "/search",
            "httpMethod": "GET",
            "parameters": parameters
        })
    }

    fn body(envelope: &Value) -> Value {
        let raw = envelope["response"]["responseBody"]["application/json"]["body"]
            .as_str()
            .unwrap();
        serde_json::from_str(raw).unwrap()
    }

    fn catalogue() -> Vec<Value> {
        vec![
            json!({"tmdb_id": 1, "original_title": "Heat", "year": 1995, "vote_average": 8.3, "popularity": 40.0,
                   "description": "A \"professional\" thief"}),
            json!({"tmdb_id": 2, "original_title": "Ronin", "year": 1998, "vote_average": 7.2, "popularity": 55.0}),
            json!({"tmdb_id": 3, "original_title": "Nobody", "year": 2021, "vote_average": 7.9, "popularity": 95.0}),
        ]
    }

    #[tokio::test]
    async fn test_action_group_filters_with_single_quoted_properties() {
        let index = Arc::new(RecordingIndex::with_sources(catalogue()));
        let ctx = context(ScriptedProvider::new(vec![]), index.clone());

        let envelope = action_group(
            &ctx,
            agent_event(json!([
                {"name": "properties", "type": "string", "value": "[{'director': 'Michael Mann'}, {'genres': 'Crime'}]"}
            ])),
        )
        .await;

        assert_eq!(envelope["messageVersion"], "1.0");
        assert_eq!(envelope["response"]["httpStatusCode"], 200);
        assert_eq!(envelope["response"]["apiPath"], "/search");
        assert_eq!(body(&envelope).as_array().unwrap().len(), 3);

        let query = index.last_body().unwrap();
        let must = query["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(query["size"], 10);
    }

    #[tokio::test]
    async fn test_action_group_keeps_apostrophes_and_drops_unknown_fields() {
        let index = Arc::new(RecordingIndex::with_sources(catalogue()));
        let ctx = context(ScriptedProvider::new(vec![]), index.clone());

        let envelope = action_group(
            &ctx,
            agent_event(json!([
                {"name": "properties", "value": "[{'actors': 'Conan O'Brien'}, {'mood': '[cozy'}]"}
            ])),
        )
        .await;

        assert_eq!(envelope["response"]["httpStatusCode"], 200);
        let query = index.last_body().unwrap();
        let must = query["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 1);
        assert_eq!(must[0]["match"]["actors"]["query"], "Conan O'Brien");
    }

    #[test]
    fn test_properties_accept_strict_json() {
        let columns: Vec<String> = crate::types::DATA_COLUMNS.iter().map(|c| c.to_string()).collect();
        let criteria = parse_properties(r#"[{"original_title": "Schindler's List"}]"#, &columns).unwrap();
        assert_eq!(criteria[0].value.values(), vec!["Schindler's List"]);
    }

    #[tokio::test]
    async fn test_action_group_requires_parameters() {
        let index = Arc::new(RecordingIndex::with_sources(catalogue()));
        let ctx = context(ScriptedProvider::new(vec![]), index.clone());

        let mut event = agent_event(json!(null));
        event.as_object_mut().unwrap().remove("parameters");
        let envelope = action_group(&ctx, event).await;

        assert_eq!(envelope["response"]["httpStatusCode"], 400);
        assert_eq!(body(&envelope)["errorKind"], "ValidationError");
        assert_eq!(index.calls(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_agent_event_falls_back_to_route_failure() {
        let ctx = context(ScriptedProvider::new(vec![]), Arc::new(RecordingIndex::with_sources(vec![])));
        let response = action_group(&ctx, json!({"parameters": []})).await;
        assert_eq!(response["statusCode"], 500);
        assert_eq!(response["errorKind"], "ConfigurationError");
    }

    #[tokio::test]
    async fn test_agent_semantic_sorts_by_rating_alias() {
        let index = Arc::new(RecordingIndex::with_sources(catalogue()));
        let ctx = context(ScriptedProvider::new(vec![]), index.clone());

        let envelope = agent_semantic(
            &ctx,
            agent_event(json!([
                {"name": "question", "value": "heist films"},
                {"name": "orderby", "value": "ratings"}
            ])),
        )
        .await;

        let movies: Vec<Movie> = serde_json::from_value(body(&envelope)).unwrap();
        let titles: Vec<&str> = movies.iter().map(|m| m.title()).collect();
        assert_eq!(titles, vec!["Heat", "Nobody", "Ronin"]);
        assert_eq!(movies[0].description.as_deref(), Some("A professional thief"));
        assert_eq!(index.last_body().unwrap()["query"]["knn"]["vector_index"]["k"], 10);
    }

    #[tokio::test]
    async fn test_agent_semantic_defaults_and_unknown_order() {
        let index = Arc::new(RecordingIndex::with_sources(catalogue()));
        let ctx = context(ScriptedProvider::new(vec![]), index.clone());

        let default = agent_semantic(&ctx, agent_event(json!([]))).await;
        let movies: Vec<Movie> = serde_json::from_value(body(&default)).unwrap();
        assert_eq!(movies[0].title(), "Nobody");

        let unsorted = agent_semantic(&ctx, agent_event(json!([{"name": "orderby", "value": "budget"}]))).await;
        let movies: Vec<Movie> = serde_json::from_value(body(&unsorted)).unwrap();
        assert_eq!(movies[0].title(), "Heat");
    }

    #[tokio::test]
    async fn test_agent_index_failure_envelope() {
        let ctx = context(ScriptedProvider::new(vec![]), Arc::new(RecordingIndex::failing()));
        let envelope = agent_semantic(&ctx, agent_event(json!([]))).await;
        assert_eq!(envelope["response"]["httpStatusCode"], 500);
        assert_eq!(body(&envelope)["errorKind"], "RetrievalError");
    }

    #[test]
    fn test_agent_sort_aliases() {
        assert_eq!(agent_sort_field("rating"), Some(SortField::VoteAverage));
        assert_eq!(agent_sort_field("Year"), Some(SortField::Year));
        assert_eq!(agent_sort_field("budget"), None);
    }
}
