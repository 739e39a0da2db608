//! Routes that end in an index query or operate on search results.

use serde::Deserialize;
use serde_json::Value;

use super::conversation::answer_or_raw;
use super::{parse_event, respond, RouteContext, RouteResponse};
use crate::error::RagResult;
use crate::llm::{ChatMessage, ConverseOptions, ToolSchema};
use crate::rag::extract_answer;
use crate::search::{documents_json, sort_documents};
use crate::types::{FilterCriterion, FilterValue, Movie, SortField};

const NO_MOVIE_NAME: &str = "No movie name found in the question or history list.";

#[derive(Debug, Deserialize)]
pub struct StandardSearchEvent {
    pub question: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tool_list: Vec<ToolSchema>,
    #[serde(default)]
    pub number_results: Option<usize>,
}

/// Let the model fill a filter tool, then run the filter query.
pub async fn standard_search(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(filter_search(ctx, event).await)
}

async fn filter_search(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: StandardSearchEvent = parse_event(event)?;
    let limit = event.number_results.unwrap_or(ctx.config.index.default_k);
    let config = ctx.extraction_config();

    let output = ctx
        .llm
        .converse(
            "filter extraction",
            &[],
            &event.question,
            ConverseOptions::new(&event.system_prompt, &config).with_tools(&event.tool_list),
        )
        .await?;

    let Some(tool) = output.tool_use else {
        tracing::warn!(question = %event.question, "Model did not call a filter tool");
        return Ok(RouteResponse::soft_failure("")
            .documents(Vec::new())
            .question(event.question));
    };

    let criteria = FilterCriterion::from_tool_input(&tool.input, &ctx.config.index.data_columns)?;
    tracing::debug!(tool = %tool.name, criteria = criteria.len(), "Extracted filter criteria");

    let movies = ctx.search.filter_query(&criteria, ctx.index_name(), limit).await?;
    Ok(RouteResponse::ok(format!(
        "Here is a list of movies in response to the question:{}",
        event.question
    ))
    .documents(movies)
    .question(event.question))
}

#[derive(Debug, Deserialize)]
pub struct SemanticSearchEvent {
    pub question: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub prefill: String,
    #[serde(default)]
    pub number_results: Option<usize>,
}

/// Rewrite the question into a search query, then run a vector query.
pub async fn semantic_search(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(rewrite_and_search(ctx, event).await)
}

async fn rewrite_and_search(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: SemanticSearchEvent = parse_event(event)?;
    let k = event.number_results.unwrap_or(ctx.config.index.default_k);
    let config = ctx.extraction_config();

    let output = ctx
        .llm
        .converse(
            "query optimisation",
            &[],
            &event.question,
            ConverseOptions::new(&event.system_prompt, &config).with_prefill(&event.prefill),
        )
        .await?;

    let optimised = match extract_answer(&output.text).map(str::trim) {
        Some(query) if !query.is_empty() => query.to_string(),
        _ => {
            tracing::warn!(reply = %output.text, "No optimised query in reply");
            let mut response =
                RouteResponse::soft_failure(format!("Optimising question -{}- failed", event.question))
                    .documents(Vec::new());
            response.optimised_query = Some(String::new());
            return Ok(response.question(event.question));
        }
    };

    let movies = ctx
        .search
        .vector_query(&optimised, ctx.index_name(), ctx.config.embedding.model, k)
        .await?;

    let mut response = RouteResponse::ok(format!(
        "Here is a list of movies in response to the question: {}",
        event.question
    ))
    .documents(movies);
    response.optimised_query = Some(optimised);
    Ok(response.question(event.question))
}

/// Ask the model which movie the user means, using the history when present.
async fn extract_movie_name(
    ctx: &RouteContext,
    question: &str,
    history: &[ChatMessage],
    from_question: &str,
    from_history: &str,
) -> RagResult<Option<String>> {
    let system = if history.is_empty() { from_question } else { from_history };
    let config = ctx.extraction_config();

    let output = ctx
        .llm
        .converse("movie name extraction", history, question, ConverseOptions::new(system, &config))
        .await?;

    let name = extract_answer(&output.text)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    tracing::debug!(movie_name = ?name, "Extracted movie name");
    Ok(name)
}

async fn lookup_title(ctx: &RouteContext, title: &str) -> RagResult<Vec<Movie>> {
    let criteria = [FilterCriterion::new("original_title", FilterValue::One(title.to_string()))];
    ctx.search.filter_query(&criteria, ctx.index_name(), 1).await
}

#[derive(Debug, Deserialize)]
pub struct SimilarEvent {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub system_prompt_similar_from_question: String,
    #[serde(default)]
    pub system_prompt_similar_from_history: String,
    #[serde(default)]
    pub number_results: Option<usize>,
}

/// Movies close to the one the user names, excluding that movie.
pub async fn similar(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(similar_movies(ctx, event).await)
}

async fn similar_movies(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: SimilarEvent = parse_event(event)?;
    let k = event.number_results.unwrap_or(ctx.config.index.default_k);

    let Some(movie_name) = extract_movie_name(
        ctx,
        &event.question,
        &event.history,
        &event.system_prompt_similar_from_question,
        &event.system_prompt_similar_from_history,
    )
    .await?
    else {
        return Ok(RouteResponse::soft_failure(NO_MOVIE_NAME)
            .documents(Vec::new())
            .question(event.question)
            .movie_name(""));
    };

    let found = lookup_title(ctx, &movie_name).await?;
    let source_id = found.first().and_then(|m| m.tmdb_id.clone());
    let query = if found.is_empty() {
        movie_name.clone()
    } else {
        documents_json(&found)
    };

    let mut movies = ctx
        .search
        .vector_query(&query, ctx.index_name(), ctx.config.embedding.model, k + 1)
        .await?;
    if let Some(id) = &source_id {
        movies.retain(|m| m.tmdb_id.as_ref() != Some(id));
    }

    Ok(RouteResponse::ok(format!("Here is a list of movies similar to {}", movie_name))
        .documents(movies)
        .question(event.question)
        .movie_name(movie_name))
}

#[derive(Debug, Deserialize)]
pub struct SpecificEvent {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub system_prompt_extract_movie_from_question: String,
    #[serde(default)]
    pub system_prompt_extract_movie_from_history: String,
    /// `{context}` is replaced by the movie's JSON record.
    #[serde(default)]
    pub system_prompt_specific: String,
}

/// Answer a question about one named movie from its index record.
pub async fn specific(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(specific_answer(ctx, event).await)
}

async fn specific_answer(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: SpecificEvent = parse_event(event)?;

    let Some(movie_name) = extract_movie_name(
        ctx,
        &event.question,
        &event.history,
        &event.system_prompt_extract_movie_from_question,
        &event.system_prompt_extract_movie_from_history,
    )
    .await?
    else {
        return Ok(RouteResponse::soft_failure(NO_MOVIE_NAME)
            .documents(Vec::new())
            .movie_name(""));
    };

    let found = lookup_title(ctx, &movie_name).await?;
    let system = event
        .system_prompt_specific
        .replace("{context}", &documents_json(&found));
    let config = ctx.extraction_config();

    let output = ctx
        .llm
        .converse(
            "specific answer",
            &event.history,
            &event.question,
            ConverseOptions::new(&system, &config),
        )
        .await?;

    Ok(answer_or_raw(&output.text)
        .documents(Vec::new())
        .movie_name(movie_name))
}

#[derive(Debug, Deserialize)]
pub struct SortingEvent {
    pub question: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tool_list: Vec<ToolSchema>,
    #[serde(default)]
    pub list_to_sort: Vec<Value>,
}

/// Let the model choose a sort field and order the supplied list by it.
pub async fn sorting(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(sort_results(ctx, event).await)
}

async fn sort_results(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: SortingEvent = parse_event(event)?;
    let config = ctx.extraction_config();

    let output = ctx
        .llm
        .converse(
            "sort selection",
            &[],
            &event.question,
            ConverseOptions::new(&event.system_prompt, &config).with_tools(&event.tool_list),
        )
        .await?;

    let field = match output
        .tool_use
        .as_ref()
        .and_then(|tool| tool.input.get("sort_by"))
        .and_then(Value::as_str)
    {
        Some(name) => SortField::parse(name)?,
        None => SortField::default(),
    };

    let mut documents = event.list_to_sort;
    sort_documents(&mut documents, field);

    let mut response = RouteResponse::ok(format!(
        "Here is a list of movies corresponding to your question about -{}- sorted by -{}-.",
        event.question,
        field.as_str()
    ))
    .raw_documents(documents);
    response.sorted_by = Some(field.as_str().to_string());
    Ok(response)
}
