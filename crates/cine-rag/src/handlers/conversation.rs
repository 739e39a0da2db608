//! Routes that talk to the model without a structured search: routing, open
//! questions and the memory-backed chat chain.

use serde::Deserialize;
use serde_json::Value;

use super::{parse_event, respond, RouteContext, RouteResponse};
use crate::error::RagResult;
use crate::llm::{ChatMessage, ConverseOptions};
use crate::memory::{BufferMemory, SessionId};
use crate::rag::{extract_answer, ConversationalRetrievalChain};

#[derive(Debug, Deserialize)]
pub struct RoutingEvent {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub prefill: String,
}

/// Classify the question into a category named by the model.
pub async fn routing(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(route_question(ctx, event).await)
}

async fn route_question(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: RoutingEvent = parse_event(event)?;
    let config = ctx.extraction_config();

    let output = ctx
        .llm
        .converse(
            "routing",
            &event.history,
            &event.question,
            ConverseOptions::new(&event.system_prompt, &config).with_prefill(&event.prefill),
        )
        .await?;

    let mut history = event.history;
    history.push(ChatMessage::user(event.question.as_str()));

    let mut response = match extract_answer(&output.text) {
        Some(category) => {
            let category = category.trim().to_string();
            tracing::info!(category = %category, "Question categorised");
            let mut response = RouteResponse::ok(format!("question is categorised as {}", category));
            response.category = Some(category);
            response
        }
        None => {
            tracing::warn!(reply = %output.text, "Routing reply has no answer tag");
            let mut response = RouteResponse::soft_failure("question could not be categorised");
            response.category = Some(String::new());
            response
        }
    };
    response.history = Some(history);
    Ok(response.question(event.question))
}

#[derive(Debug, Deserialize)]
pub struct OpenEvent {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub system_prompt_open: String,
}

/// Free-form answer with the conversation history, no retrieval.
pub async fn open(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(open_answer(ctx, event).await)
}

async fn open_answer(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: OpenEvent = parse_event(event)?;
    let config = ctx.extraction_config();

    let output = ctx
        .llm
        .converse(
            "open",
            &event.history,
            &event.question,
            ConverseOptions::new(&event.system_prompt_open, &config),
        )
        .await?;

    Ok(answer_or_raw(&output.text).documents(Vec::new()))
}

/// Tagged answer with 200, or the raw reply flagged as a soft failure.
pub(crate) fn answer_or_raw(reply: &str) -> RouteResponse {
    match extract_answer(reply) {
        Some(answer) if !answer.is_empty() => RouteResponse::ok(answer),
        _ => {
            tracing::warn!("Reply has no usable answer tag, returning raw text");
            RouteResponse::soft_failure(reply)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatEvent {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Memory persisted by the caller from an earlier turn.
    #[serde(default)]
    pub memory: Option<BufferMemory>,
    #[serde(default)]
    pub reset: bool,
}

/// One turn of the conversational retrieval chain against a session memory.
pub async fn chat(ctx: &RouteContext, event: Value) -> RouteResponse {
    respond(chat_turn(ctx, event).await)
}

async fn chat_turn(ctx: &RouteContext, event: Value) -> RagResult<RouteResponse> {
    let event: ChatEvent = parse_event(event)?;
    let session = event
        .session_id
        .as_deref()
        .map(SessionId::from)
        .unwrap_or_else(SessionId::generate);

    if let Some(memory) = event.memory {
        ctx.sessions.restore(session.clone(), memory);
    }

    let chain = ConversationalRetrievalChain::new(
        ctx.llm.clone(),
        ctx.search.clone(),
        ctx.index_name(),
        ctx.config.embedding.model,
        ctx.config.chain.clone(),
    )?;

    let handle = ctx.sessions.session(&session);
    let mut memory = handle.lock().await;
    if event.reset {
        memory.reset();
    }

    let answer = chain.run(&event.question, &mut memory).await?;

    let mut response = if answer.soft_failure {
        RouteResponse::soft_failure(answer.answer)
    } else {
        RouteResponse::ok(answer.answer)
    };
    response.optimised_query = answer.optimised_query;
    response.timings = Some(answer.timings);
    response.session_id = Some(session.0.clone());
    response.memory = Some(memory.clone());
    Ok(response.documents(answer.documents).question(event.question))
}
