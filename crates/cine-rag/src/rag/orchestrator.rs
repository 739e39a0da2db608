//! Conversational retrieval chain
//!
//! One turn runs as a fixed sequence of remote calls:
//!
//! ```text
//! decide ──yes──> rewrite ──> retrieve ──> generate ──> commit
//!    └────no / absent tag────────────────────┘
//! ```
//!
//! Any model or index failure aborts the turn; memory is only written at the
//! commit step.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::tag_extractor::{extract_answer, parse_yes_no, YesNo};
use crate::embeddings::EmbeddingModel;
use crate::error::{RagError, RagResult};
use crate::llm::{ConverseOptions, GenerationConfig, LLMClient};
use crate::memory::BufferMemory;
use crate::search::{format_context, QueryBuilder};
use crate::templates::PromptTemplate;
use crate::types::Movie;

const DECISION_VARIABLES: [&str; 2] = ["question", "memory"];
const MAIN_VARIABLES: [&str; 3] = ["context", "question", "chat_history"];

/// Whether a turn asks the model before retrieving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Decide,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub decision_prompt: PromptTemplate,
    pub rewrite_prompt: PromptTemplate,
    pub main_prompt: PromptTemplate,
    pub retrieval: RetrievalMode,
    /// When false the question itself is embedded.
    pub rewrite_query: bool,
    pub k: usize,
    /// Final answer settings; decision and rewrite reuse them with their own temperature.
    pub generation: GenerationConfig,
    pub decision_temperature: f32,
    pub rewrite_temperature: f32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            decision_prompt: PromptTemplate::new(
                "Here is the conversation so far:\n<memory>\n{memory}\n</memory>\n\n\
                 Here is the new question:\n<question>\n{question}\n</question>\n\n\
                 Does answering this question require searching the movie database? \
                 Reply with yes or no inside <answer></answer> tags.",
                DECISION_VARIABLES,
            )
            .with_system_prompt(
                "You decide whether a question about movies needs a lookup in a movie database.",
            )
            .with_prefill("<answer>"),
            rewrite_prompt: PromptTemplate::new(
                "Here is the conversation so far:\n<memory>\n{memory}\n</memory>\n\n\
                 Here is the new question:\n<question>\n{question}\n</question>\n\n\
                 Rewrite the question as a short search query describing the movies the user \
                 is looking for (genres, themes, plot elements). Put the query inside \
                 <answer></answer> tags.",
                DECISION_VARIABLES,
            )
            .with_system_prompt("You turn movie questions into semantic search queries.")
            .with_prefill("<answer>"),
            main_prompt: PromptTemplate::new(
                "Here are movies from the database that may help:\n<context>\n{context}</context>\n\n\
                 Here is the conversation so far:\n<history>\n{chat_history}</history>\n\n\
                 Answer the question below. Only recommend movies you are confident exist, \
                 prefer the ones in the context, and put your answer inside <answer></answer> tags.\n\
                 <question>\n{question}\n</question>",
                MAIN_VARIABLES,
            )
            .with_system_prompt("You are a friendly movie expert helping users find films to watch.")
            .with_prefill("<answer>"),
            retrieval: RetrievalMode::Decide,
            rewrite_query: true,
            k: 10,
            generation: GenerationConfig::default(),
            decision_temperature: 0.0,
            rewrite_temperature: 0.5,
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> RagResult<()> {
        if self.k == 0 {
            return Err(RagError::Configuration("chain.k must be > 0".into()));
        }
        self.generation.validate()?;

        let prompts = [
            ("decision_prompt", &self.decision_prompt, &DECISION_VARIABLES[..]),
            ("rewrite_prompt", &self.rewrite_prompt, &DECISION_VARIABLES[..]),
            ("main_prompt", &self.main_prompt, &MAIN_VARIABLES[..]),
        ];
        for (name, prompt, supplied) in prompts {
            if let Some(var) = prompt
                .input_variables()
                .iter()
                .find(|v| !supplied.contains(&v.as_str()))
            {
                return Err(RagError::Configuration(format!(
                    "{} requires variable '{}' which the chain does not supply",
                    name, var
                )));
            }
        }
        Ok(())
    }

    fn stage_config(&self, temperature: f32) -> GenerationConfig {
        self.generation.clone().with_temperature(temperature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStage {
    Deciding,
    Rewriting,
    Retrieving,
    Generating,
}

impl ChainStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deciding => "decision",
            Self::Rewriting => "rewrite",
            Self::Retrieving => "retrieval",
            Self::Generating => "generation",
        }
    }
}

/// Wall-clock time spent in each stage that ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub decision_ms: Option<u64>,
    pub rewrite_ms: Option<u64>,
    pub retrieval_ms: Option<u64>,
    pub generation_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainAnswer {
    pub answer: String,
    /// The model replied without an `answer` tag; `answer` is its raw text.
    pub soft_failure: bool,
    pub retrieval_used: bool,
    pub optimised_query: Option<String>,
    pub documents: Vec<Movie>,
    pub timings: StageTimings,
}

/// Decision → rewrite → retrieve → generate over one session's memory.
pub struct ConversationalRetrievalChain {
    llm: LLMClient,
    search: Arc<QueryBuilder>,
    index_name: String,
    embedding_model: EmbeddingModel,
    config: ChainConfig,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

impl ConversationalRetrievalChain {
    pub fn new(
        llm: LLMClient,
        search: Arc<QueryBuilder>,
        index_name: impl Into<String>,
        embedding_model: EmbeddingModel,
        config: ChainConfig,
    ) -> RagResult<Self> {
        config.validate()?;
        Ok(Self {
            llm,
            search,
            index_name: index_name.into(),
            embedding_model,
            config,
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Answer `question` and, on success, record it in `memory`.
    pub async fn run(&self, question: &str, memory: &mut BufferMemory) -> RagResult<ChainAnswer> {
        let turn_start = Instant::now();
        let mut timings = StageTimings::default();
        let transcript = memory.render();

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("question", question.to_string());
        vars.insert("memory", transcript.clone());

        let retrieve = match self.config.retrieval {
            RetrievalMode::Always => true,
            RetrievalMode::Never => false,
            RetrievalMode::Decide => {
                let start = Instant::now();
                let decision = self.decide(&vars).await?;
                timings.decision_ms = Some(elapsed_ms(start));
                decision
            }
        };

        let mut documents = Vec::new();
        let mut optimised_query = None;
        if retrieve {
            let query = if self.config.rewrite_query {
                let start = Instant::now();
                let query = self.rewrite(question, &vars).await?;
                timings.rewrite_ms = Some(elapsed_ms(start));
                query
            } else {
                question.to_string()
            };

            let start = Instant::now();
            documents = self
                .search
                .vector_query(&query, &self.index_name, self.embedding_model, self.config.k)
                .await?;
            timings.retrieval_ms = Some(elapsed_ms(start));
            optimised_query = Some(query);
        }

        vars.insert("context", format_context(&documents));
        vars.insert("chat_history", transcript);

        let start = Instant::now();
        let prompt = &self.config.main_prompt;
        let reply = self
            .call(ChainStage::Generating, prompt, &vars, &self.config.generation)
            .await?;
        timings.generation_ms = elapsed_ms(start);

        let (answer, soft_failure) = match extract_answer(&reply) {
            Some(answer) => (answer.to_string(), false),
            None => {
                tracing::warn!(question = question, "Final reply has no answer tag, returning raw text");
                (reply.clone(), true)
            }
        };

        memory.append(question, answer.clone());

        tracing::info!(
            retrieval = retrieve,
            documents = documents.len(),
            soft_failure = soft_failure,
            elapsed_ms = elapsed_ms(turn_start),
            "Chain turn complete"
        );

        Ok(ChainAnswer {
            answer,
            soft_failure,
            retrieval_used: retrieve,
            optimised_query,
            documents,
            timings,
        })
    }

    async fn decide(&self, vars: &HashMap<&str, String>) -> RagResult<bool> {
        let config = self.config.stage_config(self.config.decision_temperature);
        let reply = self
            .call(ChainStage::Deciding, &self.config.decision_prompt, vars, &config)
            .await?;

        match parse_yes_no(&reply) {
            YesNo::Yes => Ok(true),
            YesNo::No => Ok(false),
            YesNo::Absent => {
                // Open policy: an untagged decision means no retrieval.
                tracing::warn!(reply = %reply, "Decision reply has no answer tag, skipping retrieval");
                Ok(false)
            }
        }
    }

    async fn rewrite(&self, question: &str, vars: &HashMap<&str, String>) -> RagResult<String> {
        let config = self.config.stage_config(self.config.rewrite_temperature);
        let reply = self
            .call(ChainStage::Rewriting, &self.config.rewrite_prompt, vars, &config)
            .await?;

        match extract_answer(&reply).map(str::trim) {
            Some(query) if !query.is_empty() => {
                tracing::info!(original = question, optimised = query, "Rewrote retrieval query");
                Ok(query.to_string())
            }
            _ => {
                tracing::warn!(reply = %reply, "Rewrite reply has no usable answer tag, searching with the question");
                Ok(question.to_string())
            }
        }
    }

    /// Render the prompt and send it with the template's prefill forced as
    /// the start of the reply. The returned text begins with the prefill.
    async fn call(
        &self,
        stage: ChainStage,
        template: &PromptTemplate,
        vars: &HashMap<&str, String>,
        config: &GenerationConfig,
    ) -> RagResult<String> {
        let prompt = template.render(vars)?;
        let options = ConverseOptions::new(template.system_prompt(), config)
            .with_prefill(template.prefill().unwrap_or_default());
        let output = self
            .llm
            .converse(stage.as_str(), &[], &prompt, options)
            .await?;
        Ok(output.text)
    }
}
