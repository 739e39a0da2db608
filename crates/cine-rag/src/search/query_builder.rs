//! Filter and k-NN query construction against the movie index

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::embeddings::{EmbeddingModel, EmbeddingService, InputType};
use crate::error::{RagError, RagResult};
use crate::index::{DocumentIndex, IndexConfig};
use crate::types::{FilterCriterion, Movie};

/// Build the conjunctive filter body.
///
/// Every value of every whitelisted criterion becomes its own `must` clause;
/// criteria on fields outside `allowed_fields` are dropped.
pub fn filter_body(
    criteria: &[FilterCriterion],
    allowed_fields: &[String],
    limit: usize,
    sort_field: &str,
) -> Value {
    let mut must = Vec::new();
    for criterion in criteria {
        if !allowed_fields.iter().any(|f| f == &criterion.field) {
            tracing::debug!(field = %criterion.field, "Dropping filter on unknown field");
            continue;
        }
        for value in criterion.value.values() {
            must.push(json!({
                "match": {
                    criterion.field.as_str(): {
                        "query": value,
                        "operator": "and"
                    }
                }
            }));
        }
    }

    json!({
        "query": { "bool": { "must": must } },
        "size": limit,
        "sort": [ { sort_field: { "order": "desc" } } ]
    })
}

/// Build the k-NN body: exactly `k` neighbours of `vector`, returning only
/// `source_fields`.
pub fn vector_body(vector: &[f32], k: usize, vector_field: &str, source_fields: &[String]) -> Value {
    json!({
        "size": k,
        "query": {
            "knn": {
                vector_field: {
                    "vector": vector,
                    "k": k
                }
            }
        },
        "_source": source_fields
    })
}

/// Runs both query shapes and normalizes hits into [`Movie`]s.
pub struct QueryBuilder {
    index: Arc<dyn DocumentIndex>,
    embeddings: Arc<dyn EmbeddingService>,
    config: IndexConfig,
    timeout: Duration,
    input_type: InputType,
}

impl QueryBuilder {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embeddings: Arc<dyn EmbeddingService>,
        config: IndexConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            embeddings,
            config,
            timeout,
            input_type: InputType::SearchQuery,
        }
    }

    /// Input type sent with query embeddings. Unknown names become `search_query`.
    pub fn with_input_type(mut self, name: &str) -> Self {
        self.input_type = InputType::parse(name);
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Conjunctive filter search, most popular first. Zero hits is `Ok(vec![])`.
    pub async fn filter_query(
        &self,
        criteria: &[FilterCriterion],
        index: &str,
        limit: usize,
    ) -> RagResult<Vec<Movie>> {
        let body = filter_body(criteria, &self.config.data_columns, limit, &self.config.sort_field);
        tracing::debug!(index = index, query = %body, "Filter query");
        self.run("filter query", index, &body).await
    }

    /// Nearest-neighbour search on the embedding of `text`, nearest first.
    pub async fn vector_query(
        &self,
        text: &str,
        index: &str,
        model: EmbeddingModel,
        k: usize,
    ) -> RagResult<Vec<Movie>> {
        if k == 0 {
            return Err(RagError::Validation("k must be greater than 0".into()));
        }

        let start = Instant::now();
        let vector = match tokio::time::timeout(
            self.timeout,
            self.embeddings.embed(text, model, self.input_type),
        )
        .await
        {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => return Err(RagError::retrieval("embedding", e)),
            Err(_) => return Err(RagError::retrieval("embedding", self.timed_out())),
        };
        tracing::debug!(
            model = %model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Embedded query text"
        );

        let body = vector_body(&vector, k, &self.config.vector_field, &self.config.data_columns);
        let mut movies = self.run("vector query", index, &body).await?;
        movies.truncate(k);
        Ok(movies)
    }

    async fn run(&self, stage: &str, index: &str, body: &Value) -> RagResult<Vec<Movie>> {
        let start = Instant::now();
        let response = match tokio::time::timeout(self.timeout, self.index.search(index, body)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(stage = stage, index = index, error = %e, "Index query failed");
                return Err(RagError::retrieval(stage, e));
            }
            Err(_) => {
                tracing::error!(stage = stage, index = index, "Index query timed out");
                return Err(RagError::retrieval(stage, self.timed_out()));
            }
        };

        let movies = response
            .into_sources()
            .into_iter()
            .map(|mut source| {
                if let Some(fields) = source.as_object_mut() {
                    fields.remove(&self.config.vector_field);
                }
                serde_json::from_value::<Movie>(source)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RagError::retrieval(stage, format!("unreadable document: {}", e)))?;

        tracing::info!(
            stage = stage,
            index = index,
            hits = movies.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Index query complete"
        );
        Ok(movies)
    }

    fn timed_out(&self) -> String {
        format!("timed out after {}s", self.timeout.as_secs())
    }
}
