//! Conversational movie recommendation backend.
//!
//! A question goes through route handlers that classify it, extract search
//! parameters with the model, query an OpenSearch movie index (filter or
//! vector search) and answer from the retrieved documents. The `chat` route
//! runs the full retrieval-augmented chain against bounded session memory.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod handlers;
pub mod index;
pub mod llm;
pub mod memory;
pub mod rag;
pub mod search;
pub mod secrets;
pub mod templates;
pub mod types;

pub use config::RagConfig;
pub use error::{RagError, RagResult};
pub use handlers::{dispatch, prepare_config, Route, RouteContext, RouteResponse};
pub use llm::{ApiProvider, GenerationConfig, LLMClient, LLMConfig, ProviderInfo};
pub use memory::{BufferMemory, SessionId, SessionStore};
pub use rag::{ChainAnswer, ChainConfig, ConversationalRetrievalChain};
pub use search::QueryBuilder;
pub use secrets::{EnvSecretStore, FileSecretStore, SecretStore};
pub use templates::PromptTemplate;
pub use types::{FilterCriterion, FilterValue, Movie, SortField};
