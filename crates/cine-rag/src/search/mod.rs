pub mod context;
pub mod list_literal;
pub mod query_builder;
pub mod sort;

pub use context::{documents_json, format_context};
pub use query_builder::{filter_body, vector_body, QueryBuilder};
pub use sort::{sort_documents, sort_movies};
