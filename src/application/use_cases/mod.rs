pub mod chat_pipeline;
pub mod conversation_service;
pub mod embedding_service;
pub mod prompt_templates;
pub mod query_executor;
pub mod schema_index;
pub mod schema_introspector;
pub mod sql_generator;
pub mod sql_guard;
pub mod vector_index;

#[cfg(test)]
pub(crate) mod test_support;
