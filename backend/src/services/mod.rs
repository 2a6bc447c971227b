pub mod dedup;
pub mod framer;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod search_provider;
pub mod store;
pub mod vector_index;
