//! # faq-store — similarity-search FAQ store
//!
//! Stores question/answer pairs with their embeddings in SQLite + sqlite-vec
//! and answers nearest-neighbor queries for the résumé/job matching service's
//! FAQ assistant.
//!
//! ## Architecture
//!
//! - **[`config`]** — JSON configuration, environment overrides, validation
//! - **[`db`]** — connections, r2d2 pooling, startup wait, schema, collections
//! - **[`store`]** — [`store::DocumentStore`] lifecycle, `insert`/`query_by_similarity`/`close`
//! - **[`corpus`]** — chunked reader for the seed corpus file
//! - **[`embedder`]** — embedding trait, Ollama client, mock
//! - **[`llm`]** — chat-completion collaborator with lenient JSON extraction

pub mod config;
pub mod corpus;
pub mod db;
pub mod embedder;
pub mod llm;
pub mod store;
