//! AdLens daemon: answers free-text questions about advertising campaign
//! performance over a tenant-scoped metrics store.

pub mod cache;
pub mod classifier;
pub mod context;
pub mod embedding_client;
pub mod executor;
pub mod fallback;
pub mod generation_client;
pub mod insights;
pub mod normalizer;
pub mod pipeline;
pub mod responder;
pub mod retriever;
pub mod sql_generator;
pub mod sql_guard;
pub mod store;
pub mod summary;
