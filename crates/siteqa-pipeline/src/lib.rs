//! Query-time retrieval pipeline: intent, embedding, retrieval, re-ranking,
//! relevance gating and grounded generation, plus the indexer that feeds it.
pub mod cache;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod indexer;
pub mod intent;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod rerank;
pub mod retriever;
pub mod session;

pub use error::{IndexingError, IndexingResult};
pub use gateway::{EmbeddingGateway, GenerationGateway};
pub use indexer::{open_index, IndexReport, Indexer};
pub use intent::{IntentClassifier, KeywordIntentModel};
pub use models::Models;
pub use orchestrator::Orchestrator;
pub use rerank::{RerankOutcome, Reranker};
pub use retriever::{MetadataFilter, Retriever};
