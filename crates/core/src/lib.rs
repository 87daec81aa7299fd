pub mod cache;
pub mod chunking;
pub mod classify;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod retriever;
pub mod stores;
pub mod synth;
pub mod traits;

pub use cache::{normalize_query, EmbeddingCache};
pub use chunking::{extract_units, ChunkingConfig};
pub use classify::Classifier;
pub use config::{ClassifierRules, FusionWeights, RetrievalConfig};
pub use embeddings::{AzureOpenAiEmbedder, HashingEmbedder};
pub use error::{IngestError, QueryError};
pub use generation::AzureOpenAiGenerator;
pub use index::{submit_in_batches, FailedUnit, IndexBuilder, IndexReport};
pub use ingest::{
    discover_text_files, ingest_folder, IngestionOptions, IngestionReport, SkippedDocument,
};
pub use models::{
    CandidateDebug, Document, GroundedAnswer, IndexedRecord, QueryIntent, QueryRequest,
    QueryResponse, RetrievalCandidate, RetrievalPlan, SignalHit, Unit, UnitMetadata,
};
pub use orchestrator::QueryEngine;
pub use planner::plan_query;
pub use retriever::HybridRetriever;
pub use stores::AzureSearchStore;
pub use synth::AnswerSynthesizer;
pub use traits::{Embedder, Generator, KeywordIndex, RecordStore, SemanticReranker, VectorIndex};
