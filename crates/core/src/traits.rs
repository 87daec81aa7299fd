use crate::error::{IngestError, QueryError};
use crate::models::{IndexedRecord, SignalHit};
use async_trait::async_trait;

/// Write path of the index capability: accepts validated record batches.
#[async_trait]
pub trait RecordStore {
    async fn upload_records(&self, records: &[IndexedRecord]) -> Result<(), IngestError>;
}

/// Keyword (lexical) read path of the index capability.
#[async_trait]
pub trait KeywordIndex {
    async fn search_keyword(&self, text: &str, top_k: usize) -> Result<Vec<SignalHit>, QueryError>;
}

/// Vector-similarity read path of the index capability.
#[async_trait]
pub trait VectorIndex {
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SignalHit>, QueryError>;
}

/// Semantic re-ranking over an already-retrieved candidate subset.
/// Returns `(record key, rerank score)` pairs; keys the backend does not
/// score keep their fused order. Never introduces new candidates.
#[async_trait]
pub trait SemanticReranker {
    async fn rerank(
        &self,
        question: &str,
        keys: &[String],
        top_k: usize,
    ) -> Result<Vec<(String, f64)>, QueryError>;
}

/// Embedding capability: text in, fixed-dimensionality vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, QueryError>;

    /// Batch form for ingestion; the default loops over `embed`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Text-generation capability: structured prompt in, answer text out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String, QueryError>;
}
