use crate::cache::EmbeddingCache;
use crate::config::RetrievalConfig;
use crate::error::QueryError;
use crate::models::{CandidateDebug, QueryRequest, QueryResponse};
use crate::planner::plan_query;
use crate::retriever::HybridRetriever;
use crate::synth::AnswerSynthesizer;
use crate::traits::{Embedder, Generator, KeywordIndex, SemanticReranker, VectorIndex};
use tracing::{debug, info};

/// Query-time pipeline: plan, embed (cached), retrieve, synthesize.
pub struct QueryEngine<K, V, R, E, G> {
    config: RetrievalConfig,
    cache: EmbeddingCache<E>,
    retriever: HybridRetriever<K, V, R>,
    synthesizer: AnswerSynthesizer<G>,
}

impl<K, V, R, E, G> QueryEngine<K, V, R, E, G>
where
    K: KeywordIndex + Send + Sync,
    V: VectorIndex + Send + Sync,
    R: SemanticReranker + Send + Sync,
    E: Embedder,
    G: Generator,
{
    pub fn new(
        keyword: K,
        vector: V,
        reranker: R,
        embedder: E,
        generator: G,
        config: RetrievalConfig,
        cache_capacity: usize,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            retriever: HybridRetriever::new(keyword, vector, reranker, config.clone()),
            cache: EmbeddingCache::new(embedder, cache_capacity),
            synthesizer: AnswerSynthesizer::new(generator)?,
            config,
        })
    }

    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(QueryError::Request("question is empty".to_string()));
        }

        let mut plan = plan_query(question, &self.config);
        if let Some(top_k) = request.top_k {
            plan.top_k = top_k;
        }
        debug!(intent = ?plan.intent, top_k = plan.top_k, rerank = plan.rerank, "planned query");

        let query_vector = self.cache.get_or_embed(question).await?;
        let candidates = self.retriever.retrieve(question, &query_vector, &plan).await?;
        info!(candidates = candidates.len(), "retrieval complete");

        let grounded = self.synthesizer.synthesize(question, &candidates).await?;

        Ok(QueryResponse {
            question: question.to_string(),
            answer: grounded.answer,
            citations: grounded.citations,
            intent: plan.intent,
            debug: request
                .debug
                .then(|| candidates.iter().map(CandidateDebug::from_candidate).collect()),
        })
    }
}
