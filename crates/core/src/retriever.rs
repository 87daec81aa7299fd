use crate::config::RetrievalConfig;
use crate::error::QueryError;
use crate::models::{query_terms, RetrievalCandidate, RetrievalPlan, SignalHit};
use crate::traits::{KeywordIndex, SemanticReranker, VectorIndex};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Hybrid retrieval over the index capability: concurrent vector and
/// keyword sub-queries, presence-tracked merge, co-occurrence boosting,
/// weighted score fusion, and an optional semantic rerank pass.
pub struct HybridRetriever<K, V, R> {
    keyword: K,
    vector: V,
    reranker: R,
    config: RetrievalConfig,
}

impl<K, V, R> HybridRetriever<K, V, R>
where
    K: KeywordIndex + Send + Sync,
    V: VectorIndex + Send + Sync,
    R: SemanticReranker + Send + Sync,
{
    pub fn new(keyword: K, vector: V, reranker: R, config: RetrievalConfig) -> Self {
        Self {
            keyword,
            vector,
            reranker,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn retrieve(
        &self,
        question: &str,
        query_vector: &[f32],
        plan: &RetrievalPlan,
    ) -> Result<Vec<RetrievalCandidate>, QueryError> {
        let deadline = Duration::from_millis(self.config.stage_timeout_ms);
        let (keyword_result, vector_result) = tokio::join!(
            tokio::time::timeout(deadline, self.keyword.search_keyword(question, plan.top_k)),
            tokio::time::timeout(deadline, self.vector.search_vector(query_vector, plan.top_k)),
        );

        // A timed-out signal degrades to the one that returned; a hard
        // backend error still fails the request.
        let keyword_hits = match keyword_result {
            Ok(hits) => Some(hits?),
            Err(_) => {
                warn!(signal = "keyword", "retrieval signal timed out, degrading");
                None
            }
        };
        let vector_hits = match vector_result {
            Ok(hits) => Some(hits?),
            Err(_) => {
                warn!(signal = "vector", "retrieval signal timed out, degrading");
                None
            }
        };
        if keyword_hits.is_none() && vector_hits.is_none() {
            return Err(QueryError::RetrievalTimeout {
                signal: "keyword+vector".to_string(),
            });
        }

        let mut candidates = merge_signals(
            keyword_hits.unwrap_or_default(),
            vector_hits.unwrap_or_default(),
        );

        let terms = query_terms(question);
        for candidate in &mut candidates {
            candidate.cooccurrence_boost =
                cooccurrence_boost(&candidate.text, &terms, self.config.proximity_window);
        }
        fuse_scores(&mut candidates, &self.config);

        if plan.rerank && !candidates.is_empty() {
            self.apply_rerank(question, &mut candidates, plan.top_k).await;
        }

        candidates.truncate(plan.top_k);
        Ok(candidates)
    }

    /// Re-orders the top fused candidates by the backend's rerank signal.
    /// Reorder-only: keys the backend does not score keep their fused
    /// order behind the scored ones, and a rerank failure degrades to the
    /// fused ranking.
    async fn apply_rerank(
        &self,
        question: &str,
        candidates: &mut [RetrievalCandidate],
        top_k: usize,
    ) {
        let window = self.config.rerank_top_n.min(top_k).min(candidates.len());
        let keys: Vec<String> = candidates[..window]
            .iter()
            .map(|candidate| candidate.key.clone())
            .collect();

        let scores = match self.reranker.rerank(question, &keys, window).await {
            Ok(scores) => scores,
            Err(error) => {
                warn!(error = %error, "semantic rerank failed, keeping fused order");
                return;
            }
        };

        let by_key: HashMap<&str, f64> = scores
            .iter()
            .map(|(key, score)| (key.as_str(), *score))
            .collect();
        for candidate in candidates[..window].iter_mut() {
            candidate.rerank_score = by_key.get(candidate.key.as_str()).copied();
        }
        candidates[..window].sort_by(|left, right| match (left.rerank_score, right.rerank_score) {
            (Some(l), Some(r)) => r.total_cmp(&l),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }
}

/// Unions both result sets by record key. A record present in both carries
/// both scores; one present in a single signal keeps `None` for the other,
/// so the fusion stage can weigh actual evidence instead of invented zeros.
fn merge_signals(keyword_hits: Vec<SignalHit>, vector_hits: Vec<SignalHit>) -> Vec<RetrievalCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, RetrievalCandidate> = HashMap::new();

    let mut absorb = |hit: SignalHit, is_keyword: bool| {
        let entry = merged.entry(hit.key.clone()).or_insert_with(|| {
            order.push(hit.key.clone());
            RetrievalCandidate {
                key: hit.key.clone(),
                record_id: hit.record_id.clone(),
                document_id: hit.document_id.clone(),
                source_file: hit.source_file.clone(),
                doc_title: hit.doc_title.clone(),
                unit_index: hit.unit_index,
                text: hit.text.clone(),
                vector_score: None,
                keyword_score: None,
                cooccurrence_boost: 0.0,
                rerank_score: None,
                fused_score: 0.0,
            }
        });
        if entry.text.is_empty() {
            entry.text = hit.text;
        }
        if is_keyword {
            entry.keyword_score = Some(hit.score);
        } else {
            entry.vector_score = Some(hit.score);
        }
    };

    for hit in keyword_hits {
        absorb(hit, true);
    }
    for hit in vector_hits {
        absorb(hit, false);
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

/// Fraction of distinct query terms co-located within `window` chars of
/// the candidate text. Recovers lexically relevant passages the vector
/// signal scores poorly.
fn cooccurrence_boost(text: &str, terms: &[String], window: usize) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let lowered = text.to_lowercase();
    let mut positions: Vec<(usize, usize)> = Vec::new();
    for (term_id, term) in terms.iter().enumerate() {
        for (position, _) in lowered.match_indices(term.as_str()) {
            positions.push((position, term_id));
        }
    }
    if positions.is_empty() {
        return 0.0;
    }
    positions.sort_unstable();

    let mut best = 0usize;
    let mut term_counts: HashMap<usize, usize> = HashMap::new();
    let mut left = 0;
    for right in 0..positions.len() {
        *term_counts.entry(positions[right].1).or_insert(0) += 1;
        while positions[right].0 - positions[left].0 > window {
            if let Some(count) = term_counts.get_mut(&positions[left].1) {
                *count -= 1;
                if *count == 0 {
                    term_counts.remove(&positions[left].1);
                }
            }
            left += 1;
        }
        best = best.max(term_counts.len());
    }

    best as f64 / terms.len() as f64
}

/// Weighted sum of max-normalized signal scores plus the co-occurrence
/// boost. Sorting is stable, so equal fused scores keep merge order and
/// the ranking stays deterministic for identical inputs.
fn fuse_scores(candidates: &mut Vec<RetrievalCandidate>, config: &RetrievalConfig) {
    let max_keyword = candidates
        .iter()
        .filter_map(|c| c.keyword_score)
        .fold(0.0_f64, f64::max);
    let max_vector = candidates
        .iter()
        .filter_map(|c| c.vector_score)
        .fold(0.0_f64, f64::max);

    for candidate in candidates.iter_mut() {
        let mut fused = 0.0;
        if let Some(score) = candidate.vector_score {
            if max_vector > 0.0 {
                fused += config.weights.vector * (score / max_vector);
            }
        }
        if let Some(score) = candidate.keyword_score {
            if max_keyword > 0.0 {
                fused += config.weights.keyword * (score / max_keyword);
            }
        }
        fused += config.weights.cooccurrence * candidate.cooccurrence_boost;
        candidate.fused_score = fused;
    }

    candidates.sort_by(|left, right| right.fused_score.total_cmp(&left.fused_score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryIntent, RetrievalPlan};
    use async_trait::async_trait;
    use std::time::Duration;

    fn hit(key: &str, score: f64, text: &str) -> SignalHit {
        SignalHit {
            key: key.to_string(),
            record_id: format!("docs/{key}.txt#chunk0"),
            document_id: format!("docs/{key}.txt"),
            source_file: format!("docs/{key}.txt"),
            doc_title: key.to_string(),
            unit_index: 0,
            text: text.to_string(),
            score,
        }
    }

    fn plan(top_k: usize, rerank: bool) -> RetrievalPlan {
        RetrievalPlan {
            intent: QueryIntent::Complex,
            top_k,
            rerank,
        }
    }

    struct FakeKeyword {
        hits: Vec<SignalHit>,
        delay: Duration,
    }

    struct FakeVector {
        hits: Vec<SignalHit>,
        delay: Duration,
    }

    struct FakeReranker {
        scores: Vec<(String, f64)>,
        fail: bool,
    }

    #[async_trait]
    impl KeywordIndex for FakeKeyword {
        async fn search_keyword(&self, _text: &str, _k: usize) -> Result<Vec<SignalHit>, QueryError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.hits.clone())
        }
    }

    #[async_trait]
    impl VectorIndex for FakeVector {
        async fn search_vector(&self, _v: &[f32], _k: usize) -> Result<Vec<SignalHit>, QueryError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.hits.clone())
        }
    }

    #[async_trait]
    impl SemanticReranker for FakeReranker {
        async fn rerank(
            &self,
            _question: &str,
            _keys: &[String],
            _top_k: usize,
        ) -> Result<Vec<(String, f64)>, QueryError> {
            if self.fail {
                return Err(QueryError::Backend {
                    backend: "fake".to_string(),
                    details: "rerank down".to_string(),
                });
            }
            Ok(self.scores.clone())
        }
    }

    fn retriever(
        keyword_hits: Vec<SignalHit>,
        vector_hits: Vec<SignalHit>,
        reranker: FakeReranker,
        config: RetrievalConfig,
    ) -> HybridRetriever<FakeKeyword, FakeVector, FakeReranker> {
        HybridRetriever::new(
            FakeKeyword {
                hits: keyword_hits,
                delay: Duration::ZERO,
            },
            FakeVector {
                hits: vector_hits,
                delay: Duration::ZERO,
            },
            reranker,
            config,
        )
    }

    fn no_rerank() -> FakeReranker {
        FakeReranker {
            scores: Vec::new(),
            fail: false,
        }
    }

    #[tokio::test]
    async fn record_in_both_signals_outranks_single_signal_records() {
        let engine = retriever(
            vec![hit("b", 5.0, "só keyword"), hit("a", 4.0, "ambos os sinais")],
            vec![hit("c", 0.9, "só vetor"), hit("a", 0.8, "ambos os sinais")],
            no_rerank(),
            RetrievalConfig::default(),
        );

        let result = engine
            .retrieve("prazo inscrição", &[0.0; 4], &plan(10, false))
            .await
            .expect("retrieval succeeds");

        assert_eq!(result[0].key, "a");
        assert!(result[0].vector_score.is_some());
        assert!(result[0].keyword_score.is_some());
        // Single-signal records keep an absent slot, not a zero.
        let b = result.iter().find(|c| c.key == "b").expect("b present");
        assert!(b.vector_score.is_none());
    }

    #[tokio::test]
    async fn cooccurrence_recovers_lexically_relevant_candidates() {
        let near = "O prazo de inscrição vai até sexta-feira.";
        let far = format!("prazo {} inscrição", "x".repeat(400));
        assert!(
            cooccurrence_boost(near, &query_terms("prazo inscrição"), 120)
                > cooccurrence_boost(&far, &query_terms("prazo inscrição"), 120)
        );
        assert_eq!(cooccurrence_boost("nada relevante aqui", &query_terms("prazo"), 120), 0.0);
    }

    #[tokio::test]
    async fn timed_out_signal_degrades_to_the_other() {
        let mut config = RetrievalConfig::default();
        config.stage_timeout_ms = 20;

        let engine = HybridRetriever::new(
            FakeKeyword {
                hits: vec![hit("k", 1.0, "keyword")],
                delay: Duration::from_millis(200),
            },
            FakeVector {
                hits: vec![hit("v", 0.9, "vetor")],
                delay: Duration::ZERO,
            },
            no_rerank(),
            config,
        );

        let result = engine
            .retrieve("pergunta", &[0.0; 4], &plan(5, false))
            .await
            .expect("degraded retrieval succeeds");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key, "v");
    }

    #[tokio::test]
    async fn both_signals_timing_out_is_a_retrieval_timeout() {
        let mut config = RetrievalConfig::default();
        config.stage_timeout_ms = 20;

        let engine = HybridRetriever::new(
            FakeKeyword {
                hits: Vec::new(),
                delay: Duration::from_millis(200),
            },
            FakeVector {
                hits: Vec::new(),
                delay: Duration::from_millis(200),
            },
            no_rerank(),
            config,
        );

        let result = engine.retrieve("pergunta", &[0.0; 4], &plan(5, false)).await;
        assert!(matches!(result, Err(QueryError::RetrievalTimeout { .. })));
    }

    #[tokio::test]
    async fn rerank_reorders_without_adding_candidates() {
        let reranker = FakeReranker {
            scores: vec![("b".to_string(), 0.9), ("a".to_string(), 0.2)],
            fail: false,
        };
        let engine = retriever(
            vec![hit("a", 5.0, "primeiro por fusão"), hit("b", 1.0, "segundo por fusão")],
            Vec::new(),
            reranker,
            RetrievalConfig::default(),
        );

        let result = engine
            .retrieve("pergunta longa e composta", &[0.0; 4], &plan(5, true))
            .await
            .expect("retrieval succeeds");

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].key, "b");
        assert_eq!(result[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn rerank_failure_keeps_fused_order() {
        let engine = retriever(
            vec![hit("a", 5.0, "primeiro"), hit("b", 1.0, "segundo")],
            Vec::new(),
            FakeReranker {
                scores: Vec::new(),
                fail: true,
            },
            RetrievalConfig::default(),
        );

        let result = engine
            .retrieve("pergunta", &[0.0; 4], &plan(5, true))
            .await
            .expect("retrieval succeeds");
        assert_eq!(result[0].key, "a");
    }

    #[tokio::test]
    async fn equal_scores_preserve_merge_order() {
        let engine = retriever(
            vec![hit("x", 2.0, "texto"), hit("y", 2.0, "texto")],
            Vec::new(),
            no_rerank(),
            RetrievalConfig::default(),
        );

        let result = engine
            .retrieve("consulta", &[0.0; 4], &plan(5, false))
            .await
            .expect("retrieval succeeds");
        assert_eq!(result[0].key, "x");
        assert_eq!(result[1].key, "y");
    }

    #[tokio::test]
    async fn result_length_respects_top_k() {
        let hits: Vec<SignalHit> = (0..10)
            .map(|i| hit(&format!("k{i}"), 10.0 - i as f64, "texto"))
            .collect();
        let engine = retriever(hits, Vec::new(), no_rerank(), RetrievalConfig::default());

        let result = engine
            .retrieve("consulta", &[0.0; 4], &plan(3, false))
            .await
            .expect("retrieval succeeds");
        assert_eq!(result.len(), 3);
    }
}
