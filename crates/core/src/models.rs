use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identity and provenance of one ingested source document.
///
/// A document is immutable after extraction; re-ingesting the same source
/// supersedes its records in the index rather than mutating them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, the source path relative to the ingestion root.
    pub document_id: String,
    pub source_file: String,
    pub title: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

/// Metadata inferred by the rule-based classifier.
///
/// Every field is independently optional: `None` means "not detected",
/// which is distinct from detected-as-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UnitMetadata {
    /// Document category, e.g. "Atribuição de Classes (AC)".
    pub category: Option<String>,
    /// Kind of legal norm, e.g. "Resolução" or "Portaria Conjunta".
    pub norm_type: Option<String>,
    pub issuing_body: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub school_year: Option<String>,
    /// Phase of the assignment process this span regulates.
    pub process_phase: Option<String>,
    pub program: Option<String>,
    pub audience: Option<String>,
    pub deadline_start: Option<NaiveDate>,
    pub deadline_end: Option<NaiveDate>,
    /// Cited norms, deduplicated, in order of first appearance.
    pub legal_references: Vec<String>,
}

/// One retrievable text span derived from a single document.
///
/// Identity is `(document_id, unit_index)`; concatenating a document's
/// units in index order and trimming `overlap_prev` characters from each
/// unit after the first reconstructs the document text exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub document_id: String,
    pub source_file: String,
    pub doc_title: String,
    pub unit_index: u32,
    pub text: String,
    /// Characters shared with the previous unit.
    pub overlap_prev: usize,
    pub metadata: UnitMetadata,
}

impl Unit {
    /// Index document key: `document_id#chunkN`, matching record identity.
    pub fn record_id(&self) -> String {
        format!("{}#chunk{}", self.document_id, self.unit_index)
    }
}

/// A unit plus its embedding, validated against the index schema and
/// ready for batch submission to the search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// URL-safe key derived from the record id.
    pub key: String,
    pub record_id: String,
    pub document_id: String,
    pub source_file: String,
    pub doc_title: String,
    pub unit_index: u32,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: UnitMetadata,
    pub updated_at: DateTime<Utc>,
}

/// Question intent chosen by the query planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryIntent {
    ShortDefinition,
    Complex,
}

/// Retrieval parameters selected for one question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub intent: QueryIntent,
    pub top_k: usize,
    pub rerank: bool,
}

/// A raw hit from one retrieval signal, before fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalHit {
    pub key: String,
    pub record_id: String,
    pub document_id: String,
    pub source_file: String,
    pub doc_title: String,
    pub unit_index: u32,
    pub text: String,
    pub score: f64,
}

/// Per-query candidate with one slot per retrieval signal.
///
/// Absent signals stay `None`; a missing score is never folded into a
/// zero that would skew the fused ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub key: String,
    pub record_id: String,
    pub document_id: String,
    pub source_file: String,
    pub doc_title: String,
    pub unit_index: u32,
    pub text: String,
    pub vector_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub cooccurrence_boost: f64,
    pub rerank_score: Option<f64>,
    pub fused_score: f64,
}

/// One question against the online pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub top_k: Option<usize>,
    pub debug: bool,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            debug: false,
        }
    }
}

/// Per-candidate signal breakdown, returned only when the request asked
/// for debug output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDebug {
    pub record_id: String,
    pub source_file: String,
    pub vector_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub cooccurrence_boost: f64,
    pub rerank_score: Option<f64>,
    pub fused_score: f64,
}

impl CandidateDebug {
    pub fn from_candidate(candidate: &RetrievalCandidate) -> Self {
        Self {
            record_id: candidate.record_id.clone(),
            source_file: candidate.source_file.clone(),
            vector_score: candidate.vector_score,
            keyword_score: candidate.keyword_score,
            cooccurrence_boost: candidate.cooccurrence_boost,
            rerank_score: candidate.rerank_score,
            fused_score: candidate.fused_score,
        }
    }
}

/// Answer with the source identities the generator actually cited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub answer: String,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    pub citations: Vec<String>,
    pub intent: QueryIntent,
    pub debug: Option<Vec<CandidateDebug>>,
}

/// Query terms used for keyword matching and co-occurrence boosting:
/// lowercase tokens longer than two characters, first appearance kept.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for token in text.split_whitespace() {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if cleaned.chars().count() > 2 && !terms.contains(&cleaned) {
            terms.push(cleaned);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_combines_document_and_unit() {
        let unit = Unit {
            document_id: "docs/AT-2024.txt".to_string(),
            source_file: "docs/AT-2024.txt".to_string(),
            doc_title: "AT-2024".to_string(),
            unit_index: 3,
            text: "texto".to_string(),
            overlap_prev: 0,
            metadata: UnitMetadata::default(),
        };
        assert_eq!(unit.record_id(), "docs/AT-2024.txt#chunk3");
    }

    #[test]
    fn query_terms_drop_short_tokens_and_duplicates() {
        let terms = query_terms("o que é a atribuição de classes? atribuição!");
        assert_eq!(terms, vec!["que".to_string(), "atribuição".to_string(), "classes".to_string()]);
    }
}
