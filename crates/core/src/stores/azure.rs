use crate::error::{IngestError, QueryError};
use crate::models::{IndexedRecord, SignalHit};
use crate::traits::{KeywordIndex, RecordStore, SemanticReranker, VectorIndex};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

const API_VERSION: &str = "2023-11-01";
const SEMANTIC_CONFIGURATION: &str = "regqa-semantic";
const SELECT_FIELDS: &str = "id, record_id, document_id, source_file, doc_title, chunk, text";

/// Azure AI Search backend: one index serves the keyword, vector and
/// semantic-rerank read paths plus the batched write path.
#[derive(Clone)]
pub struct AzureSearchStore {
    client: Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    vector_dimensions: usize,
}

impl AzureSearchStore {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        index_name: impl Into<String>,
        vector_dimensions: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            index_name: index_name.into(),
            vector_dimensions,
        }
    }

    fn index_url(&self, suffix: &str) -> String {
        format!(
            "{}/indexes/{}{}?api-version={}",
            self.endpoint, self.index_name, suffix, API_VERSION
        )
    }

    /// Creates or updates the index definition: pt-BR lexical analyzer on
    /// the searchable text fields, an HNSW vector profile at the
    /// configured dimensionality, and a semantic configuration for the
    /// rerank read path.
    pub async fn ensure_index(&self) -> Result<(), IngestError> {
        let definition = json!({
            "name": self.index_name,
            "fields": [
                {"name": "id", "type": "Edm.String", "key": true, "searchable": false},
                {"name": "record_id", "type": "Edm.String", "searchable": false},
                {"name": "text", "type": "Edm.String", "searchable": true, "analyzer": "pt-BR.microsoft"},
                {
                    "name": "content_vector",
                    "type": "Collection(Edm.Single)",
                    "searchable": true,
                    "dimensions": self.vector_dimensions,
                    "vectorSearchProfile": "vprofile"
                },
                {"name": "chunk", "type": "Edm.Int32", "filterable": true, "searchable": false},
                {"name": "doc_title", "type": "Edm.String", "searchable": true, "analyzer": "pt-BR.microsoft"},
                {"name": "document_id", "type": "Edm.String", "filterable": true, "searchable": false},
                {"name": "source_file", "type": "Edm.String", "filterable": true, "searchable": false},
                {"name": "category", "type": "Edm.String", "filterable": true, "facetable": true, "searchable": false},
                {"name": "norm_type", "type": "Edm.String", "filterable": true, "facetable": true, "searchable": false},
                {"name": "issuing_body", "type": "Edm.String", "filterable": true, "facetable": true, "searchable": false},
                {"name": "publication_date", "type": "Edm.DateTimeOffset", "filterable": true, "sortable": true, "searchable": false},
                {"name": "school_year", "type": "Edm.String", "filterable": true, "facetable": true, "searchable": false},
                {"name": "process_phase", "type": "Edm.String", "filterable": true, "facetable": true, "searchable": false},
                {"name": "program", "type": "Edm.String", "filterable": true, "facetable": true, "searchable": false},
                {"name": "audience", "type": "Edm.String", "filterable": true, "facetable": true, "searchable": false},
                {"name": "deadline_start", "type": "Edm.DateTimeOffset", "filterable": true, "sortable": true, "searchable": false},
                {"name": "deadline_end", "type": "Edm.DateTimeOffset", "filterable": true, "sortable": true, "searchable": false},
                {"name": "legal_references", "type": "Collection(Edm.String)", "filterable": true, "facetable": true, "searchable": false},
                {"name": "updated_at", "type": "Edm.DateTimeOffset", "filterable": true, "searchable": false}
            ],
            "vectorSearch": {
                "algorithms": [{"name": "hnsw", "kind": "hnsw"}],
                "profiles": [{"name": "vprofile", "algorithm": "hnsw"}]
            },
            "semantic": {
                "configurations": [{
                    "name": SEMANTIC_CONFIGURATION,
                    "prioritizedFields": {
                        "titleField": {"fieldName": "doc_title"},
                        "prioritizedContentFields": [{"fieldName": "text"}],
                        "prioritizedKeywordsFields": [
                            {"fieldName": "category"},
                            {"fieldName": "norm_type"},
                            {"fieldName": "issuing_body"},
                            {"fieldName": "school_year"},
                            {"fieldName": "process_phase"},
                            {"fieldName": "program"},
                            {"fieldName": "audience"}
                        ]
                    }
                }]
            }
        });

        let response = self
            .client
            .put(self.index_url(""))
            .header("api-key", &self.api_key)
            .json(&definition)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Backend {
                backend: "azure-search".to_string(),
                details: format!("index setup failed with {}", response.status()),
            });
        }
        Ok(())
    }

    async fn run_search(&self, payload: Value) -> Result<Vec<Value>, QueryError> {
        let response = self
            .client
            .post(self.index_url("/docs/search"))
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::Backend {
                backend: "azure-search".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        Ok(body
            .pointer("/value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

fn record_document(record: &IndexedRecord) -> Value {
    let mut fields = Map::new();
    fields.insert("@search.action".to_string(), json!("mergeOrUpload"));
    fields.insert("id".to_string(), json!(record.key));
    fields.insert("record_id".to_string(), json!(record.record_id));
    fields.insert("text".to_string(), json!(record.text));
    fields.insert("content_vector".to_string(), json!(record.vector));
    fields.insert("chunk".to_string(), json!(record.unit_index));
    fields.insert("doc_title".to_string(), json!(record.doc_title));
    fields.insert("document_id".to_string(), json!(record.document_id));
    fields.insert("source_file".to_string(), json!(record.source_file));
    fields.insert("legal_references".to_string(), json!(record.metadata.legal_references));
    fields.insert("updated_at".to_string(), json!(record.updated_at.to_rfc3339()));

    // Optional metadata: absent fields are omitted entirely, never sent
    // as empty sentinels.
    let optional_strings = [
        ("category", &record.metadata.category),
        ("norm_type", &record.metadata.norm_type),
        ("issuing_body", &record.metadata.issuing_body),
        ("school_year", &record.metadata.school_year),
        ("process_phase", &record.metadata.process_phase),
        ("program", &record.metadata.program),
        ("audience", &record.metadata.audience),
    ];
    for (name, value) in optional_strings {
        if let Some(value) = value {
            fields.insert(name.to_string(), json!(value));
        }
    }
    let optional_dates = [
        ("publication_date", &record.metadata.publication_date),
        ("deadline_start", &record.metadata.deadline_start),
        ("deadline_end", &record.metadata.deadline_end),
    ];
    for (name, value) in optional_dates {
        if let Some(date) = value {
            fields.insert(name.to_string(), json!(format!("{date}T00:00:00Z")));
        }
    }

    Value::Object(fields)
}

fn signal_hit(raw: &Value, score_field: &str) -> SignalHit {
    let text_of = |field: &str| {
        raw.pointer(&format!("/{field}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    SignalHit {
        key: text_of("id"),
        record_id: text_of("record_id"),
        document_id: text_of("document_id"),
        source_file: text_of("source_file"),
        doc_title: text_of("doc_title"),
        unit_index: raw
            .pointer("/chunk")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32,
        text: text_of("text"),
        score: raw
            .pointer(&format!("/{score_field}"))
            .and_then(Value::as_f64)
            .unwrap_or_default(),
    }
}

#[async_trait]
impl RecordStore for AzureSearchStore {
    async fn upload_records(&self, records: &[IndexedRecord]) -> Result<(), IngestError> {
        if records.is_empty() {
            return Ok(());
        }

        for record in records {
            if record.vector.len() != self.vector_dimensions {
                return Err(IngestError::SchemaViolation {
                    document_id: record.document_id.clone(),
                    unit_index: record.unit_index,
                    details: format!(
                        "vector dimensionality {} does not match index {}",
                        record.vector.len(),
                        self.vector_dimensions
                    ),
                });
            }
        }

        let payload = json!({
            "value": records.iter().map(record_document).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(self.index_url("/docs/index"))
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Backend {
                backend: "azure-search".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeywordIndex for AzureSearchStore {
    async fn search_keyword(&self, text: &str, top_k: usize) -> Result<Vec<SignalHit>, QueryError> {
        let hits = self
            .run_search(json!({
                "search": text,
                "top": top_k,
                "select": SELECT_FIELDS,
            }))
            .await?;
        Ok(hits.iter().map(|raw| signal_hit(raw, "@search.score")).collect())
    }
}

#[async_trait]
impl VectorIndex for AzureSearchStore {
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SignalHit>, QueryError> {
        if query_vector.len() != self.vector_dimensions {
            return Err(QueryError::Request(format!(
                "query vector dimensionality {} does not match index {}",
                query_vector.len(),
                self.vector_dimensions
            )));
        }

        let hits = self
            .run_search(json!({
                "vectorQueries": [{
                    "kind": "vector",
                    "vector": query_vector,
                    "fields": "content_vector",
                    "k": top_k,
                }],
                "top": top_k,
                "select": SELECT_FIELDS,
            }))
            .await?;
        Ok(hits.iter().map(|raw| signal_hit(raw, "@search.score")).collect())
    }
}

#[async_trait]
impl SemanticReranker for AzureSearchStore {
    /// Semantic ranking restricted to the already-retrieved keys via a
    /// `search.in` filter, so the backend can only reorder, never add.
    async fn rerank(
        &self,
        question: &str,
        keys: &[String],
        top_k: usize,
    ) -> Result<Vec<(String, f64)>, QueryError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let key_list = keys.join(",");
        let hits = self
            .run_search(json!({
                "search": question,
                "queryType": "semantic",
                "semanticConfiguration": SEMANTIC_CONFIGURATION,
                "filter": format!("search.in(id, '{key_list}', ',')"),
                "top": top_k,
                "select": "id",
            }))
            .await?;

        Ok(hits
            .iter()
            .filter_map(|raw| {
                let key = raw.pointer("/id").and_then(Value::as_str)?;
                let score = raw.pointer("/@search.rerankerScore").and_then(Value::as_f64)?;
                Some((key.to_string(), score))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitMetadata;
    use chrono::{NaiveDate, Utc};

    fn record() -> IndexedRecord {
        IndexedRecord {
            key: "ZG9jcw".to_string(),
            record_id: "docs/AT-2024.txt#chunk0".to_string(),
            document_id: "docs/AT-2024.txt".to_string(),
            source_file: "docs/AT-2024.txt".to_string(),
            doc_title: "AT-2024".to_string(),
            unit_index: 0,
            text: "texto".to_string(),
            vector: vec![0.1, 0.2],
            metadata: UnitMetadata {
                category: Some("Atribuição de Classes (AC)".to_string()),
                publication_date: NaiveDate::from_ymd_opt(2024, 1, 20),
                ..UnitMetadata::default()
            },
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upload_document_omits_absent_metadata() {
        let document = record_document(&record());
        assert_eq!(document.pointer("/@search.action"), Some(&json!("mergeOrUpload")));
        assert_eq!(
            document.pointer("/category"),
            Some(&json!("Atribuição de Classes (AC)"))
        );
        assert_eq!(
            document.pointer("/publication_date"),
            Some(&json!("2024-01-20T00:00:00Z"))
        );
        assert!(document.pointer("/norm_type").is_none());
        assert!(document.pointer("/deadline_start").is_none());
    }

    #[test]
    fn signal_hit_reads_score_and_identity() {
        let raw = json!({
            "@search.score": 2.5,
            "id": "abc",
            "record_id": "docs/AT.txt#chunk1",
            "document_id": "docs/AT.txt",
            "source_file": "docs/AT.txt",
            "doc_title": "AT",
            "chunk": 1,
            "text": "conteúdo",
        });
        let hit = signal_hit(&raw, "@search.score");
        assert_eq!(hit.key, "abc");
        assert_eq!(hit.unit_index, 1);
        assert_eq!(hit.score, 2.5);
    }
}
