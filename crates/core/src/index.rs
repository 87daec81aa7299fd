use crate::error::IngestError;
use crate::models::{IndexedRecord, Unit};
use crate::traits::RecordStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use tracing::warn;

/// Builds index-ready records and enforces the schema contract with the
/// backing search capability: fixed vector dimensionality, required
/// identity and text fields.
pub struct IndexBuilder {
    vector_dimensions: usize,
}

impl IndexBuilder {
    pub fn new(vector_dimensions: usize) -> Self {
        Self { vector_dimensions }
    }

    pub fn vector_dimensions(&self) -> usize {
        self.vector_dimensions
    }

    pub fn build_record(&self, unit: &Unit, vector: Vec<f32>) -> Result<IndexedRecord, IngestError> {
        let violation = |details: String| IngestError::SchemaViolation {
            document_id: unit.document_id.clone(),
            unit_index: unit.unit_index,
            details,
        };

        if vector.len() != self.vector_dimensions {
            return Err(violation(format!(
                "vector dimensionality {} does not match configured {}",
                vector.len(),
                self.vector_dimensions
            )));
        }
        if unit.document_id.trim().is_empty() {
            return Err(violation("missing document_id".to_string()));
        }
        if unit.source_file.trim().is_empty() {
            return Err(violation("missing source_file".to_string()));
        }
        if unit.text.trim().is_empty() {
            return Err(violation("empty unit text".to_string()));
        }

        let record_id = unit.record_id();
        Ok(IndexedRecord {
            // Record ids contain path separators; the index key must be
            // URL-safe, so encode rather than sanitize.
            key: URL_SAFE_NO_PAD.encode(record_id.as_bytes()),
            record_id,
            document_id: unit.document_id.clone(),
            source_file: unit.source_file.clone(),
            doc_title: unit.doc_title.clone(),
            unit_index: unit.unit_index,
            text: unit.text.clone(),
            vector,
            metadata: unit.metadata.clone(),
            updated_at: Utc::now(),
        })
    }
}

/// A record the batch submitter gave up on, with enough identity for a
/// targeted re-ingestion.
#[derive(Debug, Clone)]
pub struct FailedUnit {
    pub document_id: String,
    pub unit_index: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IndexReport {
    pub uploaded: usize,
    pub failures: Vec<FailedUnit>,
}

/// Uploads records in batches, retrying failed batches at halved
/// granularity until `max_attempts` splits have been spent, then reports
/// the surviving failures instead of aborting the run.
pub async fn submit_in_batches<S>(
    store: &S,
    records: &[IndexedRecord],
    batch_size: usize,
    max_attempts: usize,
) -> IndexReport
where
    S: RecordStore + Sync + ?Sized,
{
    let batch_size = batch_size.max(1);
    let mut report = IndexReport::default();
    let mut pending: Vec<(&[IndexedRecord], usize)> = records
        .chunks(batch_size)
        .rev()
        .map(|batch| (batch, 0usize))
        .collect();

    while let Some((batch, attempt)) = pending.pop() {
        match store.upload_records(batch).await {
            Ok(()) => report.uploaded += batch.len(),
            Err(error) if batch.len() > 1 && attempt < max_attempts => {
                warn!(
                    batch_len = batch.len(),
                    attempt,
                    error = %error,
                    "batch upload failed, retrying halves"
                );
                let middle = batch.len() / 2;
                pending.push((&batch[middle..], attempt + 1));
                pending.push((&batch[..middle], attempt + 1));
            }
            Err(error) => {
                let reason = error.to_string();
                for record in batch {
                    report.failures.push(FailedUnit {
                        document_id: record.document_id.clone(),
                        unit_index: record.unit_index,
                        reason: reason.clone(),
                    });
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unit(index: u32, text: &str) -> Unit {
        Unit {
            document_id: "docs/AT-2024.txt".to_string(),
            source_file: "docs/AT-2024.txt".to_string(),
            doc_title: "AT-2024".to_string(),
            unit_index: index,
            text: text.to_string(),
            overlap_prev: 0,
            metadata: UnitMetadata::default(),
        }
    }

    #[test]
    fn record_key_is_url_safe() {
        let builder = IndexBuilder::new(3);
        let record = builder
            .build_record(&unit(0, "texto"), vec![0.1, 0.2, 0.3])
            .expect("record builds");
        assert!(!record.key.contains('/'));
        assert!(!record.key.contains('='));
        assert_eq!(record.record_id, "docs/AT-2024.txt#chunk0");
    }

    #[test]
    fn wrong_dimensionality_is_a_schema_violation() {
        let builder = IndexBuilder::new(4);
        let result = builder.build_record(&unit(1, "texto"), vec![0.5; 3]);
        assert!(matches!(result, Err(IngestError::SchemaViolation { unit_index: 1, .. })));
    }

    #[test]
    fn empty_text_is_a_schema_violation() {
        let builder = IndexBuilder::new(2);
        let result = builder.build_record(&unit(0, "   "), vec![0.0; 2]);
        assert!(matches!(result, Err(IngestError::SchemaViolation { .. })));
    }

    struct PoisonedStore {
        poison_unit: u32,
        upload_calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for PoisonedStore {
        async fn upload_records(&self, records: &[IndexedRecord]) -> Result<(), IngestError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if records.iter().any(|r| r.unit_index == self.poison_unit) {
                return Err(IngestError::Backend {
                    backend: "fake".to_string(),
                    details: "rejected".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn halving_retry_isolates_the_poisoned_record() {
        let builder = IndexBuilder::new(2);
        let records: Vec<IndexedRecord> = (0..8)
            .map(|index| {
                builder
                    .build_record(&unit(index, "texto"), vec![0.0; 2])
                    .expect("record builds")
            })
            .collect();

        let store = PoisonedStore {
            poison_unit: 5,
            upload_calls: AtomicUsize::new(0),
        };
        let report = submit_in_batches(&store, &records, 8, 8).await;

        assert_eq!(report.uploaded, 7);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit_index, 5);
        assert_eq!(report.failures[0].document_id, "docs/AT-2024.txt");
    }

    #[tokio::test]
    async fn retry_ceiling_reports_the_whole_batch() {
        let builder = IndexBuilder::new(2);
        let records: Vec<IndexedRecord> = (0..4)
            .map(|index| {
                builder
                    .build_record(&unit(index, "texto"), vec![0.0; 2])
                    .expect("record builds")
            })
            .collect();

        let store = PoisonedStore {
            poison_unit: 0,
            upload_calls: AtomicUsize::new(0),
        };
        // One split allowed: the half without the poison uploads, the
        // poisoned half is reported without reaching single records.
        let report = submit_in_batches(&store, &records, 4, 1).await;

        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.unit_index < 2));
    }
}
