use crate::chunking::{extract_units, ChunkingConfig};
use crate::classify::Classifier;
use crate::error::IngestError;
use crate::index::{submit_in_batches, FailedUnit, IndexBuilder};
use crate::models::{Document, IndexedRecord};
use crate::traits::{Embedder, RecordStore};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];
const TITLE_SCAN_LINES: usize = 15;
const TITLE_MAX_CHARS: usize = 150;

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    /// Retry ceiling for the halving batch-upload strategy.
    pub max_batch_splits: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch_size: 16,
            max_batch_splits: 4,
        }
    }
}

pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub documents: usize,
    pub units_indexed: usize,
    pub skipped: Vec<SkippedDocument>,
    pub failures: Vec<FailedUnit>,
}

/// Pre-extracted text files under `folder`, recursively, in stable order.
/// Binary parsing happens upstream; this pipeline only sees `.txt`/`.md`.
pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                TEXT_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });
        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort_unstable();
    files
}

fn digest_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First titled line near the top of the document ("RESOLUÇÃO SEDUC ...",
/// "PORTARIA ...") wins over the bare file stem.
fn detect_title(classifier: &Classifier, stem: &str, text: &str) -> String {
    for line in text.lines().take(TITLE_SCAN_LINES) {
        let trimmed = line.trim();
        if trimmed.chars().count() < TITLE_MAX_CHARS
            && !trimmed.is_empty()
            && classifier.detect_norm_type("", trimmed).is_some()
        {
            return trimmed.to_string();
        }
    }
    stem.to_string()
}

fn build_document(root: &Path, path: &Path, text: &str, classifier: &Classifier) -> Result<Document, IngestError> {
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(Document {
        document_id: relative.clone(),
        source_file: relative,
        title: detect_title(classifier, stem, text),
        checksum: digest_text(text),
        ingested_at: Utc::now(),
    })
}

/// Offline pipeline: discover pre-extracted documents, classify and chunk
/// them, embed unit texts in batches, and upload validated records.
///
/// Best effort per document: an extraction or embedding failure skips
/// that document and is reported, the rest of the corpus continues.
/// Upload failures are reported per unit by the halving batch submitter.
pub async fn ingest_folder<S, E>(
    store: &S,
    embedder: &E,
    classifier: &Classifier,
    folder: &Path,
    options: &IngestionOptions,
) -> Result<IngestionReport, IngestError>
where
    S: RecordStore + Sync,
    E: Embedder,
{
    let files = discover_text_files(folder);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no text files found in {}",
            folder.display()
        )));
    }

    let builder = IndexBuilder::new(embedder.dimensions());
    let mut records: Vec<IndexedRecord> = Vec::new();
    let mut skipped = Vec::new();
    let mut documents = 0usize;

    for path in files {
        let document_records = process_document(&builder, embedder, classifier, folder, &path, options).await;
        match document_records {
            Ok(document_records) => {
                documents += 1;
                records.extend(document_records);
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping document");
                skipped.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(documents, units = records.len(), "uploading indexed records");
    let upload = submit_in_batches(store, &records, options.batch_size, options.max_batch_splits).await;

    Ok(IngestionReport {
        documents,
        units_indexed: upload.uploaded,
        skipped,
        failures: upload.failures,
    })
}

async fn process_document<E>(
    builder: &IndexBuilder,
    embedder: &E,
    classifier: &Classifier,
    root: &Path,
    path: &Path,
    options: &IngestionOptions,
) -> Result<Vec<IndexedRecord>, IngestError>
where
    E: Embedder,
{
    let text = fs::read_to_string(path)?;
    let document = build_document(root, path, &text, classifier)?;
    let units = extract_units(&document, &text, options.chunking, classifier)?;

    let texts: Vec<String> = units.iter().map(|unit| unit.text.clone()).collect();
    let vectors = embedder
        .embed_batch(&texts)
        .await
        .map_err(|error| IngestError::Backend {
            backend: "embedding".to_string(),
            details: error.to_string(),
        })?;
    if vectors.len() != units.len() {
        return Err(IngestError::Backend {
            backend: "embedding".to_string(),
            details: format!(
                "embedding count {} does not match unit count {}",
                vectors.len(),
                units.len()
            ),
        });
    }

    units
        .iter()
        .zip(vectors)
        .map(|(unit, vector)| builder.build_record(unit, vector))
        .collect()
}
