use crate::classify::Classifier;
use crate::error::IngestError;
use crate::models::{Document, Unit};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
    /// Documents shorter than this are a data problem, not chunkable input.
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 1_500,
            overlap_chars: 200,
            min_chars: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.chunk_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_chars {} must be smaller than chunk_chars {}",
                self.overlap_chars, self.chunk_chars
            )));
        }
        Ok(())
    }
}

/// Char-index spans of a sliding window with stride `chunk - overlap`.
/// The final span is truncated to the remaining text, never padded.
fn window_spans(char_count: usize, config: ChunkingConfig) -> Vec<(usize, usize)> {
    let stride = config.chunk_chars - config.overlap_chars;
    let mut spans = Vec::new();
    let mut start = 0;

    while start < char_count {
        let end = (start + config.chunk_chars).min(char_count);
        spans.push((start, end));
        if end == char_count {
            break;
        }
        start += stride;
    }

    spans
}

/// Splits a document's extracted text into overlapping units and enriches
/// each with classifier metadata.
///
/// Document-level attributes (category, norm type, year, ...) are inherited
/// by every unit; process phase and legal references are re-derived from
/// the unit's own span so a unit about "credenciamento" is findable even
/// when the document as a whole is about something else.
pub fn extract_units(
    document: &Document,
    text: &str,
    config: ChunkingConfig,
    classifier: &Classifier,
) -> Result<Vec<Unit>, IngestError> {
    config.validate()?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(IngestError::EmptyDocument(document.document_id.clone()));
    }
    let length = trimmed.chars().count();
    if length < config.min_chars {
        return Err(IngestError::TextTooShort {
            document_id: document.document_id.clone(),
            length,
            minimum: config.min_chars,
        });
    }

    let doc_metadata = classifier.classify_document(&document.source_file, trimmed);
    let chars: Vec<char> = trimmed.chars().collect();

    let mut units = Vec::new();
    for (index, (start, end)) in window_spans(chars.len(), config).into_iter().enumerate() {
        let span_text: String = chars[start..end].iter().collect();

        let mut metadata = doc_metadata.clone();
        metadata.process_phase = classifier.detect_process_phase(&span_text);
        metadata.legal_references = classifier.extract_legal_references(&span_text);

        units.push(Unit {
            document_id: document.document_id.clone(),
            source_file: document.source_file.clone(),
            doc_title: document.title.clone(),
            unit_index: index as u32,
            text: span_text,
            overlap_prev: if index == 0 { 0 } else { config.overlap_chars },
            metadata,
        });
    }

    Ok(units)
}
