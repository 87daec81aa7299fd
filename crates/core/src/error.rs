use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document {0} has no extractable text")]
    EmptyDocument(String),

    #[error("document {document_id} text is too short: {length} chars, minimum {minimum}")]
    TextTooShort {
        document_id: String,
        length: usize,
        minimum: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schema violation for {document_id}#{unit_index}: {details}")]
    SchemaViolation {
        document_id: String,
        unit_index: u32,
        details: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query request failed: {0}")]
    Request(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("retrieval signal timed out: {signal}")]
    RetrievalTimeout { signal: String },

    #[error("answer cites sources absent from context: {}", invalid_citations.join(", "))]
    GroundingFailure { invalid_citations: Vec<String> },

    #[error("{capability} capability unavailable: {details}")]
    CapabilityUnavailable { capability: String, details: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
