use crate::error::QueryError;
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

/// Retries a transient-failing capability call with bounded exponential
/// backoff. Non-transient failures are returned immediately.
pub(crate) async fn with_backoff<T, F, Fut>(
    capability: &str,
    mut call: F,
) -> Result<T, QueryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransientOr<QueryError>>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(TransientOr::Permanent(error)) => return Err(error),
            Err(TransientOr::Transient(details)) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(QueryError::CapabilityUnavailable {
                        capability: capability.to_string(),
                        details,
                    });
                }
                let delay = BASE_BACKOFF_MS * (1u64 << (attempt - 1));
                warn!(capability, attempt, delay_ms = delay, details = %details, "transient failure, backing off");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

/// Either a retryable condition (network trouble, 429, 5xx) or a
/// permanent error that should surface as-is.
pub(crate) enum TransientOr<E> {
    Transient(String),
    Permanent(E),
}

pub(crate) fn classify_response_status(
    backend: &str,
    status: reqwest::StatusCode,
) -> Option<TransientOr<QueryError>> {
    if status.is_success() {
        return None;
    }
    if status.as_u16() == 429 || status.is_server_error() {
        return Some(TransientOr::Transient(format!("{backend} returned {status}")));
    }
    Some(TransientOr::Permanent(QueryError::Backend {
        backend: backend.to_string(),
        details: status.to_string(),
    }))
}

/// Azure OpenAI embeddings deployment, invoked as a black-box capability.
pub struct AzureOpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    dimensions: usize,
}

impl AzureOpenAiEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: "2024-10-21".to_string(),
            dimensions,
        }
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError> {
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );

        let body: Value = with_backoff("embedding", || async {
            let response = self
                .client
                .post(&url)
                .header("api-key", &self.api_key)
                .json(&json!({ "input": texts }))
                .send()
                .await
                .map_err(|error| {
                    if error.is_connect() || error.is_timeout() {
                        TransientOr::Transient(error.to_string())
                    } else {
                        TransientOr::Permanent(QueryError::Http(error))
                    }
                })?;

            if let Some(classified) = classify_response_status("azure-openai", response.status()) {
                return Err(classified);
            }
            response
                .json::<Value>()
                .await
                .map_err(|error| TransientOr::Permanent(QueryError::Http(error)))
        })
        .await?;

        let data = body
            .pointer("/data")
            .and_then(Value::as_array)
            .ok_or_else(|| QueryError::Backend {
                backend: "azure-openai".to_string(),
                details: "response missing data array".to_string(),
            })?;

        let mut vectors = Vec::with_capacity(data.len());
        for entry in data {
            let values = entry
                .pointer("/embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| QueryError::Backend {
                    backend: "azure-openai".to_string(),
                    details: "entry missing embedding".to_string(),
                })?;
            let vector: Vec<f32> = values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect();
            if vector.len() != self.dimensions {
                return Err(QueryError::Backend {
                    backend: "azure-openai".to_string(),
                    details: format!(
                        "embedding dimensionality {} does not match configured {}",
                        vector.len(),
                        self.dimensions
                    ),
                });
            }
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for AzureOpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, QueryError> {
        let mut vectors = self.request_embeddings(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| QueryError::Backend {
            backend: "azure-openai".to_string(),
            details: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts).await
    }
}

/// Offline hashed character-trigram embedder.
///
/// No retrieval quality to speak of, but deterministic and dependency
/// free, which keeps local runs and the test suite off the network.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

impl HashingEmbedder {
    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token: String = window.iter().collect();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, QueryError> {
        Ok(self.embed_sync(text))
    }
}
