use crate::embeddings::{classify_response_status, with_backoff, TransientOr};
use crate::error::QueryError;
use crate::traits::Generator;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Azure OpenAI chat-completions deployment, treated as a pure, slow
/// external call: bounded timeout, bounded backoff, no state.
pub struct AzureOpenAiGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    timeout: Duration,
}

impl AzureOpenAiGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: "2024-10-21".to_string(),
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Generator for AzureOpenAiGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<String, QueryError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );
        let payload = json!({
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0.0,
        });

        let body: Value = with_backoff("generation", || async {
            let response = self
                .client
                .post(&url)
                .header("api-key", &self.api_key)
                .timeout(self.timeout)
                .json(&payload)
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

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| QueryError::Backend {
                backend: "azure-openai".to_string(),
                details: "response missing message content".to_string(),
            })
    }
}
