//! OpenAI chat completions client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::{ChatCompletionResponse, Completion, CompletionRequest};
use crate::traits::CompletionProvider;
use crate::{ProviderError, ProviderResult};

/// Calls an OpenAI-compatible `/chat/completions` endpoint.
///
/// # Authentication
///
/// The API key is sent as a bearer token on every request.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(api_key: impl Into<String>) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: completions_url(Self::DEFAULT_BASE_URL),
        })
    }

    /// Points the client at another OpenAI-compatible server.
    ///
    /// Accepts either an API base (`.../v1`) or the full completions URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.url = completions_url(base_url);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn completions_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<Completion> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            max_tokens = request.max_tokens,
            "sending chat completion"
        );

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "chat completion failed");
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let decoded: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let completion = decoded.into_completion(&request.model)?;
        tracing::debug!(
            model = %completion.model,
            total_tokens = completion.usage.map(|u| u.total_tokens).unwrap_or_default(),
            "chat completion received"
        );
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization() {
        assert_eq!(
            completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://localhost:8080/v1/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn default_url_targets_openai() {
        let provider = OpenAiProvider::new("sk-test").unwrap();
        assert_eq!(provider.url(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(provider.name(), "openai");
    }
}
