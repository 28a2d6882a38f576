//! Langfuse-compatible trace ingestion over HTTP.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use lantern_core::SpanRecord;

use crate::protocol::{encode_ingestion_batch, IngestionResponse};
use crate::traits::{SinkCapabilities, TraceSink};
use crate::{SinkError, SinkResult};

/// Posts span batches to `{host}/api/public/ingestion` with basic auth.
#[derive(Clone)]
pub struct HttpTraceSink {
    client: reqwest::Client,
    url: String,
    public_key: String,
    secret_key: String,
    max_batch_size: usize,
}

impl fmt::Debug for HttpTraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTraceSink")
            .field("url", &self.url)
            .field("public_key", &self.public_key)
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}

impl HttpTraceSink {
    pub const DEFAULT_HOST: &'static str = "https://cloud.langfuse.com";
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        host: &str,
        public_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> SinkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/api/public/ingestion", host.trim_end_matches('/')),
            public_key: public_key.into(),
            secret_key: secret_key.into(),
            max_batch_size: 100,
        })
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Turns a 207 body into a partial-failure error when any event was refused.
fn check_multi_status(body: &str, total: usize) -> SinkResult<()> {
    let response: IngestionResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "undecodable multi-status body");
            return Err(SinkError::Encode(format!("undecodable 207 body: {err}")));
        }
    };
    if response.errors.is_empty() {
        return Ok(());
    }
    for error in &response.errors {
        tracing::warn!(
            event = %error.id,
            status = error.status,
            message = error.message.as_deref().unwrap_or(""),
            "ingestion event rejected"
        );
    }
    Err(SinkError::Partial {
        failed: response.errors.len(),
        total,
    })
}

#[async_trait]
impl TraceSink for HttpTraceSink {
    async fn send_batch(&self, spans: &[SpanRecord]) -> SinkResult<()> {
        if spans.is_empty() {
            return Ok(());
        }
        let batch = encode_ingestion_batch(spans);
        let total = batch.batch.len();
        let body = serde_json::to_vec(&batch)?;

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        match status {
            207 => check_multi_status(&text, total),
            s if (200..300).contains(&s) => {
                tracing::trace!(events = total, spans = spans.len(), "ingestion batch accepted");
                Ok(())
            }
            _ => Err(SinkError::Rejected { status, body: text }),
        }
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            max_batch_size: self.max_batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingestion_url_from_host() {
        let sink = HttpTraceSink::new("https://cloud.langfuse.com/", "pk", "sk").unwrap();
        assert_eq!(sink.url(), "https://cloud.langfuse.com/api/public/ingestion");
    }

    #[test]
    fn multi_status_with_errors_is_partial() {
        let body = r#"{"successes":[{"id":"a","status":201}],"errors":[{"id":"b","status":400}]}"#;
        assert_eq!(
            check_multi_status(body, 2),
            Err(SinkError::Partial { failed: 1, total: 2 })
        );
        assert_eq!(check_multi_status(r#"{"successes":[],"errors":[]}"#, 0), Ok(()));
    }

    #[test]
    fn undecodable_multi_status_is_not_success() {
        let err = check_multi_status("<html>bad gateway</html>", 3).unwrap_err();
        assert!(matches!(err, SinkError::Encode(_)), "{err:?}");
        assert!(!err.is_retryable());
    }
}
