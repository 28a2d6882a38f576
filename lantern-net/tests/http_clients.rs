//! Integration tests for the HTTP clients against a local canned-response server.

#![cfg(feature = "http")]

use std::net::SocketAddr;

use lantern_core::{Level, Metadata, ObservationKind, SpanId, SpanRecord, TraceId};
use lantern_net::prelude::*;
use lantern_net::{HttpTraceSink, OpenAiProvider};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serves one request with `status` and `body`, then hands back the raw request.
async fn serve_once(status: &'static str, body: &'static str) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
    });

    (addr, rx)
}

fn request() -> CompletionRequest {
    CompletionRequest::new(
        "gpt-3.5-turbo",
        vec![
            ChatMessage::system("You are a helpful AI assistant."),
            ChatMessage::user("What is Kubernetes?"),
        ],
    )
}

fn root_span() -> SpanRecord {
    SpanRecord {
        schema_version: 1,
        trace_id: TraceId::from_bytes([7u8; 16]),
        span_id: SpanId::from_bytes([3u8; 8]),
        parent_span_id: None,
        kind: ObservationKind::Span,
        name: "chat_completion".into(),
        model: None,
        input: Some("What is Kubernetes?".into()),
        output: Some("An orchestrator.".into()),
        level: Level::Default,
        status_message: None,
        metadata: Metadata::new(),
        start_unix_nanos: 1_000,
        end_unix_nanos: Some(2_000),
    }
}

#[tokio::test]
async fn openai_success_sends_bearer_and_parses_reply() {
    let (addr, raw) = serve_once(
        "200 OK",
        r#"{"model":"gpt-3.5-turbo","choices":[{"message":{"role":"assistant","content":"An orchestrator."}}],"usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}"#,
    )
    .await;
    let provider = OpenAiProvider::new("sk-test")
        .unwrap()
        .with_base_url(&format!("http://{addr}/v1"));

    let completion = provider.complete(&request()).await.unwrap();
    assert_eq!(completion.text, "An orchestrator.");
    assert_eq!(completion.usage.unwrap().total_tokens, 11);

    let raw = raw.await.unwrap();
    assert!(raw.starts_with("POST /v1/chat/completions"));
    assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    assert!(raw.contains("\"max_tokens\":500"));
}

#[tokio::test]
async fn openai_rate_limit_maps_to_rate_limited() {
    let (addr, _raw) = serve_once("429 Too Many Requests", r#"{"error":"slow down"}"#).await;
    let provider = OpenAiProvider::new("sk-test")
        .unwrap()
        .with_base_url(&format!("http://{addr}/v1"));
    assert!(matches!(
        provider.complete(&request()).await,
        Err(ProviderError::RateLimited(_))
    ));
}

#[tokio::test]
async fn openai_unauthorized_maps_to_authentication() {
    let (addr, _raw) = serve_once("401 Unauthorized", r#"{"error":"bad key"}"#).await;
    let provider = OpenAiProvider::new("sk-wrong")
        .unwrap()
        .with_base_url(&format!("http://{addr}/v1"));
    assert!(matches!(
        provider.complete(&request()).await,
        Err(ProviderError::Authentication(_))
    ));
}

#[tokio::test]
async fn openai_garbage_body_is_malformed() {
    let (addr, _raw) = serve_once("200 OK", "not json").await;
    let provider = OpenAiProvider::new("sk-test")
        .unwrap()
        .with_base_url(&format!("http://{addr}/v1"));
    assert!(matches!(
        provider.complete(&request()).await,
        Err(ProviderError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn openai_connection_refused_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let provider = OpenAiProvider::new("sk-test")
        .unwrap()
        .with_base_url(&format!("http://{addr}/v1"));
    assert!(matches!(
        provider.complete(&request()).await,
        Err(ProviderError::Network(_))
    ));
}

#[tokio::test]
async fn ingestion_posts_batch_with_basic_auth() {
    let (addr, raw) = serve_once("200 OK", r#"{"successes":[],"errors":[]}"#).await;
    let sink = HttpTraceSink::new(&format!("http://{addr}"), "pk-lf", "sk-lf").unwrap();
    sink.send_batch(&[root_span()]).await.unwrap();

    let raw = raw.await.unwrap();
    assert!(raw.starts_with("POST /api/public/ingestion"));
    // base64("pk-lf:sk-lf")
    assert!(raw.contains("cGstbGY6c2stbGY="));
    assert!(raw.contains("\"trace-create\""));
    assert!(raw.contains("\"span-create\""));
}

#[tokio::test]
async fn ingestion_multi_status_reports_partial() {
    let (addr, _raw) = serve_once(
        "207 Multi-Status",
        r#"{"successes":[{"id":"a","status":201}],"errors":[{"id":"b","status":400,"message":"invalid"}]}"#,
    )
    .await;
    let sink = HttpTraceSink::new(&format!("http://{addr}"), "pk", "sk").unwrap();
    let err = sink.send_batch(&[root_span()]).await.unwrap_err();
    assert_eq!(err, SinkError::Partial { failed: 1, total: 2 });
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn ingestion_server_error_is_retryable() {
    let (addr, _raw) = serve_once("503 Service Unavailable", "down").await;
    let sink = HttpTraceSink::new(&format!("http://{addr}"), "pk", "sk").unwrap();
    let err = sink.send_batch(&[root_span()]).await.unwrap_err();
    assert_eq!(
        err,
        SinkError::Rejected {
            status: 503,
            body: "down".into()
        }
    );
    assert!(err.is_retryable());
}
