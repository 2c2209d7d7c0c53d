//! OpenAI-compatible backend against a one-shot local HTTP responder.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use meshrelay::config::GenerationConfig;
use meshrelay::relay::context::{ChatMessage, Role};
use meshrelay::services::generation::{GenerationBackend, OpenAiBackend};

/// Serve exactly one request with `status` and `body`; the raw request is sent back
/// through the returned receiver.
async fn serve_once(status: u16, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    break;
                }
            }
        }
        let reply = format!(
            "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(reply.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
    });
    (format!("http://{}/v1", addr), rx)
}

fn backend(api_base: String, api_key: Option<&str>) -> OpenAiBackend {
    OpenAiBackend::new(GenerationConfig {
        api_base,
        api_key: api_key.map(str::to_string),
        model: "test-model".to_string(),
        timeout_secs: 5,
        ..GenerationConfig::default()
    })
    .unwrap()
}

fn history() -> Vec<ChatMessage> {
    vec![
        ChatMessage::new(Role::System, "be brief"),
        ChatMessage::new(Role::User, "how far is the repeater?"),
    ]
}

#[tokio::test]
async fn returns_trimmed_first_choice() {
    let (base, request) = serve_once(
        200,
        r#"{"choices":[{"message":{"role":"assistant","content":"  About 4 km.  "}}]}"#,
    )
    .await;
    let reply = backend(base, Some("sk-test")).generate(&history()).await;
    assert_eq!(reply.unwrap(), "About 4 km.");

    let raw = request.await.unwrap();
    assert!(raw.starts_with("POST /v1/chat/completions"));
    assert!(raw
        .to_lowercase()
        .contains("authorization: bearer sk-test"));
    assert!(raw.contains("\"model\":\"test-model\""));
    assert!(raw.contains("how far is the repeater?"));
}

#[tokio::test]
async fn omits_authorization_without_key() {
    let (base, request) = serve_once(
        200,
        r#"{"choices":[{"message":{"content":"ok"}}]}"#,
    )
    .await;
    backend(base, None).generate(&history()).await.unwrap();
    let raw = request.await.unwrap();
    assert!(!raw.to_lowercase().contains("authorization:"));
}

#[tokio::test]
async fn non_success_status_carries_code_and_body() {
    let (base, _request) = serve_once(500, "upstream exploded").await;
    let err = backend(base, None).generate(&history()).await.unwrap_err();
    assert_eq!(err.status, Some(500));
    assert_eq!(err.to_string(), "HTTP error 500: upstream exploded");
}

#[tokio::test]
async fn malformed_body_is_an_error_without_status() {
    let (base, _request) = serve_once(200, r#"{"nothing":"here"}"#).await;
    let err = backend(base, None).generate(&history()).await.unwrap_err();
    assert_eq!(err.status, None);
    assert!(err.to_string().starts_with("Error: "));
}

#[tokio::test]
async fn unreachable_backend_is_an_error() {
    let err = backend("http://127.0.0.1:9/v1".to_string(), None)
        .generate(&history())
        .await
        .unwrap_err();
    assert_eq!(err.status, None);
}
