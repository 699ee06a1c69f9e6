//! `HttpInvoker` against a throwaway TCP listener serving canned responses.

use std::time::Duration;

use invoker::{ActionInvoker, HttpInvoker, InvocationRequest, TransportError};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Accept one connection, capture the raw request, answer with `response`
/// after `delay`.
async fn serve_once(
    response: String,
    delay: Duration,
) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        // Read until the headers and the announced body have arrived.
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(split) = text.find("\r\n\r\n") {
                let content_length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if raw.len() >= split + 4 + content_length {
                    break;
                }
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
        tokio::time::sleep(delay).await;
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}"), rx)
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn posts_payload_and_returns_status_and_body() {
    let (base, captured) =
        serve_once(http_response("201 Created", r#"{"saved":true}"#), Duration::ZERO).await;
    let invoker = HttpInvoker::new(Duration::from_secs(5)).unwrap();

    let request = InvocationRequest::post(
        "n1",
        format!("{base}/save-file"),
        json!({ "path": "/reports/q1.pdf" }),
    );
    let result = invoker.invoke(&request).await.expect("round trip should succeed");

    assert_eq!(result.status_code, 201);
    assert_eq!(result.body, json!({ "saved": true }));

    let raw = captured.await.unwrap();
    assert!(raw.starts_with("POST /save-file HTTP/1.1"));
    assert!(raw.contains(r#"{"path":"/reports/q1.pdf"}"#));
}

#[tokio::test]
async fn error_statuses_are_passed_through() {
    let (base, _) =
        serve_once(http_response("500 Internal Server Error", r#"{"error":"boom"}"#), Duration::ZERO).await;
    let invoker = HttpInvoker::new(Duration::from_secs(5)).unwrap();

    let result = invoker
        .invoke(&InvocationRequest::post("n1", format!("{base}/x"), json!({})))
        .await
        .expect("a 500 is still a completed round trip");

    assert_eq!(result.status_code, 500);
    assert_eq!(result.body["error"], "boom");
}

#[tokio::test]
async fn empty_body_becomes_null() {
    let (base, _) = serve_once(http_response("204 No Content", ""), Duration::ZERO).await;
    let invoker = HttpInvoker::new(Duration::from_secs(5)).unwrap();

    let result = invoker
        .invoke(&InvocationRequest::post("n1", format!("{base}/x"), json!({})))
        .await
        .unwrap();

    assert_eq!(result.status_code, 204);
    assert!(result.body.is_null());
}

#[tokio::test]
async fn non_json_body_is_a_decode_error() {
    let (base, _) = serve_once(http_response("200 OK", "<html>nope</html>"), Duration::ZERO).await;
    let invoker = HttpInvoker::new(Duration::from_secs(5)).unwrap();

    let err = invoker
        .invoke(&InvocationRequest::post("n1", format!("{base}/x"), json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn slow_service_times_out() {
    let (base, _) =
        serve_once(http_response("200 OK", "{}"), Duration::from_secs(2)).await;
    let invoker = HttpInvoker::new(Duration::from_secs(5)).unwrap();

    let request = InvocationRequest::post("n1", format!("{base}/slow"), json!({}))
        .with_timeout(Duration::from_millis(100));
    let err = invoker.invoke(&request).await.unwrap_err();

    assert!(
        matches!(err, TransportError::Timeout { after_ms: 100, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    // Bind then drop to obtain a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let invoker = HttpInvoker::new(Duration::from_secs(2)).unwrap();
    let err = invoker
        .invoke(&InvocationRequest::post("n1", format!("http://{addr}/x"), json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Connect { .. }), "got {err:?}");
    assert_eq!(err.url(), format!("http://{addr}/x"));
}
