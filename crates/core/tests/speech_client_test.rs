//! HTTP speech client against a mocked speech endpoint
//!
//! Run: cargo test -p voicerelay-core --test speech_client_test

use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use voicerelay_core::{Credential, Error, HttpSpeechClient, SpeechClient, SpeechConfig};
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SPEECH_PATH: &str = "/v1/audio/conversations";

fn client_for(server: &MockServer) -> HttpSpeechClient {
    let config = SpeechConfig {
        endpoint: format!("{}{}", server.uri(), SPEECH_PATH),
        request_timeout_ms: 5_000,
        ..Default::default()
    };
    HttpSpeechClient::new(config, Credential::new("sk-test")).unwrap()
}

#[tokio::test]
async fn test_success_returns_response_audio() {
    let server = MockServer::start().await;
    let inbound = vec![3u8; 320];

    Mock::given(method("POST"))
        .and(path(SPEECH_PATH))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "audio/wav"))
        .and(body_bytes(inbound.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 640]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client
        .send_audio(Bytes::from(inbound), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.len(), 640);
    assert!(response.iter().all(|b| *b == 9));
}

#[tokio::test]
async fn test_non_success_status_is_remote_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SPEECH_PATH))
        .respond_with(ResponseTemplate::new(503))
        // A failed round is never retried by the client
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .send_audio(Bytes::from_static(b"pcm"), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::RemoteUnavailable { status, .. } => assert_eq!(status, Some(503)),
        other => panic!("expected RemoteUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_failure_is_remote_unavailable() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    drop(server);

    let err = client
        .send_audio(Bytes::from_static(b"pcm"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_remote_unavailable());
    assert!(matches!(err, Error::RemoteUnavailable { status: None, .. }));
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SPEECH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 640])
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = client.send_audio(Bytes::from_static(b"pcm"), &cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
}
