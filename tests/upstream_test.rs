//! Tests for [`UpstreamClient`] — provider calls, retry policy, error
//! classification. Uses wiremock as the provider.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use heimdall::policy;
use heimdall::upstream::{ImageBlob, ImageFormat, RetryConfig, UpstreamClient};
use heimdall::HeimdallError;

fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.extend_from_slice(&[0; 16]);
    bytes
}

fn image_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "data": [{ "b64_json": BASE64.encode(png_bytes()) }]
    }))
}

fn error_response(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": { "message": message }
    }))
}

fn client(server: &MockServer) -> UpstreamClient {
    UpstreamClient::with_base_url("test-key", server.uri()).retry_config(
        RetryConfig::new()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
            .jitter(false),
    )
}

fn prompt(text: &str) -> heimdall::NormalizedPrompt {
    policy::validate(text).unwrap()
}

#[tokio::test]
async fn generate_sends_the_rewritten_prompt_and_parses_the_payload() {
    let server = MockServer::start().await;
    let rewritten = prompt("a red fox");

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-image-1",
            "prompt": rewritten.as_str(),
            "size": "1024x1024",
        })))
        .respond_with(image_response())
        .expect(1)
        .mount(&server)
        .await;

    let blob = client(&server).generate(&rewritten).await.unwrap();
    assert_eq!(blob.format(), ImageFormat::Png);
    assert_eq!(blob.bytes(), png_bytes());
}

#[tokio::test]
async fn retries_on_429_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(error_response(429, "Rate limit exceeded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(image_response())
        .expect(1)
        .mount(&server)
        .await;

    let blob = client(&server).generate(&prompt("a red fox")).await.unwrap();
    assert_eq!(blob.bytes(), png_bytes());
}

#[tokio::test]
async fn surfaces_the_last_error_after_exhausting_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(error_response(429, "Rate limit exceeded"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&prompt("a red fox"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::RateLimited { .. }));
}

#[tokio::test]
async fn does_not_retry_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(error_response(500, "internal provider error"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&prompt("a red fox"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::Api { status: 500, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn attempt_timeout_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(image_response().set_delay(Duration::from_millis(400)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(image_response())
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).timeout(Duration::from_millis(100));
    let blob = client.generate(&prompt("a red fox")).await.unwrap();
    assert_eq!(blob.bytes(), png_bytes());
}

#[tokio::test]
async fn content_policy_rejection_is_remapped() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(error_response(
            400,
            "Your request was rejected by the safety system.",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&prompt("a red fox"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::ContentRejected { .. }));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn empty_data_array_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&prompt("a red fox"))
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::EmptyResponse));
}

#[tokio::test]
async fn edit_posts_the_source_image_and_parses_the_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .respond_with(image_response())
        .expect(1)
        .mount(&server)
        .await;

    let source = ImageBlob::new(ImageFormat::Png, png_bytes());
    let blob = client(&server)
        .edit(&prompt("make it snowy"), &source)
        .await
        .unwrap();
    assert_eq!(blob.bytes(), png_bytes());
}

#[tokio::test]
async fn missing_api_key_fails_before_any_network_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(image_response())
        .expect(0)
        .mount(&server)
        .await;

    let client = UpstreamClient::with_base_url("", server.uri());
    let err = client.generate(&prompt("a red fox")).await.unwrap_err();
    assert!(matches!(err, HeimdallError::Configuration(_)));
    assert_eq!(err.status_code(), 500);
}
