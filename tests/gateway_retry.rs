use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geoscope::gateway::{
    ChatRequest, GatewayConfig, InferenceGateway, Message, OpenAiAdapter, PerplexityAdapter,
};

fn success_body() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{
            "message": { "content": "hello" },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 1 }
    }))
}

async fn gateway_for(server: &MockServer, max_retries: u32) -> InferenceGateway {
    let chat =
        OpenAiAdapter::with_config("sk-test", server.uri(), "test-model", Duration::from_secs(5))
            .unwrap();
    let search =
        PerplexityAdapter::with_config(None, "http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    InferenceGateway::new(
        Arc::new(chat),
        Arc::new(search),
        GatewayConfig {
            max_retries,
            retry_base_delay: Duration::from_millis(1),
        },
    )
}

#[tokio::test]
async fn transient_server_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(success_body())
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, 2).await;
    let resp = gateway
        .chat(ChatRequest::new(vec![Message::user("hi")], "test"))
        .await
        .unwrap();

    assert_eq!(resp.content, "hello");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "bad request", "code": "invalid" }
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, 3).await;
    let err = gateway
        .chat(ChatRequest::new(vec![Message::user("hi")], "test"))
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn retries_exhaust_into_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, 2).await;
    let err = gateway
        .chat(ChatRequest::new(vec![Message::user("hi")], "test"))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    // Initial attempt plus two retries.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn rate_limit_is_mapped_and_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "slow down", "code": "rate_limit_exceeded" }
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, 0).await;
    let err = gateway
        .chat(ChatRequest::new(vec![Message::user("hi")], "test"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "rate_limited");
    assert!(err.is_retryable());
}
