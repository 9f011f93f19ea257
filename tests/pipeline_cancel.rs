use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geoscope::gateway::{GatewayConfig, InferenceGateway, OpenAiAdapter, PerplexityAdapter};
use geoscope::model::{AnalysisRequest, Platform, RunStatus};
use geoscope::Orchestrator;

#[tokio::test]
async fn preset_cancel_flag_stops_before_collection() {
    let chat_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "Narrative." },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })))
        .mount(&chat_server)
        .await;

    let chat = OpenAiAdapter::with_config(
        "sk-test",
        chat_server.uri(),
        "test-model",
        Duration::from_secs(5),
    )
    .unwrap();
    let search =
        PerplexityAdapter::with_config(None, "http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    let gateway = Arc::new(InferenceGateway::new(
        Arc::new(chat),
        Arc::new(search),
        GatewayConfig {
            max_retries: 0,
            retry_base_delay: Duration::from_millis(0),
        },
    ));

    let orchestrator = Orchestrator::new(gateway, None);

    let request = AnalysisRequest {
        query: "best crm software".to_string(),
        brand_domain: "acme.com".to_string(),
        competitors: vec!["rival.com".to_string()],
        platforms: vec![Platform::Chatgpt, Platform::Perplexity],
        num_queries: 3,
    };

    let cancel = AtomicBool::new(true);
    let result = orchestrator
        .run_with_cancel(request, Some(&cancel))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.observations.is_empty());
    assert!(result.hypotheses.is_empty());
    assert!(result.recommendations.is_empty());

    // Planning ran; collection never dispatched.
    let steps: Vec<&str> = result
        .reasoning_trace
        .iter()
        .map(|s| s.step.as_str())
        .collect();
    assert_eq!(steps, vec!["planning"]);
    assert!(result.step_timings.contains_key("planning"));
    assert!(result.step_timings.contains_key("total"));

    // Only the advisory narrative call reached the wire.
    assert_eq!(chat_server.received_requests().await.unwrap().len(), 1);

    // A partial state still yields a full comparison (all zeros).
    assert_eq!(result.comparison.brand_score.mention_rate, 0.0);
    assert!(!result.evaluation.evaluation_performed);
}
