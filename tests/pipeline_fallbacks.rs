use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use geoscope::gateway::{GatewayConfig, InferenceGateway, OpenAiAdapter, PerplexityAdapter};
use geoscope::model::{AnalysisRequest, Platform, RunStatus};
use geoscope::Orchestrator;

fn system_prompt(request: &Request) -> String {
    let parsed: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
    parsed
        .get("messages")
        .and_then(|m| m.as_array())
        .and_then(|messages| {
            messages
                .iter()
                .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("system"))
                .and_then(|m| m.get("content").and_then(|c| c.as_str()))
                .map(String::from)
        })
        .unwrap_or_default()
}

fn chat_completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 10 }
    }))
}

/// Collection works, but every structured response is garbage: generation
/// falls back to the rule-based artifacts and evaluation degrades to the
/// neutral passing score.
#[derive(Clone, Copy)]
struct GarbageStructuredChat;

impl Respond for GarbageStructuredChat {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let system = system_prompt(request);

        if system.contains("strategic planner") {
            return chat_completion("Narrative.");
        }
        if system.contains("helpful assistant") {
            // Brand absent: keeps mention rate at 0 so the low-visibility
            // fallback hypothesis fires.
            return chat_completion("Rival (rival.com) dominates this market.");
        }

        // Generation, critique, improvement: all unparseable.
        chat_completion("no structure here whatsoever")
    }
}

#[tokio::test]
async fn unparseable_structured_responses_degrade_to_fallbacks() {
    let chat_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(GarbageStructuredChat)
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
        platforms: vec![Platform::Chatgpt],
        num_queries: 2,
    };

    let result = orchestrator.run_analysis(request).await.unwrap();

    // Collection succeeded, so the run completes despite every structured
    // response failing to parse.
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.observations.len(), 2);

    // Rule-based artifacts: brand at 0% and a large gap.
    assert!(!result.hypotheses.is_empty());
    assert!(result
        .hypotheses
        .iter()
        .any(|h| h.title == "Low Brand Visibility in AI Responses"));
    assert!(result
        .hypotheses
        .iter()
        .any(|h| h.title == "Strong Competitor Presence"));
    assert_eq!(result.recommendations.len(), 5);
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.title == "Build Domain Authority and Trust Signals"));

    // Generation fallbacks are recorded as degraded-mode errors.
    assert!(result
        .errors
        .iter()
        .any(|e| e.step == "hypothesis_generation"));
    assert!(result
        .errors
        .iter()
        .any(|e| e.step == "recommendation_generation"));

    // Evaluation parse failures degrade to the neutral passing score.
    assert!(result.evaluation.evaluation_performed);
    assert!(result.evaluation.hypotheses.all_passed);
    assert_eq!(result.evaluation.hypotheses.improvements_made, 0);
    assert!((result.evaluation.hypotheses.average_quality_score - 0.8).abs() < 1e-9);
    assert!((result.evaluation.recommendations.average_quality_score - 0.8).abs() < 1e-9);
    assert!(result.evaluation.recommendations.all_actionable);
}
