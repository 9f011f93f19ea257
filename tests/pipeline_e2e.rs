use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use geoscope::gateway::{GatewayConfig, InferenceGateway, OpenAiAdapter, PerplexityAdapter};
use geoscope::history::{HistoryStore, SqliteHistoryStore};
use geoscope::model::{AnalysisRequest, Platform, RunStatus};
use geoscope::Orchestrator;

fn chat_body(request: &Request) -> (String, String) {
    let parsed: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
    let messages = parsed
        .get("messages")
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();
    let content_of = |role: &str| {
        messages
            .iter()
            .find(|m| m.get("role").and_then(|r| r.as_str()) == Some(role))
            .and_then(|m| m.get("content").and_then(|c| c.as_str()))
            .unwrap_or("")
            .to_string()
    };
    (content_of("system"), content_of("user"))
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

/// Scripted reasoning model: routes each call by its system prompt.
#[derive(Clone, Copy)]
struct ScriptedChat;

impl Respond for ScriptedChat {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let (system, _user) = chat_body(request);

        if system.contains("strategic planner") {
            return chat_completion("Test three query variations across both platforms.");
        }
        if system.contains("helpful assistant") {
            return chat_completion(
                "Acme (acme.com) and Rival (rival.com) are the top choices for most teams.",
            );
        }
        if system.contains("expert visibility analyst") {
            return chat_completion(
                r#"[
                    {"title": "Authority gap", "explanation": "Rival has stronger backlinks.",
                     "confidence": 0.8, "supporting_evidence": ["rival.com cited 5 times"]},
                    {"title": "Content freshness", "explanation": "Brand pages are stale.",
                     "confidence": 0.7, "supporting_evidence": ["few recent mentions"]},
                    {"title": "Schema coverage", "explanation": "Missing structured data.",
                     "confidence": 0.6, "supporting_evidence": ["no markup found"]}
                ]"#,
            );
        }
        if system.contains("optimization strategist") {
            return chat_completion(
                r#"[
                    {"title": "Low effort win", "description": "Fix FAQs.", "priority": "high",
                     "impact_score": 8.0, "effort_score": 2.0,
                     "action_items": ["add FAQ"], "expected_outcome": "More citations"},
                    {"title": "Big project", "description": "Rebuild site.", "priority": "low",
                     "impact_score": 9.0, "effort_score": 9.0,
                     "action_items": ["replatform"], "expected_outcome": "Long-term gain"}
                ]"#,
            );
        }
        if system.contains("critical evaluator") {
            return chat_completion(
                r#"{"overall_score": 0.9, "critique": "solid", "suggestions": [],
                    "should_regenerate": false}"#,
            );
        }

        chat_completion("unexpected prompt")
    }
}

/// Scripted search engine: Rival appears for every query except the
/// "comparison" variation.
#[derive(Clone, Copy)]
struct ScriptedSearch;

impl Respond for ScriptedSearch {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let (_system, user) = chat_body(request);

        if user.contains("comparison") {
            return ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Several options exist in this market."}}],
                "citations": []
            }));
        }

        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "Rival (rival.com) is the leading option."}}],
            "citations": ["https://rival.com"]
        }))
    }
}

async fn gateway_for(chat_server: &MockServer, search_server: &MockServer) -> InferenceGateway {
    let chat = OpenAiAdapter::with_config(
        "sk-test",
        chat_server.uri(),
        "test-model",
        Duration::from_secs(5),
    )
    .unwrap();
    let search = PerplexityAdapter::with_config(
        Some("sk-test".to_string()),
        search_server.uri(),
        Duration::from_secs(5),
    )
    .unwrap();
    InferenceGateway::new(
        Arc::new(chat),
        Arc::new(search),
        GatewayConfig {
            max_retries: 0,
            retry_base_delay: Duration::from_millis(0),
        },
    )
}

#[tokio::test]
async fn full_pipeline_runs_end_to_end() {
    let chat_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ScriptedChat)
        .mount(&chat_server)
        .await;

    let search_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ScriptedSearch)
        .mount(&search_server)
        .await;

    let gateway = Arc::new(gateway_for(&chat_server, &search_server).await);

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteHistoryStore::new(dir.path().join("history.sqlite")).unwrap());

    let orchestrator = Orchestrator::new(gateway, Some(store.clone()));

    let request = AnalysisRequest {
        query: "best crm software".to_string(),
        brand_domain: "acme.com".to_string(),
        competitors: vec!["rival.com".to_string()],
        platforms: vec![Platform::Chatgpt, Platform::Perplexity],
        num_queries: 3,
    };

    let result = orchestrator.run_analysis(request).await.unwrap();

    // 3 variations x 2 platforms, all successful.
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.observations.len(), 6);
    assert!(result.errors.is_empty());

    // Brand in the 3 chat answers only; rival in 5 of 6.
    assert!((result.comparison.brand_score.mention_rate - 0.5).abs() < 1e-9);
    let top = &result.comparison.competitor_scores[0];
    assert_eq!(top.domain, "rival.com");
    assert!((top.mention_rate - 5.0 / 6.0).abs() < 1e-9);
    assert!((result.comparison.visibility_gap - (5.0 / 6.0 - 0.5)).abs() < 1e-9);

    // Scripted artifacts survived the quality gate untouched.
    assert_eq!(result.hypotheses.len(), 3);
    assert_eq!(result.hypotheses[0].title, "Authority gap");
    assert_eq!(result.recommendations.len(), 2);
    // Ordered by impact/effort ratio: 8/2 beats 9/9.
    assert_eq!(result.recommendations[0].title, "Low effort win");

    assert!(result.evaluation.evaluation_performed);
    assert_eq!(result.evaluation.hypotheses.total_evaluated, 3);
    assert_eq!(result.evaluation.hypotheses.improvements_made, 0);
    assert!(result.evaluation.hypotheses.all_passed);
    assert!(result.evaluation.recommendations.all_actionable);
    assert_eq!(result.evaluation.total_iterations, 1);

    // Transparency: one trace entry per stage (generation contributes two).
    let steps: Vec<&str> = result
        .reasoning_trace
        .iter()
        .map(|s| s.step.as_str())
        .collect();
    assert_eq!(
        steps,
        vec![
            "planning",
            "data_collection",
            "analysis",
            "hypothesis_generation",
            "recommendation_generation",
            "evaluation",
            "synthesis",
        ]
    );
    for key in [
        "planning",
        "data_collection",
        "analysis",
        "hypothesis_generation",
        "recommendation_generation",
        "evaluation",
        "synthesis",
        "total",
    ] {
        assert!(result.step_timings.contains_key(key), "missing timing {key}");
    }

    assert!(result.summary.contains("acme.com: 50.0% visibility rate"));
    assert!(result.summary.contains("rival.com"));

    // Fire-and-forget save lands in the store shortly after the run returns.
    let mut saved = None;
    for _ in 0..50 {
        if let Some(stored) = store.get(result.id).await.unwrap() {
            saved = Some(stored);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let saved = saved.expect("analysis saved to history");
    assert_eq!(saved.metadata.brand, "acme.com");
    assert!((saved.metadata.visibility_rate - 0.5).abs() < 1e-9);
    assert!(saved.document.contains("Authority gap"));
}

#[tokio::test]
async fn structural_validation_rejects_before_any_call() {
    let chat_server = MockServer::start().await;
    let search_server = MockServer::start().await;
    let gateway = Arc::new(gateway_for(&chat_server, &search_server).await);
    let orchestrator = Orchestrator::new(gateway, None);

    let request = AnalysisRequest {
        query: "".to_string(),
        brand_domain: "acme.com".to_string(),
        competitors: vec![],
        platforms: vec![Platform::Chatgpt],
        num_queries: 1,
    };

    let err = orchestrator.run_analysis(request).await.unwrap_err();
    assert!(err.to_string().contains("query"));
    assert!(chat_server.received_requests().await.unwrap().is_empty());
}
