//! Request builders for every call the pipeline makes to the inference
//! gateway: one function per (purpose, mode) pair, each returning a fixed
//! [`ChatRequest`]. No runtime template interpretation.

use crate::gateway::{ChatRequest, Message};
use crate::model::{AnalysisRequest, Comparison, Hypothesis, Patterns, Recommendation};

// =============================================================================
// DATA COLLECTION
// =============================================================================

const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant that provides comprehensive \
answers about products, tools, and services. When answering, mention specific brands, \
websites, and tools that are relevant. Include URLs when possible.";

/// The plain-answer call issued once per (query variation, chat platform).
pub fn answer_request(query: &str) -> ChatRequest {
    ChatRequest::new(
        vec![
            Message::system(ANSWER_SYSTEM_PROMPT),
            Message::user(query.to_string()),
        ],
        "collect::answer",
    )
    .temperature(0.7)
    .max_tokens(1000)
}

// =============================================================================
// PLANNING
// =============================================================================

const PLANNING_SYSTEM_PROMPT: &str = "You are a strategic planner for generative engine \
visibility analysis. Your job is to create a detailed investigation plan based on the \
user's query.

Consider:
1. What data sources to query
2. What queries/variations to test
3. What metrics to track
4. What comparisons to make
5. What hypotheses to test

Be specific and actionable.";

/// Advisory strategy-narrative call. Its output is recorded in the trace and
/// never consumed downstream.
pub fn planning_request(request: &AnalysisRequest) -> ChatRequest {
    let platforms: Vec<&str> = request.platforms.iter().map(|p| p.as_str()).collect();
    let user = format!(
        "Create an analysis plan for: {}\nBrand: {}\nCompetitors: {}\nPlatforms: {}",
        request.query,
        request.brand_domain,
        request.competitors.join(", "),
        platforms.join(", "),
    );

    ChatRequest::new(
        vec![Message::system(PLANNING_SYSTEM_PROMPT), Message::user(user)],
        "plan::narrative",
    )
    .temperature(0.3)
}

// =============================================================================
// ARTIFACT GENERATION
// =============================================================================

const HYPOTHESIS_SYSTEM_PROMPT: &str = "You are an expert visibility analyst who explains why \
brands appear or don't appear in AI-generated answers.

Generate 3-5 clear hypotheses explaining the visibility patterns.
Consider:
- Content quality and relevance
- Semantic alignment with query intent
- Domain authority and trust signals
- Freshness and recency of content
- Keyword optimization
- Structured data and citations

For each hypothesis:
1. Provide a clear title
2. Explain the reasoning
3. Estimate confidence (0-1)
4. List supporting evidence

Format as JSON array of objects with keys: title, explanation, confidence, \
supporting_evidence";

pub fn hypothesis_request(query: &str, comparison: &Comparison, patterns: &Patterns) -> ChatRequest {
    let brand_rate = comparison.brand_score.mention_rate * 100.0;
    let (top_name, top_rate) = match comparison.competitor_scores.first() {
        Some(top) => (top.domain.as_str(), top.mention_rate * 100.0),
        None => ("N/A", 0.0),
    };
    let gap = comparison.visibility_gap * 100.0;

    let platform_data = serde_json::to_string_pretty(&comparison.brand_score.platforms)
        .unwrap_or_else(|_| "{}".to_string());
    let patterns_str =
        serde_json::to_string_pretty(patterns).unwrap_or_else(|_| "{}".to_string());

    let user = format!(
        "Analyze this visibility data:\n\n\
         Query: {query}\n\
         Brand: {brand} (Mention Rate: {brand_rate:.1}%)\n\
         Top Competitor: {top_name} (Mention Rate: {top_rate:.1}%)\n\
         Visibility Gap: {gap:.1}%\n\n\
         Platform Performance:\n{platform_data}\n\n\
         Patterns Observed:\n{patterns_str}\n\n\
         Generate hypotheses explaining these patterns.",
        brand = comparison.brand_score.domain,
    );

    ChatRequest::new(
        vec![Message::system(HYPOTHESIS_SYSTEM_PROMPT), Message::user(user)],
        "generate::hypotheses",
    )
    .temperature(0.7)
}

const RECOMMENDATION_SYSTEM_PROMPT: &str = "You are a generative engine optimization strategist \
who creates actionable recommendations to improve brand visibility in AI-generated answers.

Generate 5-7 specific, actionable recommendations based on the analysis.

For each recommendation:
1. Clear, actionable title
2. Detailed description
3. Priority (high/medium/low)
4. Impact score (0-10): Expected improvement in visibility
5. Effort score (0-10): Implementation complexity
6. 3-5 specific action items
7. Expected outcome

Focus on:
- Content optimization
- Semantic SEO
- Structured data
- Authority building
- Platform-specific strategies

Format as JSON array with keys: title, description, priority, impact_score, effort_score, \
action_items, expected_outcome";

pub fn recommendation_request(
    query: &str,
    comparison: &Comparison,
    hypotheses: &[Hypothesis],
    patterns: &Patterns,
) -> ChatRequest {
    let hypotheses_str = hypotheses
        .iter()
        .map(|h| {
            format!(
                "- {}: {} (Confidence: {})",
                h.title, h.explanation, h.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "Based on this visibility analysis:\n\n\
         Query: {query}\n\
         Brand: {brand}\n\
         Current Visibility: {rate:.1}%\n\n\
         Hypotheses:\n{hypotheses_str}\n\n\
         Competitor Insights:\n{insights}\n\n\
         Generate prioritized recommendations to improve visibility.",
        brand = comparison.brand_score.domain,
        rate = comparison.brand_score.mention_rate * 100.0,
        insights = competitor_insights(comparison, patterns),
    );

    ChatRequest::new(
        vec![
            Message::system(RECOMMENDATION_SYSTEM_PROMPT),
            Message::user(user),
        ],
        "generate::recommendations",
    )
    .temperature(0.7)
}

fn competitor_insights(comparison: &Comparison, patterns: &Patterns) -> String {
    let mut insights: Vec<String> = Vec::new();

    for comp in comparison.competitor_scores.iter().take(3) {
        let mut insight = format!("{}: {:.1}% visibility", comp.domain, comp.mention_rate * 100.0);
        if !comp.platforms.is_empty() {
            let platforms: Vec<&str> = comp.platforms.keys().map(String::as_str).collect();
            insight.push_str(&format!(" (Strong on: {})", platforms.join(", ")));
        }
        insights.push(insight);
    }

    for strength in patterns.competitor_strengths.iter().take(2) {
        insights.push(format!(
            "{}: {:.1}% advantage",
            strength.competitor,
            strength.mention_advantage * 100.0
        ));
    }

    insights.join("\n")
}

// =============================================================================
// QUALITY GATE
// =============================================================================

const HYPOTHESIS_CRITIQUE_SYSTEM_PROMPT: &str = "You are a critical evaluator of AI-generated \
hypotheses. Your job is to assess hypothesis quality and suggest improvements.

Evaluate each hypothesis on:
1. **Evidence Quality** (0-1): Is supporting evidence strong and specific?
2. **Logical Coherence** (0-1): Does the explanation make logical sense?
3. **Actionability** (0-1): Can this lead to concrete actions?
4. **Specificity** (0-1): Is it specific enough to be useful?

Return JSON with:
- overall_score (0-1)
- critique (string explaining weaknesses)
- suggestions (list of specific improvements)
- should_regenerate (boolean)";

pub fn hypothesis_critique_request(
    hypothesis: &Hypothesis,
    citation_summary: &str,
    brand_visibility: f64,
) -> ChatRequest {
    let user = format!(
        "Evaluate this hypothesis:\n\n\
         Title: {title}\n\
         Explanation: {explanation}\n\
         Confidence: {confidence}\n\
         Evidence: {evidence:?}\n\
         Brand Visibility: {visibility:.1}%\n\
         Context: {citation_summary}",
        title = hypothesis.title,
        explanation = hypothesis.explanation,
        confidence = hypothesis.confidence,
        evidence = hypothesis.supporting_evidence,
        visibility = brand_visibility * 100.0,
    );

    ChatRequest::new(
        vec![
            Message::system(HYPOTHESIS_CRITIQUE_SYSTEM_PROMPT),
            Message::user(user),
        ],
        "evaluate::hypothesis_critique",
    )
    .temperature(0.3)
    .json()
}

const HYPOTHESIS_IMPROVEMENT_SYSTEM_PROMPT: &str = "You are an expert at improving AI-generated \
hypotheses. Given a weak hypothesis and critique, generate an improved version.

Requirements:
- Address all critique points
- Provide stronger, more specific evidence
- Improve logical coherence
- Maintain JSON format: title, explanation, confidence, supporting_evidence";

pub fn hypothesis_improvement_request(
    hypothesis: &Hypothesis,
    critique: &str,
    citation_summary: &str,
    brand_visibility: f64,
) -> ChatRequest {
    let original =
        serde_json::to_string_pretty(hypothesis).unwrap_or_else(|_| "{}".to_string());

    let user = format!(
        "Improve this hypothesis:\n\n\
         Original: {original}\n\
         Critique: {critique}\n\
         Available Data: {citation_summary}\n\
         Brand Context: Brand visibility: {visibility:.1}%",
        visibility = brand_visibility * 100.0,
    );

    ChatRequest::new(
        vec![
            Message::system(HYPOTHESIS_IMPROVEMENT_SYSTEM_PROMPT),
            Message::user(user),
        ],
        "evaluate::hypothesis_improvement",
    )
    .temperature(0.3)
    .json()
}

const RECOMMENDATION_CRITIQUE_SYSTEM_PROMPT: &str = "You are a critical evaluator of action \
recommendations.

Evaluate each recommendation on:
1. **Actionability** (0-1): Are action items clear and specific?
2. **Feasibility** (0-1): Can this realistically be implemented?
3. **Impact Accuracy** (0-1): Is the impact score realistic?
4. **Completeness** (0-1): Are all necessary details included?

Return JSON with overall_score, critique, suggestions, should_regenerate.";

pub fn recommendation_critique_request(recommendation: &Recommendation) -> ChatRequest {
    let user = format!(
        "Evaluate this recommendation:\n\n\
         Title: {title}\n\
         Description: {description}\n\
         Priority: {priority:?}\n\
         Impact Score: {impact}/10\n\
         Effort Score: {effort}/10\n\
         Action Items: {items:?}\n\
         Expected Outcome: {outcome}",
        title = recommendation.title,
        description = recommendation.description,
        priority = recommendation.priority,
        impact = recommendation.impact_score,
        effort = recommendation.effort_score,
        items = recommendation.action_items,
        outcome = recommendation.expected_outcome,
    );

    ChatRequest::new(
        vec![
            Message::system(RECOMMENDATION_CRITIQUE_SYSTEM_PROMPT),
            Message::user(user),
        ],
        "evaluate::recommendation_critique",
    )
    .temperature(0.3)
    .json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Platform, Priority, VisibilityScore};
    use std::collections::BTreeMap;

    fn sample_comparison() -> Comparison {
        Comparison {
            brand_score: VisibilityScore {
                domain: "acme.com".to_string(),
                total_mentions: 1,
                mention_rate: 0.25,
                avg_position: Some(2.0),
                platforms: BTreeMap::from([("chatgpt".to_string(), 1)]),
            },
            competitor_scores: vec![VisibilityScore {
                domain: "rival.com".to_string(),
                total_mentions: 3,
                mention_rate: 0.75,
                avg_position: Some(1.0),
                platforms: BTreeMap::from([("chatgpt".to_string(), 3)]),
            }],
            visibility_gap: 0.5,
            top_competitor: Some("rival.com".to_string()),
        }
    }

    #[test]
    fn answer_request_embeds_query() {
        let req = answer_request("best crm software");
        assert_eq!(req.messages.len(), 2);
        assert!(req.messages[1].content.contains("best crm software"));
        assert_eq!(req.max_tokens, Some(1000));
    }

    #[test]
    fn planning_request_lists_platforms() {
        let request = AnalysisRequest {
            query: "best crm software".to_string(),
            brand_domain: "acme.com".to_string(),
            competitors: vec!["rival.com".to_string()],
            platforms: vec![Platform::Chatgpt, Platform::Perplexity],
            num_queries: 3,
        };
        let req = planning_request(&request);
        let user = &req.messages[1].content;
        assert!(user.contains("acme.com"));
        assert!(user.contains("rival.com"));
        assert!(user.contains("chatgpt, perplexity"));
        assert!((req.temperature - 0.3).abs() < 1e-6);
    }

    #[test]
    fn hypothesis_request_embeds_rates_and_gap() {
        let req = hypothesis_request("q", &sample_comparison(), &Patterns::default());
        let user = &req.messages[1].content;
        assert!(user.contains("25.0%"));
        assert!(user.contains("rival.com"));
        assert!(user.contains("50.0%"));
    }

    #[test]
    fn recommendation_request_embeds_hypotheses() {
        let hyp = Hypothesis {
            title: "Weak authority".to_string(),
            explanation: "Few citations".to_string(),
            confidence: 0.8,
            supporting_evidence: vec!["evidence".to_string()],
        };
        let req =
            recommendation_request("q", &sample_comparison(), &[hyp], &Patterns::default());
        assert!(req.messages[1].content.contains("Weak authority"));
        assert!(req.messages[1].content.contains("rival.com: 75.0% visibility"));
    }

    #[test]
    fn critique_request_embeds_artifact_fields() {
        let hyp = Hypothesis {
            title: "Title".to_string(),
            explanation: "Explanation".to_string(),
            confidence: 0.6,
            supporting_evidence: vec!["e1".to_string()],
        };
        let req = hypothesis_critique_request(&hyp, "3 citations analyzed", 0.25);
        let user = &req.messages[1].content;
        assert!(user.contains("Title"));
        assert!(user.contains("3 citations analyzed"));
        assert!(user.contains("25.0%"));
        assert!(req.json_mode);
    }

    #[test]
    fn recommendation_critique_embeds_scores() {
        let rec = Recommendation {
            title: "Do the thing".to_string(),
            description: "desc".to_string(),
            priority: Priority::High,
            impact_score: 8.0,
            effort_score: 3.0,
            action_items: vec!["step".to_string()],
            expected_outcome: "better".to_string(),
        };
        let req = recommendation_critique_request(&rec);
        assert!(req.messages[1].content.contains("8/10"));
    }
}
