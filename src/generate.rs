//! Artifact generation: hypotheses and recommendations.
//!
//! Each generator issues one structured-prompt call, parses a fixed-shape
//! JSON array out of the response, and falls back to a deterministic
//! rule-based list when the call or the parse fails. The stage therefore
//! never produces an empty artifact list.

use serde::de::DeserializeOwned;

use crate::gateway::InferenceGateway;
use crate::model::{Comparison, Hypothesis, Patterns, Priority, Recommendation};
use crate::prompts;

/// Outcome of one generation call, recorded in the reasoning trace.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub count: usize,
    pub used_fallback: bool,
    pub error: Option<String>,
}

// =============================================================================
// JSON EXTRACTION
// =============================================================================

/// Extract the JSON payload from a model response: fenced ```json blocks
/// first, then the first balanced `[...]` or `{...}` span.
pub fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(fenced) = extract_fenced(trimmed) {
        return fenced.trim();
    }

    let array_start = trimmed.find('[');
    let object_start = trimmed.find('{');
    let (start, open, close) = match (array_start, object_start) {
        (Some(a), Some(o)) if a < o => (a, '[', ']'),
        (Some(a), None) => (a, '[', ']'),
        (_, Some(o)) => (o, '{', '}'),
        (None, None) => return trimmed,
    };

    let remainder = &trimmed[start..];
    let mut depth = 0i32;
    for (i, c) in remainder.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return &remainder[..=i];
            }
        }
    }

    trimmed
}

fn extract_fenced(raw: &str) -> Option<&str> {
    let after = if let Some(idx) = raw.find("```json") {
        &raw[idx + "```json".len()..]
    } else if let Some(idx) = raw.find("```") {
        &raw[idx + "```".len()..]
    } else {
        return None;
    };
    let end = after.find("```")?;
    Some(&after[..end])
}

fn parse_artifact_list<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, String> {
    serde_json::from_str(extract_json_block(raw)).map_err(|e| e.to_string())
}

// =============================================================================
// HYPOTHESES
// =============================================================================

/// Generate hypotheses explaining the visibility patterns.
pub async fn generate_hypotheses(
    gateway: &InferenceGateway,
    query: &str,
    comparison: &Comparison,
    patterns: &Patterns,
) -> (Vec<Hypothesis>, GenerationReport) {
    let request = prompts::hypothesis_request(query, comparison, patterns);

    let outcome = match gateway.chat(request).await {
        Ok(resp) => {
            parse_artifact_list::<Hypothesis>(&resp.content).and_then(validate_hypotheses)
        }
        Err(err) => Err(err.to_string()),
    };

    match outcome {
        Ok(hypotheses) if !hypotheses.is_empty() => {
            let report = GenerationReport {
                count: hypotheses.len(),
                used_fallback: false,
                error: None,
            };
            (hypotheses, report)
        }
        Ok(_) => fallback_hypothesis_result(comparison, patterns, "empty hypothesis list"),
        Err(err) => {
            tracing::warn!(error = %err, "hypothesis generation failed, using rule-based fallback");
            fallback_hypothesis_result(comparison, patterns, &err)
        }
    }
}

fn validate_hypotheses(list: Vec<Hypothesis>) -> Result<Vec<Hypothesis>, String> {
    for h in &list {
        if !(0.0..=1.0).contains(&h.confidence) {
            return Err(format!(
                "confidence out of range [0,1] for '{}': {}",
                h.title, h.confidence
            ));
        }
    }
    Ok(list)
}

fn fallback_hypothesis_result(
    comparison: &Comparison,
    patterns: &Patterns,
    error: &str,
) -> (Vec<Hypothesis>, GenerationReport) {
    let hypotheses = fallback_hypotheses(comparison, patterns);
    let report = GenerationReport {
        count: hypotheses.len(),
        used_fallback: true,
        error: Some(error.to_string()),
    };
    (hypotheses, report)
}

/// Rule-based hypotheses used when the model call fails.
pub fn fallback_hypotheses(comparison: &Comparison, patterns: &Patterns) -> Vec<Hypothesis> {
    let mut hypotheses = Vec::new();
    let brand = &comparison.brand_score;

    if brand.mention_rate < 0.3 {
        hypotheses.push(Hypothesis {
            title: "Low Brand Visibility in AI Responses".to_string(),
            explanation: format!(
                "The brand {} appears in only {:.0}% of responses, indicating limited \
                 recognition by AI models.",
                brand.domain,
                brand.mention_rate * 100.0
            ),
            confidence: 0.9,
            supporting_evidence: vec![
                format!("Mention rate: {:.0}%", brand.mention_rate * 100.0),
                format!(
                    "Visibility gap vs top competitor: {:.0}%",
                    comparison.visibility_gap * 100.0
                ),
            ],
        });
    }

    if comparison.visibility_gap > 0.2 {
        if let Some(top) = comparison.competitor_scores.first() {
            hypotheses.push(Hypothesis {
                title: "Strong Competitor Presence".to_string(),
                explanation: format!(
                    "{} has significantly higher visibility, suggesting better content \
                     optimization or domain authority.",
                    top.domain
                ),
                confidence: 0.85,
                supporting_evidence: vec![
                    format!("{} mention rate: {:.0}%", top.domain, top.mention_rate * 100.0),
                    format!("Appears on {} platforms", top.platforms.len()),
                ],
            });
        }
    }

    if !patterns.platform_bias.is_empty() {
        let bias: Vec<String> = patterns
            .platform_bias
            .iter()
            .map(|(platform, rate)| format!("{platform}: {:.0}%", rate * 100.0))
            .collect();
        hypotheses.push(Hypothesis {
            title: "Platform-Specific Performance Variation".to_string(),
            explanation: "Visibility varies significantly across different AI platforms, \
                          suggesting platform-specific optimization opportunities."
                .to_string(),
            confidence: 0.75,
            supporting_evidence: vec![format!("Platform performance: {}", bias.join(", "))],
        });
    }

    if hypotheses.is_empty() {
        hypotheses.push(Hypothesis {
            title: "Insufficient Data".to_string(),
            explanation: "Unable to generate detailed hypotheses with current data.".to_string(),
            confidence: 0.5,
            supporting_evidence: vec!["Limited citation data available".to_string()],
        });
    }

    hypotheses
}

// =============================================================================
// RECOMMENDATIONS
// =============================================================================

/// Generate actionable recommendations, ordered by impact/effort ratio.
pub async fn generate_recommendations(
    gateway: &InferenceGateway,
    query: &str,
    comparison: &Comparison,
    hypotheses: &[Hypothesis],
    patterns: &Patterns,
) -> (Vec<Recommendation>, GenerationReport) {
    let request = prompts::recommendation_request(query, comparison, hypotheses, patterns);

    let outcome = match gateway.chat(request).await {
        Ok(resp) => parse_artifact_list::<Recommendation>(&resp.content)
            .and_then(validate_recommendations),
        Err(err) => Err(err.to_string()),
    };

    match outcome {
        Ok(mut recommendations) if !recommendations.is_empty() => {
            sort_by_roi(&mut recommendations);
            let report = GenerationReport {
                count: recommendations.len(),
                used_fallback: false,
                error: None,
            };
            (recommendations, report)
        }
        Ok(_) => fallback_recommendation_result(comparison, "empty recommendation list"),
        Err(err) => {
            tracing::warn!(error = %err, "recommendation generation failed, using rule-based fallback");
            fallback_recommendation_result(comparison, &err)
        }
    }
}

fn validate_recommendations(list: Vec<Recommendation>) -> Result<Vec<Recommendation>, String> {
    for r in &list {
        if !(0.0..=10.0).contains(&r.impact_score) || !(0.0..=10.0).contains(&r.effort_score) {
            return Err(format!(
                "impact/effort out of range [0,10] for '{}'",
                r.title
            ));
        }
    }
    Ok(list)
}

fn sort_by_roi(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        b.roi()
            .partial_cmp(&a.roi())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn fallback_recommendation_result(
    comparison: &Comparison,
    error: &str,
) -> (Vec<Recommendation>, GenerationReport) {
    let recommendations = fallback_recommendations(comparison);
    let report = GenerationReport {
        count: recommendations.len(),
        used_fallback: true,
        error: Some(error.to_string()),
    };
    (recommendations, report)
}

/// Rule-based recommendations used when the model call fails.
pub fn fallback_recommendations(comparison: &Comparison) -> Vec<Recommendation> {
    let mut recommendations = vec![Recommendation {
        title: "Optimize Content for AI Semantic Understanding".to_string(),
        description: "Improve content structure and semantic clarity to help AI models better \
                      understand and cite your brand."
            .to_string(),
        priority: Priority::High,
        impact_score: 8.5,
        effort_score: 6.0,
        action_items: vec![
            "Add clear, structured FAQ sections addressing common queries".to_string(),
            "Use schema.org markup for better structured data".to_string(),
            "Include explicit product/service descriptions with key benefits".to_string(),
            "Create comprehensive comparison pages vs competitors".to_string(),
        ],
        expected_outcome: "20-30% improvement in AI citation rate within 2-3 months".to_string(),
    }];

    if comparison.visibility_gap > 0.3 {
        recommendations.push(Recommendation {
            title: "Build Domain Authority and Trust Signals".to_string(),
            description: "Increase domain credibility through authoritative content and \
                          external validation."
                .to_string(),
            priority: Priority::High,
            impact_score: 7.5,
            effort_score: 8.0,
            action_items: vec![
                "Publish thought leadership content on industry topics".to_string(),
                "Earn backlinks from authoritative sources".to_string(),
                "Get featured in industry publications".to_string(),
                "Maintain active presence on relevant platforms".to_string(),
            ],
            expected_outcome: "Improved trust signals leading to higher AI citation rates"
                .to_string(),
        });
    }

    recommendations.push(Recommendation {
        title: "Enhance Semantic Keyword Targeting".to_string(),
        description: format!(
            "Optimize content for variations of '{}' related queries.",
            comparison.brand_score.domain
        ),
        priority: Priority::Medium,
        impact_score: 7.0,
        effort_score: 4.0,
        action_items: vec![
            "Research and target semantic keyword variations".to_string(),
            "Create content clusters around core topics".to_string(),
            "Use natural language that matches query intent".to_string(),
            "Include question-answer format content".to_string(),
        ],
        expected_outcome: "15-25% increase in relevant query coverage".to_string(),
    });

    recommendations.push(Recommendation {
        title: "Maintain Content Freshness".to_string(),
        description: "Keep content updated to ensure AI models access recent, relevant \
                      information."
            .to_string(),
        priority: Priority::Medium,
        impact_score: 6.5,
        effort_score: 5.0,
        action_items: vec![
            "Update key pages quarterly".to_string(),
            "Add publication/update dates prominently".to_string(),
            "Create timely, relevant content regularly".to_string(),
            "Monitor and update outdated information".to_string(),
        ],
        expected_outcome: "Better recency signals for AI platforms".to_string(),
    });

    recommendations.push(Recommendation {
        title: "Implement Platform-Specific Strategies".to_string(),
        description: "Tailor content for different AI platforms based on their preferences."
            .to_string(),
        priority: Priority::Low,
        impact_score: 5.5,
        effort_score: 7.0,
        action_items: vec![
            "Analyze top-cited sources on each platform".to_string(),
            "Optimize for citation-oriented answer formats".to_string(),
            "Structure content for conversational context windows".to_string(),
            "Test content performance across platforms".to_string(),
        ],
        expected_outcome: "Improved platform-specific visibility".to_string(),
    });

    recommendations
}
