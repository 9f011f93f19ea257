//! Quality gate: the evaluate-critique-regenerate loop applied to generated
//! artifacts before a run is finalized.
//!
//! Every artifact is scored by a critique call. Hypotheses scoring below the
//! threshold (or flagged by the critic) are regenerated once and replaced
//! in place; recommendations are scored but never regenerated. Evaluation
//! failures degrade to a neutral passing score, never abort the run.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::gateway::InferenceGateway;
use crate::generate::extract_json_block;
use crate::model::{
    EvaluationSummary, Hypothesis, HypothesisEvalSummary, Observation, Recommendation,
    RecommendationEvalSummary,
};
use crate::prompts;

/// Default minimum acceptable quality score.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.7;

/// Score assumed when an evaluation call or parse fails. Treated as passing.
const NEUTRAL_SCORE: f64 = 0.8;

// =============================================================================
// RECORDS
// =============================================================================

/// Fixed-shape critique response.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationRecord {
    pub overall_score: f64,
    #[serde(default)]
    pub critique: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub should_regenerate: bool,
}

impl EvaluationRecord {
    fn neutral() -> Self {
        Self {
            overall_score: NEUTRAL_SCORE,
            critique: "Evaluation failed".to_string(),
            suggestions: Vec::new(),
            should_regenerate: false,
        }
    }
}

/// Parse a critique response into an [`EvaluationRecord`].
pub fn parse_evaluation(raw: &str) -> Result<EvaluationRecord, String> {
    serde_json::from_str(extract_json_block(raw)).map_err(|e| e.to_string())
}

fn is_weak(record: &EvaluationRecord, threshold: f64) -> bool {
    record.should_regenerate || record.overall_score < threshold
}

/// Per-artifact evaluation outcome, kept for the transparency trace.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArtifactEvaluation {
    pub index: usize,
    pub title: String,
    pub score: f64,
    pub critique: String,
    pub suggestions: Vec<String>,
}

/// Hypothesis-set evaluation outcome.
#[derive(Debug, Clone)]
pub struct HypothesisEvaluation {
    pub results: Vec<ArtifactEvaluation>,
    /// How many hypotheses were flagged weak, regenerated or not.
    pub flagged_weak: usize,
    pub improvements_made: usize,
    /// Average score before any regeneration.
    pub average_score: f64,
    pub threshold: f64,
}

/// Recommendation-set evaluation outcome.
#[derive(Debug, Clone)]
pub struct RecommendationEvaluation {
    pub results: Vec<ArtifactEvaluation>,
    pub average_score: f64,
    pub all_actionable: bool,
}

// =============================================================================
// HYPOTHESES
// =============================================================================

/// Evaluate every hypothesis and regenerate the weak ones.
///
/// Replacement is index-stable: strong hypotheses pass through untouched, weak
/// ones are swapped in place. A failed regeneration keeps the original.
pub async fn evaluate_hypotheses(
    gateway: &InferenceGateway,
    hypotheses: &[Hypothesis],
    observations: &[Observation],
    brand_visibility: f64,
    threshold: f64,
) -> (Vec<Hypothesis>, HypothesisEvaluation) {
    let summary = citation_summary(observations);

    let mut results: Vec<ArtifactEvaluation> = Vec::with_capacity(hypotheses.len());
    let mut weak: Vec<(usize, String)> = Vec::new();

    for (index, hypothesis) in hypotheses.iter().enumerate() {
        let request = prompts::hypothesis_critique_request(hypothesis, &summary, brand_visibility);

        let record = match gateway.chat(request).await {
            Ok(resp) => parse_evaluation(&resp.content).unwrap_or_else(|err| {
                tracing::warn!(index, error = %err, "critique parse failed, assuming neutral");
                EvaluationRecord::neutral()
            }),
            Err(err) => {
                tracing::warn!(index, error = %err, "critique call failed, assuming neutral");
                EvaluationRecord::neutral()
            }
        };

        if is_weak(&record, threshold) {
            tracing::info!(
                index,
                score = record.overall_score,
                "hypothesis below quality threshold, flagged for regeneration"
            );
            weak.push((index, record.critique.clone()));
        }

        results.push(ArtifactEvaluation {
            index,
            title: hypothesis.title.clone(),
            score: record.overall_score,
            critique: record.critique,
            suggestions: record.suggestions,
        });
    }

    let average_score = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
    };

    let flagged_weak = weak.len();
    let mut validated = hypotheses.to_vec();
    let mut improvements_made = 0;

    for (index, critique) in weak {
        let original = &hypotheses[index];
        let request = prompts::hypothesis_improvement_request(
            original,
            &critique,
            &summary,
            brand_visibility,
        );

        match gateway.chat(request).await {
            Ok(resp) => match parse_improved_hypothesis(&resp.content, original) {
                Some(improved) => {
                    tracing::info!(index, title = %improved.title, "hypothesis regenerated");
                    validated[index] = improved;
                    improvements_made += 1;
                }
                None => {
                    tracing::warn!(index, "regeneration parse failed, keeping original");
                }
            },
            Err(err) => {
                tracing::warn!(index, error = %err, "regeneration call failed, keeping original");
            }
        }
    }

    let evaluation = HypothesisEvaluation {
        results,
        flagged_weak,
        improvements_made,
        average_score,
        threshold,
    };

    (validated, evaluation)
}

/// Parse a regenerated hypothesis, falling back to the original's fields for
/// anything missing. Returns `None` when no JSON object can be extracted.
fn parse_improved_hypothesis(raw: &str, original: &Hypothesis) -> Option<Hypothesis> {
    let value: serde_json::Value = serde_json::from_str(extract_json_block(raw)).ok()?;
    let obj = value.as_object()?;

    Some(Hypothesis {
        title: obj
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or(&original.title)
            .to_string(),
        explanation: obj
            .get("explanation")
            .and_then(|v| v.as_str())
            .unwrap_or(&original.explanation)
            .to_string(),
        confidence: obj
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(original.confidence)
            .clamp(0.0, 1.0),
        supporting_evidence: obj
            .get("supporting_evidence")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_else(|| original.supporting_evidence.clone()),
    })
}

// =============================================================================
// RECOMMENDATIONS
// =============================================================================

/// Evaluate recommendations for actionability. Scoring only, no regeneration.
pub async fn evaluate_recommendations(
    gateway: &InferenceGateway,
    recommendations: &[Recommendation],
    threshold: f64,
) -> RecommendationEvaluation {
    let mut results: Vec<ArtifactEvaluation> = Vec::with_capacity(recommendations.len());

    for (index, recommendation) in recommendations.iter().enumerate() {
        let request = prompts::recommendation_critique_request(recommendation);

        let record = match gateway.chat(request).await {
            Ok(resp) => parse_evaluation(&resp.content).unwrap_or_else(|err| {
                tracing::warn!(index, error = %err, "critique parse failed, assuming neutral");
                EvaluationRecord::neutral()
            }),
            Err(err) => {
                tracing::warn!(index, error = %err, "critique call failed, assuming neutral");
                EvaluationRecord::neutral()
            }
        };

        results.push(ArtifactEvaluation {
            index,
            title: recommendation.title.clone(),
            score: record.overall_score,
            critique: record.critique,
            suggestions: record.suggestions,
        });
    }

    let average_score = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
    };

    let all_actionable = results.iter().all(|r| r.score >= threshold);

    RecommendationEvaluation {
        results,
        average_score,
        all_actionable,
    }
}

// =============================================================================
// SUMMARY
// =============================================================================

/// Fold both evaluations into the stable summary contract.
pub fn evaluation_summary(
    hypothesis_eval: &HypothesisEvaluation,
    recommendation_eval: &RecommendationEvaluation,
) -> EvaluationSummary {
    EvaluationSummary {
        evaluation_performed: true,
        hypotheses: HypothesisEvalSummary {
            total_evaluated: hypothesis_eval.results.len(),
            improvements_made: hypothesis_eval.improvements_made,
            average_quality_score: hypothesis_eval.average_score,
            threshold_used: hypothesis_eval.threshold,
            all_passed: hypothesis_eval.flagged_weak == 0,
        },
        recommendations: RecommendationEvalSummary {
            total_evaluated: recommendation_eval.results.len(),
            average_quality_score: recommendation_eval.average_score,
            all_actionable: recommendation_eval.all_actionable,
        },
        total_iterations: 1 + hypothesis_eval.improvements_made,
    }
}

/// Short citation-set summary embedded in critique prompts.
pub fn citation_summary(observations: &[Observation]) -> String {
    if observations.is_empty() {
        return "No citation data available".to_string();
    }

    let mut platforms: BTreeMap<&str, usize> = BTreeMap::new();
    for obs in observations {
        *platforms.entry(obs.platform.as_str()).or_insert(0) += 1;
    }
    let platform_counts: Vec<String> = platforms
        .iter()
        .map(|(platform, count)| format!("{platform}: {count}"))
        .collect();

    let brand_mentions = observations.iter().filter(|o| o.brand_mentioned).count();
    let competitor_mentions: usize = observations
        .iter()
        .map(|o| o.competitors_mentioned.len())
        .sum();

    format!(
        "Analyzed {} citations:\n- Platforms: {}\n- Brand mentions: {}\n- Competitor mentions: {}",
        observations.len(),
        platform_counts.join(", "),
        brand_mentions,
        competitor_mentions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;

    fn observation(platform: Platform, brand_mentioned: bool, competitors: usize) -> Observation {
        Observation {
            query: "q".to_string(),
            platform,
            brand_mentioned,
            position: None,
            context: None,
            competitors_mentioned: (0..competitors).map(|i| format!("c{i}.com")).collect(),
            raw_response: "text".to_string(),
            citations: Vec::new(),
        }
    }

    fn hypothesis(title: &str) -> Hypothesis {
        Hypothesis {
            title: title.to_string(),
            explanation: "explanation".to_string(),
            confidence: 0.7,
            supporting_evidence: vec!["evidence".to_string()],
        }
    }

    #[test]
    fn parses_plain_record() {
        let raw = r#"{"overall_score": 0.85, "critique": "solid", "suggestions": [], "should_regenerate": false}"#;
        let record = parse_evaluation(raw).unwrap();
        assert!((record.overall_score - 0.85).abs() < 1e-9);
        assert!(!record.should_regenerate);
    }

    #[test]
    fn parses_fenced_record_with_defaults() {
        let raw = "```json\n{\"overall_score\": 0.4}\n```";
        let record = parse_evaluation(raw).unwrap();
        assert!((record.overall_score - 0.4).abs() < 1e-9);
        assert!(record.critique.is_empty());
        assert!(record.suggestions.is_empty());
    }

    #[test]
    fn missing_score_is_a_parse_failure() {
        assert!(parse_evaluation(r#"{"critique": "hmm"}"#).is_err());
        assert!(parse_evaluation("not json at all").is_err());
    }

    #[test]
    fn weakness_from_score_or_flag() {
        let low = EvaluationRecord {
            overall_score: 0.5,
            critique: String::new(),
            suggestions: vec![],
            should_regenerate: false,
        };
        assert!(is_weak(&low, 0.7));

        let flagged = EvaluationRecord {
            overall_score: 0.95,
            critique: String::new(),
            suggestions: vec![],
            should_regenerate: true,
        };
        assert!(is_weak(&flagged, 0.7));

        let strong = EvaluationRecord {
            overall_score: 0.9,
            critique: String::new(),
            suggestions: vec![],
            should_regenerate: false,
        };
        assert!(!is_weak(&strong, 0.7));
    }

    #[test]
    fn neutral_record_passes_threshold() {
        assert!(!is_weak(&EvaluationRecord::neutral(), DEFAULT_QUALITY_THRESHOLD));
    }

    #[test]
    fn improved_hypothesis_inherits_missing_fields() {
        let original = hypothesis("Original title");
        let raw = r#"{"title": "Improved title", "confidence": 0.95}"#;
        let improved = parse_improved_hypothesis(raw, &original).unwrap();
        assert_eq!(improved.title, "Improved title");
        assert_eq!(improved.explanation, original.explanation);
        assert_eq!(improved.supporting_evidence, original.supporting_evidence);
        assert!((improved.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn improved_hypothesis_clamps_confidence() {
        let original = hypothesis("t");
        let raw = r#"{"confidence": 3.0}"#;
        let improved = parse_improved_hypothesis(raw, &original).unwrap();
        assert_eq!(improved.confidence, 1.0);
    }

    #[test]
    fn non_object_regeneration_is_rejected() {
        let original = hypothesis("t");
        assert!(parse_improved_hypothesis("[1, 2]", &original).is_none());
        assert!(parse_improved_hypothesis("plain text", &original).is_none());
    }

    #[test]
    fn citation_summary_counts_by_platform() {
        let observations = vec![
            observation(Platform::Chatgpt, true, 2),
            observation(Platform::Chatgpt, false, 0),
            observation(Platform::Perplexity, true, 1),
        ];
        let summary = citation_summary(&observations);
        assert!(summary.contains("Analyzed 3 citations"));
        assert!(summary.contains("chatgpt: 2, perplexity: 1"));
        assert!(summary.contains("Brand mentions: 2"));
        assert!(summary.contains("Competitor mentions: 3"));
    }

    #[test]
    fn citation_summary_handles_empty_input() {
        assert_eq!(citation_summary(&[]), "No citation data available");
    }

    #[test]
    fn summary_reports_all_passed_without_improvements() {
        let h_eval = HypothesisEvaluation {
            results: vec![],
            flagged_weak: 0,
            improvements_made: 0,
            average_score: 0.9,
            threshold: 0.7,
        };
        let r_eval = RecommendationEvaluation {
            results: vec![],
            average_score: 0.8,
            all_actionable: true,
        };
        let summary = evaluation_summary(&h_eval, &r_eval);
        assert!(summary.hypotheses.all_passed);
        assert_eq!(summary.total_iterations, 1);
    }
}
