//! Domain types: the analysis request, per-query observations, visibility
//! aggregates, generated artifacts, and the final result payload.
//!
//! Everything here is serde-serializable; [`AnalysisResult`] is the shape an
//! HTTP or CLI layer serializes verbatim.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// REQUEST
// =============================================================================

/// Supported AI answer platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Chatgpt,
    Perplexity,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Chatgpt => "chatgpt",
            Platform::Perplexity => "perplexity",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request for a visibility analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// The search query to analyze.
    pub query: String,
    /// The brand's domain to track, e.g. "acme.com".
    pub brand_domain: String,
    /// Competitor domains.
    #[serde(default)]
    pub competitors: Vec<String>,
    /// Platforms to query.
    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,
    /// Maximum number of query variations to test.
    #[serde(default = "default_num_queries")]
    pub num_queries: usize,
}

fn default_platforms() -> Vec<Platform> {
    vec![Platform::Chatgpt, Platform::Perplexity]
}

fn default_num_queries() -> usize {
    10
}

// =============================================================================
// OBSERVATIONS & SCORES
// =============================================================================

/// One structured result extracted from a single answer-generation call for
/// one query variant on one platform. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub query: String,
    pub platform: Platform,
    pub brand_mentioned: bool,
    /// Estimated position of the brand in the answer (1-based), if found.
    pub position: Option<u32>,
    /// Short excerpt of the answer for display.
    pub context: Option<String>,
    /// Competitor domains found in the answer.
    pub competitors_mentioned: Vec<String>,
    /// Full answer text.
    pub raw_response: String,
    /// Ranked source citations, when the platform returns them.
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Visibility metrics for one domain over a set of observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityScore {
    pub domain: String,
    pub total_mentions: usize,
    /// Fraction of observations mentioning the domain, in [0, 1].
    pub mention_rate: f64,
    pub avg_position: Option<f64>,
    /// Mention counts per platform.
    pub platforms: BTreeMap<String, usize>,
}

/// Brand-versus-competitor comparison.
///
/// Competitor scores are stable-sorted descending by mention rate; ties keep
/// the input competitor order. The gap is negative when the brand leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub brand_score: VisibilityScore,
    pub competitor_scores: Vec<VisibilityScore>,
    pub visibility_gap: f64,
    pub top_competitor: Option<String>,
}

// =============================================================================
// PATTERNS
// =============================================================================

/// Fixed pattern set derived from the observation list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patterns {
    /// Brand mention rate per platform.
    pub platform_bias: BTreeMap<String, f64>,
    pub positions: PositionPatterns,
    /// Answer excerpts where the brand appeared.
    pub contexts: Vec<String>,
    /// Competitors outperforming the brand.
    pub competitor_strengths: Vec<CompetitorStrength>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionPatterns {
    pub average: Option<f64>,
    pub best: Option<u32>,
    pub worst: Option<u32>,
    pub top_3: usize,
    pub top_5: usize,
    pub beyond_5: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorStrength {
    pub competitor: String,
    /// Mention-rate advantage over the brand.
    pub mention_advantage: f64,
    pub strong_platforms: Vec<String>,
}

// =============================================================================
// ARTIFACTS
// =============================================================================

/// Explanation of an observed visibility pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub title: String,
    pub explanation: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub supporting_evidence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Actionable improvement suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    /// Expected visibility improvement, in [0, 10].
    pub impact_score: f64,
    /// Implementation complexity, in [0, 10].
    pub effort_score: f64,
    pub action_items: Vec<String>,
    pub expected_outcome: String,
}

impl Recommendation {
    /// Impact/effort ratio used for ordering. Effort is floored at 1.
    pub fn roi(&self) -> f64 {
        self.impact_score / self.effort_score.max(1.0)
    }
}

// =============================================================================
// TRANSPARENCY & RESULT
// =============================================================================

/// One entry in the reasoning trace. Every stage appends exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step: String,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    /// Summary of the inputs the stage consumed.
    pub input: serde_json::Value,
    /// Short description of what the stage did.
    pub process: String,
    /// Summary of what the stage produced.
    pub output: serde_json::Value,
    pub duration_ms: u64,
    /// Terminal status: "completed", "partial_failure", or "cancelled".
    pub status: String,
}

/// One edge in the data-flow log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFlowEdge {
    pub from: String,
    pub to: String,
    pub data: String,
}

/// One captured error. Stage-internal failures land here instead of aborting
/// the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Overall run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    PartialFailure,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Quality-gate summary for the hypothesis set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HypothesisEvalSummary {
    pub total_evaluated: usize,
    pub improvements_made: usize,
    /// Average quality score before regeneration.
    pub average_quality_score: f64,
    pub threshold_used: f64,
    pub all_passed: bool,
}

/// Quality-gate summary for the recommendation set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationEvalSummary {
    pub total_evaluated: usize,
    pub average_quality_score: f64,
    pub all_actionable: bool,
}

/// The stable evaluation contract consumed by synthesis and by callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub evaluation_performed: bool,
    pub hypotheses: HypothesisEvalSummary,
    pub recommendations: RecommendationEvalSummary,
    /// 1 + number of regenerations.
    pub total_iterations: usize,
}

/// Complete analysis result with transparency data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub request: AnalysisRequest,
    pub status: RunStatus,
    pub observations: Vec<Observation>,
    pub comparison: Comparison,
    pub patterns: Patterns,
    pub hypotheses: Vec<Hypothesis>,
    pub recommendations: Vec<Recommendation>,
    pub summary: String,
    pub reasoning_trace: Vec<ReasoningStep>,
    pub data_flow: Vec<DataFlowEdge>,
    /// Per-step wall-clock durations in milliseconds, including "total".
    pub step_timings: BTreeMap<String, u64>,
    pub errors: Vec<RunError>,
    pub evaluation: EvaluationSummary,
}
