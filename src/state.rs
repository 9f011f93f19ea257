//! Shared run-state accumulator and the per-stage merge discipline.
//!
//! `RunState` is the only mutable object a run threads through its stages,
//! and only the orchestrator writes to it, by merging each stage's
//! [`StageOutput`]. Merge strategy per field:
//!
//! - observations, reasoning trace, data flow, errors: append-only union
//! - step timings: key-wise union, first write wins
//! - comparison, patterns, summary, evaluation: write-once scalars
//! - hypotheses, recommendations: replaced wholesale when present

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    AnalysisRequest, AnalysisResult, Comparison, DataFlowEdge, EvaluationSummary, Hypothesis,
    Observation, Patterns, ReasoningStep, Recommendation, RunError, RunStatus,
};
use crate::scoring;

/// The mutable accumulator for one run. Created empty at run start, discarded
/// after the result is returned. No cross-run sharing.
#[derive(Debug)]
pub struct RunState {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub request: AnalysisRequest,
    pub observations: Vec<Observation>,
    pub comparison: Option<Comparison>,
    pub patterns: Option<Patterns>,
    pub hypotheses: Vec<Hypothesis>,
    pub recommendations: Vec<Recommendation>,
    pub summary: String,
    pub reasoning_trace: Vec<ReasoningStep>,
    pub data_flow: Vec<DataFlowEdge>,
    pub step_timings: BTreeMap<String, u64>,
    pub errors: Vec<RunError>,
    pub evaluation: Option<EvaluationSummary>,
}

/// What one stage hands back to the orchestrator.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub observations: Vec<Observation>,
    pub comparison: Option<Comparison>,
    pub patterns: Option<Patterns>,
    pub hypotheses: Option<Vec<Hypothesis>>,
    pub recommendations: Option<Vec<Recommendation>>,
    pub summary: Option<String>,
    pub reasoning: Vec<ReasoningStep>,
    pub data_flow: Vec<DataFlowEdge>,
    pub timings: Vec<(String, u64)>,
    pub errors: Vec<RunError>,
    pub evaluation: Option<EvaluationSummary>,
}

impl RunState {
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            request,
            observations: Vec::new(),
            comparison: None,
            patterns: None,
            hypotheses: Vec::new(),
            recommendations: Vec::new(),
            summary: String::new(),
            reasoning_trace: Vec::new(),
            data_flow: Vec::new(),
            step_timings: BTreeMap::new(),
            errors: Vec::new(),
            evaluation: None,
        }
    }

    /// Merge one stage's output. See the module docs for per-field strategy.
    pub fn merge(&mut self, output: StageOutput) {
        self.observations.extend(output.observations);
        self.reasoning_trace.extend(output.reasoning);
        self.data_flow.extend(output.data_flow);
        self.errors.extend(output.errors);

        for (key, duration_ms) in output.timings {
            self.step_timings.entry(key).or_insert(duration_ms);
        }

        if self.comparison.is_none() {
            self.comparison = output.comparison;
        } else if output.comparison.is_some() {
            tracing::warn!("comparison already set, ignoring duplicate write");
        }

        if self.patterns.is_none() {
            self.patterns = output.patterns;
        } else if output.patterns.is_some() {
            tracing::warn!("patterns already set, ignoring duplicate write");
        }

        if let Some(hypotheses) = output.hypotheses {
            self.hypotheses = hypotheses;
        }
        if let Some(recommendations) = output.recommendations {
            self.recommendations = recommendations;
        }

        if self.summary.is_empty() {
            if let Some(summary) = output.summary {
                self.summary = summary;
            }
        }

        if self.evaluation.is_none() {
            self.evaluation = output.evaluation;
        }
    }

    /// Finalize into the caller-facing result. A partial state (cancelled run)
    /// still yields a complete, serializable payload.
    pub fn into_result(self, status: RunStatus) -> AnalysisResult {
        let comparison = self.comparison.unwrap_or_else(|| {
            scoring::comparison(
                &self.observations,
                &self.request.brand_domain,
                &self.request.competitors,
            )
        });

        AnalysisResult {
            id: self.id,
            timestamp: self.started_at,
            request: self.request,
            status,
            observations: self.observations,
            comparison,
            patterns: self.patterns.unwrap_or_default(),
            hypotheses: self.hypotheses,
            recommendations: self.recommendations,
            summary: self.summary,
            reasoning_trace: self.reasoning_trace,
            data_flow: self.data_flow,
            step_timings: self.step_timings,
            errors: self.errors,
            evaluation: self.evaluation.unwrap_or_default(),
        }
    }
}
