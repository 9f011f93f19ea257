//! Run orchestrator: the directed six-stage pipeline behind every analysis.
//!
//! Plan → Collect (bounded fan-out) → Analyze → Generate (two-task join) →
//! Evaluate (quality gate) → Synthesize. The orchestrator owns the run's
//! [`RunState`] and is the only writer to it; stages hand back
//! [`StageOutput`]s that are merged under the documented per-field strategy.
//! Per-stage failures degrade the run and land in the error list; only
//! structural validation of the request can fail the call itself.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::json;

use crate::evaluate::{self, DEFAULT_QUALITY_THRESHOLD};
use crate::extract;
use crate::gateway::InferenceGateway;
use crate::generate::{self, GenerationReport};
use crate::history::{self, HistoryStore};
use crate::model::{
    AnalysisRequest, AnalysisResult, Comparison, DataFlowEdge, Hypothesis, Observation, Patterns,
    Platform, ReasoningStep, Recommendation, RunError, RunStatus,
};
use crate::plan::{self, QueryPlan};
use crate::prompts;
use crate::scoring;
use crate::state::{RunState, StageOutput};

/// Fixed ceiling on concurrent collection calls.
///
/// Independent of task count: it bounds load on the rate-limited upstream
/// services no matter how many query variations are requested.
pub const COLLECT_CONCURRENCY: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Validate the request before any stage runs. Structural failures reject the
/// run outright; everything later degrades instead of failing.
pub fn validate_request(request: &AnalysisRequest) -> Result<(), OrchestratorError> {
    if request.query.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(
            "query must not be empty".into(),
        ));
    }
    if request.brand_domain.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(
            "brand_domain must not be empty".into(),
        ));
    }
    if request.platforms.is_empty() {
        return Err(OrchestratorError::InvalidRequest(
            "platforms must not be empty".into(),
        ));
    }
    if request.num_queries == 0 {
        return Err(OrchestratorError::InvalidRequest(
            "num_queries must be >= 1".into(),
        ));
    }
    Ok(())
}

/// The pipeline entry point. Construct one per process with its dependencies
/// injected; there is no hidden global instance.
pub struct Orchestrator {
    gateway: Arc<InferenceGateway>,
    history: Option<Arc<dyn HistoryStore>>,
    quality_threshold: f64,
}

struct CollectSummary {
    successful: usize,
    failed: usize,
    cancelled: bool,
}

impl Orchestrator {
    pub fn new(gateway: Arc<InferenceGateway>, history: Option<Arc<dyn HistoryStore>>) -> Self {
        Self {
            gateway,
            history,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
        }
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// Run a complete analysis.
    pub async fn run_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResult, OrchestratorError> {
        self.run_with_cancel(request, None).await
    }

    /// Run a complete analysis with a caller-level cancellation flag.
    ///
    /// When the flag flips mid-run the current stage stops dispatching, any
    /// in-flight collection tasks are dropped, and a partial result with
    /// status `cancelled` is returned.
    pub async fn run_with_cancel(
        &self,
        request: AnalysisRequest,
        cancel: Option<&AtomicBool>,
    ) -> Result<AnalysisResult, OrchestratorError> {
        validate_request(&request)?;

        let run_start = Instant::now();
        let mut state = RunState::new(request);

        tracing::info!(
            id = %state.id,
            query = %state.request.query,
            brand = %state.request.brand_domain,
            competitors = state.request.competitors.len(),
            platforms = state.request.platforms.len(),
            "starting visibility analysis"
        );

        // Stage 1: Plan.
        let (query_plan, plan_output) = self.plan_stage(&state.request).await;
        state.merge(plan_output);

        if is_cancelled(cancel) {
            return Ok(self.finalize(state, RunStatus::Cancelled, run_start));
        }

        // Stage 2: Collect (parallel fan-out, bounded).
        let (collect_output, collect) = self.collect_stage(&query_plan, cancel).await;
        state.merge(collect_output);

        if collect.cancelled || is_cancelled(cancel) {
            return Ok(self.finalize(state, RunStatus::Cancelled, run_start));
        }

        // Stage 3: Analyze (pure aggregation).
        let analyze_output = self.analyze_stage(&state.observations, &state.request);
        state.merge(analyze_output);

        if is_cancelled(cancel) {
            return Ok(self.finalize(state, RunStatus::Cancelled, run_start));
        }

        // Stage 4: Generate (two independent tasks).
        let comparison = state
            .comparison
            .clone()
            .expect("analyze stage sets comparison");
        let patterns = state.patterns.clone().unwrap_or_default();
        let generate_output = self
            .generate_stage(&state.request.query, &comparison, &patterns)
            .await;
        state.merge(generate_output);

        if is_cancelled(cancel) {
            return Ok(self.finalize(state, RunStatus::Cancelled, run_start));
        }

        // Stage 5: Evaluate (quality gate, sequential).
        let evaluate_output = self
            .evaluate_stage(
                &state.hypotheses,
                &state.recommendations,
                &state.observations,
                comparison.brand_score.mention_rate,
            )
            .await;
        state.merge(evaluate_output);

        // Stage 6: Synthesize.
        let synthesize_output = self.synthesize_stage(&state);
        state.merge(synthesize_output);

        let status = if collect.failed > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Completed
        };

        tracing::info!(
            id = %state.id,
            status = status.as_str(),
            observations = state.observations.len(),
            hypotheses = state.hypotheses.len(),
            recommendations = state.recommendations.len(),
            successful = collect.successful,
            failed = collect.failed,
            "analysis complete"
        );

        Ok(self.finalize(state, status, run_start))
    }

    // =========================================================================
    // STAGES
    // =========================================================================

    async fn plan_stage(&self, request: &AnalysisRequest) -> (QueryPlan, StageOutput) {
        let step_start = Instant::now();
        tracing::info!("stage 1/6: planning");

        let (query_plan, narrative_error) = plan::build_plan(&self.gateway, request).await;
        let duration_ms = elapsed_ms(step_start);

        let mut output = StageOutput::default();

        if let Some(err) = narrative_error {
            output.errors.push(RunError {
                step: "planning".to_string(),
                platform: None,
                query: None,
                message: err.to_string(),
                timestamp: Utc::now(),
            });
        }

        let platforms: Vec<&str> = query_plan.platforms.iter().map(|p| p.as_str()).collect();
        output.reasoning.push(ReasoningStep {
            step: "planning".to_string(),
            agent: "PlannerAgent".to_string(),
            timestamp: Utc::now(),
            input: json!({
                "query": request.query,
                "brand": request.brand_domain,
                "competitors": request.competitors,
            }),
            process: "Analyzing query intent and creating execution strategy".to_string(),
            output: json!({
                "query_variations": query_plan.variations.len(),
                "platforms": platforms,
                "estimated_queries": query_plan.total_tasks(),
                "narrative": query_plan.narrative,
            }),
            duration_ms,
            status: "completed".to_string(),
        });

        output.data_flow.push(DataFlowEdge {
            from: "Caller".to_string(),
            to: "Planner".to_string(),
            data: "Query, brand, competitors".to_string(),
        });
        output.data_flow.push(DataFlowEdge {
            from: "Planner".to_string(),
            to: "Collector".to_string(),
            data: format!("{} query variations", query_plan.variations.len()),
        });

        output.timings.push(("planning".to_string(), duration_ms));

        (query_plan, output)
    }

    async fn collect_stage(
        &self,
        query_plan: &QueryPlan,
        cancel: Option<&AtomicBool>,
    ) -> (StageOutput, CollectSummary) {
        let step_start = Instant::now();

        struct TaskSpec {
            query: String,
            platform: Platform,
        }

        let queries = query_plan.queries_to_test();
        let tasks: Vec<TaskSpec> = queries
            .iter()
            .flat_map(|query| {
                query_plan.platforms.iter().map(move |&platform| TaskSpec {
                    query: query.clone(),
                    platform,
                })
            })
            .collect();
        let total = tasks.len();

        tracing::info!(
            total,
            concurrency = COLLECT_CONCURRENCY,
            "stage 2/6: collecting visibility data"
        );

        let brand = query_plan.brand.clone();
        let competitors = query_plan.competitors.clone();

        let mut observations: Vec<Observation> = Vec::new();
        let mut errors: Vec<RunError> = Vec::new();
        let mut cancelled = false;

        {
            // One worker per task, at most COLLECT_CONCURRENCY in flight.
            // A task failure never cancels its siblings; outcomes are gathered
            // in completion order, which the scoring engine does not depend on.
            let mut outcomes = stream::iter(tasks.into_iter().map(|task| {
                let gateway = Arc::clone(&self.gateway);
                let brand = brand.clone();
                let competitors = competitors.clone();
                async move {
                    let outcome = match task.platform {
                        Platform::Chatgpt => gateway
                            .chat(prompts::answer_request(&task.query))
                            .await
                            .map(|resp| {
                                extract::extract_chat(
                                    &resp.content,
                                    &task.query,
                                    &brand,
                                    &competitors,
                                )
                            }),
                        Platform::Perplexity => {
                            gateway.search(&task.query).await.map(|resp| {
                                extract::extract_search(&resp, &task.query, &brand, &competitors)
                            })
                        }
                    };
                    (task, outcome)
                }
            }))
            .buffer_unordered(COLLECT_CONCURRENCY);

            while let Some((task, outcome)) = outcomes.next().await {
                match outcome {
                    Ok(observation) => observations.push(observation),
                    Err(err) => {
                        tracing::warn!(
                            platform = task.platform.as_str(),
                            query = %task.query,
                            error = %err,
                            "collection task failed"
                        );
                        errors.push(RunError {
                            step: "data_collection".to_string(),
                            platform: Some(task.platform),
                            query: Some(task.query),
                            message: err.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }

                // Dropping the stream below aborts any in-flight siblings.
                if is_cancelled(cancel) {
                    cancelled = true;
                    break;
                }
            }
        }

        let successful = observations.len();
        let failed = errors.len();
        let duration_ms = elapsed_ms(step_start);

        let status = if cancelled {
            "cancelled"
        } else if successful > 0 {
            "completed"
        } else {
            "partial_failure"
        };

        tracing::info!(successful, failed, status, "collection finished");

        let mut output = StageOutput::default();
        output.reasoning.push(ReasoningStep {
            step: "data_collection".to_string(),
            agent: "DataCollectorAgent".to_string(),
            timestamp: Utc::now(),
            input: json!({
                "query_variations": queries,
                "platforms": query_plan.platforms.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            }),
            process: "Parallel execution of queries across all platforms".to_string(),
            output: json!({
                "total_queries": total,
                "successful": successful,
                "failed": failed,
                "concurrency": COLLECT_CONCURRENCY,
            }),
            duration_ms,
            status: status.to_string(),
        });
        output.data_flow.push(DataFlowEdge {
            from: "Collector".to_string(),
            to: "Analyzer".to_string(),
            data: format!("{successful} observations"),
        });
        output.timings.push(("data_collection".to_string(), duration_ms));
        output.observations = observations;
        output.errors = errors;

        (
            output,
            CollectSummary {
                successful,
                failed,
                cancelled,
            },
        )
    }

    fn analyze_stage(
        &self,
        observations: &[Observation],
        request: &AnalysisRequest,
    ) -> StageOutput {
        let step_start = Instant::now();
        tracing::info!(observations = observations.len(), "stage 3/6: analyzing");

        let comparison =
            scoring::comparison(observations, &request.brand_domain, &request.competitors);
        let patterns = scoring::extract_patterns(observations, &comparison);

        let duration_ms = elapsed_ms(step_start);

        let mut output = StageOutput::default();
        output.reasoning.push(ReasoningStep {
            step: "analysis".to_string(),
            agent: "AnalyzerAgent".to_string(),
            timestamp: Utc::now(),
            input: json!({
                "observations": observations.len(),
                "brand": request.brand_domain,
                "competitors": request.competitors,
            }),
            process: "Statistical aggregation and pattern extraction".to_string(),
            output: json!({
                "brand_mention_rate": comparison.brand_score.mention_rate,
                "brand_mentions": comparison.brand_score.total_mentions,
                "visibility_gap": comparison.visibility_gap,
                "top_competitor": comparison.top_competitor,
                "patterns_identified": patterns.competitor_strengths.len()
                    + patterns.platform_bias.len(),
            }),
            duration_ms,
            status: "completed".to_string(),
        });
        output.data_flow.push(DataFlowEdge {
            from: "Analyzer".to_string(),
            to: "Generators".to_string(),
            data: "Visibility scores and patterns".to_string(),
        });
        output.timings.push(("analysis".to_string(), duration_ms));
        output.comparison = Some(comparison);
        output.patterns = Some(patterns);

        output
    }

    async fn generate_stage(
        &self,
        query: &str,
        comparison: &Comparison,
        patterns: &Patterns,
    ) -> StageOutput {
        tracing::info!("stage 4/6: generating artifacts (parallel)");

        // Both branches run concurrently; recommendations therefore see an
        // empty hypothesis list, mirroring the fan-out dependency graph.
        let hypothesis_task = async {
            let start = Instant::now();
            let (hypotheses, report) =
                generate::generate_hypotheses(&self.gateway, query, comparison, patterns).await;
            (hypotheses, report, elapsed_ms(start))
        };
        let recommendation_task = async {
            let start = Instant::now();
            let (recommendations, report) = generate::generate_recommendations(
                &self.gateway,
                query,
                comparison,
                &[],
                patterns,
            )
            .await;
            (recommendations, report, elapsed_ms(start))
        };

        let (
            (hypotheses, hypothesis_report, hypothesis_ms),
            (recommendations, recommendation_report, recommendation_ms),
        ) = tokio::join!(hypothesis_task, recommendation_task);

        let mut output = StageOutput::default();

        push_generation_trace(
            &mut output,
            "hypothesis_generation",
            "HypothesisAgent",
            "Causal reasoning over visibility patterns",
            hypotheses.len(),
            &hypothesis_report,
            hypothesis_ms,
        );
        push_generation_trace(
            &mut output,
            "recommendation_generation",
            "RecommenderAgent",
            "Action synthesis prioritized by impact/effort ratio",
            recommendations.len(),
            &recommendation_report,
            recommendation_ms,
        );

        output.data_flow.push(DataFlowEdge {
            from: "Generators".to_string(),
            to: "Evaluator".to_string(),
            data: format!(
                "{} hypotheses, {} recommendations",
                hypotheses.len(),
                recommendations.len()
            ),
        });
        output.hypotheses = Some(hypotheses);
        output.recommendations = Some(recommendations);

        output
    }

    async fn evaluate_stage(
        &self,
        hypotheses: &[Hypothesis],
        recommendations: &[Recommendation],
        observations: &[Observation],
        brand_visibility: f64,
    ) -> StageOutput {
        let step_start = Instant::now();
        tracing::info!(
            hypotheses = hypotheses.len(),
            recommendations = recommendations.len(),
            "stage 5/6: quality gate"
        );

        let (validated, hypothesis_eval) = evaluate::evaluate_hypotheses(
            &self.gateway,
            hypotheses,
            observations,
            brand_visibility,
            self.quality_threshold,
        )
        .await;

        let recommendation_eval = evaluate::evaluate_recommendations(
            &self.gateway,
            recommendations,
            self.quality_threshold,
        )
        .await;

        let summary = evaluate::evaluation_summary(&hypothesis_eval, &recommendation_eval);
        let duration_ms = elapsed_ms(step_start);

        let mut output = StageOutput::default();
        output.reasoning.push(ReasoningStep {
            step: "evaluation".to_string(),
            agent: "EvaluatorAgent".to_string(),
            timestamp: Utc::now(),
            input: json!({
                "hypotheses_to_evaluate": hypotheses.len(),
                "recommendations_to_evaluate": recommendations.len(),
                "observations_available": observations.len(),
                "quality_threshold": self.quality_threshold,
            }),
            process: "Critique, score, and regenerate weak hypotheses".to_string(),
            output: json!({
                "hypothesis_results": hypothesis_eval.results,
                "hypotheses_improved": hypothesis_eval.improvements_made,
                "avg_hypothesis_quality": hypothesis_eval.average_score,
                "recommendation_results": recommendation_eval.results,
                "avg_recommendation_quality": recommendation_eval.average_score,
            }),
            duration_ms,
            status: "completed".to_string(),
        });
        output.data_flow.push(DataFlowEdge {
            from: "Evaluator".to_string(),
            to: "Synthesizer".to_string(),
            data: format!(
                "Validated outputs ({} improvements)",
                hypothesis_eval.improvements_made
            ),
        });
        output.timings.push(("evaluation".to_string(), duration_ms));
        output.hypotheses = Some(validated);
        output.evaluation = Some(summary);

        output
    }

    fn synthesize_stage(&self, state: &RunState) -> StageOutput {
        let step_start = Instant::now();
        tracing::info!("stage 6/6: synthesizing summary");

        let summary = render_summary(state);
        let duration_ms = elapsed_ms(step_start);

        let mut output = StageOutput::default();
        output.reasoning.push(ReasoningStep {
            step: "synthesis".to_string(),
            agent: "SynthesisAgent".to_string(),
            timestamp: Utc::now(),
            input: json!({
                "hypotheses": state.hypotheses.len(),
                "recommendations": state.recommendations.len(),
                "observations": state.observations.len(),
            }),
            process: "Rendering executive summary from validated outputs".to_string(),
            output: json!({ "summary_length": summary.len() }),
            duration_ms,
            status: "completed".to_string(),
        });
        output.data_flow.push(DataFlowEdge {
            from: "Synthesizer".to_string(),
            to: "Caller".to_string(),
            data: "Complete analysis with reasoning trace".to_string(),
        });
        output.timings.push(("synthesis".to_string(), duration_ms));
        output.summary = Some(summary);

        output
    }

    fn finalize(
        &self,
        mut state: RunState,
        status: RunStatus,
        run_start: Instant,
    ) -> AnalysisResult {
        state
            .step_timings
            .entry("total".to_string())
            .or_insert(elapsed_ms(run_start));

        let result = state.into_result(status);

        if let Some(store) = &self.history {
            history::spawn_save(Arc::clone(store), &result);
        }

        result
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel
        .map(|flag| flag.load(AtomicOrdering::Relaxed))
        .unwrap_or(false)
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[allow(clippy::too_many_arguments)]
fn push_generation_trace(
    output: &mut StageOutput,
    step: &str,
    agent: &str,
    process: &str,
    count: usize,
    report: &GenerationReport,
    duration_ms: u64,
) {
    if let Some(error) = &report.error {
        output.errors.push(RunError {
            step: step.to_string(),
            platform: None,
            query: None,
            message: format!("fell back to rule-based output: {error}"),
            timestamp: Utc::now(),
        });
    }

    output.reasoning.push(ReasoningStep {
        step: step.to_string(),
        agent: agent.to_string(),
        timestamp: Utc::now(),
        input: serde_json::Value::Null,
        process: process.to_string(),
        output: json!({
            "artifacts_generated": count,
            "used_fallback": report.used_fallback,
        }),
        duration_ms,
        status: "completed".to_string(),
    });
    output.timings.push((step.to_string(), duration_ms));
}

/// Executive summary rendered from the final state.
fn render_summary(state: &RunState) -> String {
    let comparison = state.comparison.as_ref();
    let brand_rate = comparison
        .map(|c| c.brand_score.mention_rate * 100.0)
        .unwrap_or(0.0);
    let brand_mentions = comparison.map(|c| c.brand_score.total_mentions).unwrap_or(0);
    let gap = comparison.map(|c| c.visibility_gap * 100.0).unwrap_or(0.0);

    let (top_name, top_rate) = comparison
        .and_then(|c| c.competitor_scores.first())
        .map(|s| (s.domain.as_str(), s.mention_rate * 100.0))
        .unwrap_or(("N/A", 0.0));

    let findings = if state.hypotheses.is_empty() {
        "- No significant patterns identified".to_string()
    } else {
        state
            .hypotheses
            .iter()
            .take(3)
            .map(|h| format!("- {} (Confidence: {:.0}%)", h.title, h.confidence * 100.0))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Visibility Analysis Summary for \"{query}\"\n\
         \n\
         Brand Performance:\n\
         - {brand}: {brand_rate:.1}% visibility rate\n\
         - Mentioned in {brand_mentions} answers\n\
         \n\
         Competitive Landscape:\n\
         - Top competitor: {top_name} ({top_rate:.1}% visibility)\n\
         - Visibility gap: {gap:.1} percentage points\n\
         \n\
         Key Findings:\n\
         {findings}\n\
         \n\
         Analysis Method:\n\
         - Multi-stage pipeline with bounded parallel collection\n\
         - {observations} AI platform answers analyzed\n\
         - {steps} reasoning steps captured",
        query = state.request.query,
        brand = state.request.brand_domain,
        observations = state.observations.len(),
        steps = state.reasoning_trace.len(),
    )
}
