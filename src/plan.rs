//! Planning stage: deterministic query-variation expansion plus an advisory
//! strategy narrative from the inference gateway.
//!
//! The narrative is captured for the reasoning trace only; nothing downstream
//! consumes it, and a failed narrative call degrades to a canned line instead
//! of aborting the run.

use crate::gateway::{InferenceGateway, ProviderError};
use crate::model::{AnalysisRequest, Platform};
use crate::prompts;

/// Hard cap on query variations regardless of the requested count.
pub const MAX_QUERY_VARIATIONS: usize = 5;

/// Execution plan for one run.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub original_query: String,
    pub variations: Vec<String>,
    pub platforms: Vec<Platform>,
    pub brand: String,
    pub competitors: Vec<String>,
    /// Maximum variations to actually test.
    pub num_queries: usize,
    /// Free-form strategy narrative. Advisory only.
    pub narrative: String,
}

impl QueryPlan {
    /// The variations that Collect will fan out over.
    pub fn queries_to_test(&self) -> &[String] {
        let n = self.num_queries.min(self.variations.len());
        &self.variations[..n]
    }

    pub fn total_tasks(&self) -> usize {
        self.queries_to_test().len() * self.platforms.len()
    }
}

/// Deterministic prefix/suffix expansion of the base query.
pub fn query_variations(query: &str) -> Vec<String> {
    let mut variations = vec![query.to_string()];
    let lower = query.to_lowercase();

    if !lower.starts_with("best") {
        variations.push(format!("best {query}"));
    }
    if !lower.starts_with("top") {
        variations.push(format!("top {query}"));
    }
    variations.push(format!("{query} comparison"));
    variations.push(format!("{query} for businesses"));

    variations.truncate(MAX_QUERY_VARIATIONS);
    variations
}

/// Build the plan. Pure except for the single advisory narrative call, whose
/// failure is returned for the error list rather than raised.
pub async fn build_plan(
    gateway: &InferenceGateway,
    request: &AnalysisRequest,
) -> (QueryPlan, Option<ProviderError>) {
    let variations = query_variations(&request.query);

    let (narrative, narrative_error) = match gateway.chat(prompts::planning_request(request)).await
    {
        Ok(resp) => (resp.content, None),
        Err(err) => {
            tracing::warn!(error = %err, "strategy narrative call failed, using fallback");
            (
                format!(
                    "Strategy narrative unavailable ({}). Proceeding with deterministic \
                     expansion: {} query variations across {} platforms.",
                    err.code(),
                    variations.len(),
                    request.platforms.len()
                ),
                Some(err),
            )
        }
    };

    let plan = QueryPlan {
        original_query: request.query.clone(),
        variations,
        platforms: request.platforms.clone(),
        brand: request.brand_domain.clone(),
        competitors: request.competitors.clone(),
        num_queries: request.num_queries,
        narrative,
    };

    (plan, narrative_error)
}
