//! Scoring engine: pure aggregation of observations into per-domain
//! visibility metrics, a brand-versus-competitor comparison, and the fixed
//! pattern set fed to the generation stage.
//!
//! All functions here are deterministic over their inputs; re-running on the
//! same observation list yields identical values.

use std::collections::BTreeMap;

use crate::model::{
    Comparison, CompetitorStrength, Observation, Patterns, PositionPatterns, VisibilityScore,
};

/// Words per estimated position unit when scanning raw answer text.
const SCORE_WORDS_PER_UNIT: usize = 50;

/// Compute visibility metrics for one domain.
///
/// A domain counts as mentioned when any of these fire:
/// - its name appears (case-insensitive substring) in the raw answer text,
/// - it is already flagged in the observation's competitor-mention list,
/// - the observation's brand flag is set and the domain equals the query text
///   (degenerate self-query case).
pub fn visibility_score(observations: &[Observation], domain: &str) -> VisibilityScore {
    let total = observations.len();
    let domain_lower = domain.to_lowercase();

    let mut mentions = 0usize;
    let mut positions: Vec<f64> = Vec::new();
    let mut platform_mentions: BTreeMap<String, usize> = BTreeMap::new();

    for obs in observations {
        let response_lower = obs.raw_response.to_lowercase();

        let is_mentioned = response_lower.contains(&domain_lower)
            || obs.competitors_mentioned.iter().any(|c| c == domain)
            || (obs.brand_mentioned && domain_lower == obs.query.to_lowercase());

        if !is_mentioned {
            continue;
        }

        mentions += 1;
        *platform_mentions
            .entry(obs.platform.as_str().to_string())
            .or_insert(0) += 1;

        if let Some(offset) = response_lower.find(&domain_lower) {
            let words_before = response_lower[..offset].split_whitespace().count();
            positions.push((words_before / SCORE_WORDS_PER_UNIT) as f64 + 1.0);
        } else if let Some(pos) = obs.position {
            positions.push(pos as f64);
        }
    }

    let mention_rate = if total > 0 {
        mentions as f64 / total as f64
    } else {
        0.0
    };

    let avg_position = if positions.is_empty() {
        None
    } else {
        Some(positions.iter().sum::<f64>() / positions.len() as f64)
    };

    VisibilityScore {
        domain: domain.to_string(),
        total_mentions: mentions,
        mention_rate,
        avg_position,
        platforms: platform_mentions,
    }
}

/// Compute the brand-versus-competitor comparison.
///
/// Competitor scores are stable-sorted descending by mention rate, so ties
/// preserve input order. The gap is top competitor rate minus brand rate,
/// zero with no competitors, negative when the brand leads.
pub fn comparison(
    observations: &[Observation],
    brand_domain: &str,
    competitors: &[String],
) -> Comparison {
    let brand_score = visibility_score(observations, brand_domain);

    let mut competitor_scores: Vec<VisibilityScore> = competitors
        .iter()
        .map(|c| visibility_score(observations, c))
        .collect();

    // Vec::sort_by is stable; reversing the comparison keeps tied entries in
    // input order while sorting descending.
    competitor_scores.sort_by(|a, b| {
        b.mention_rate
            .partial_cmp(&a.mention_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let visibility_gap = match competitor_scores.first() {
        Some(top) => top.mention_rate - brand_score.mention_rate,
        None => 0.0,
    };
    let top_competitor = competitor_scores.first().map(|s| s.domain.clone());

    Comparison {
        brand_score,
        competitor_scores,
        visibility_gap,
        top_competitor,
    }
}

/// Derive the fixed pattern set from observations and the comparison.
pub fn extract_patterns(observations: &[Observation], comparison: &Comparison) -> Patterns {
    Patterns {
        platform_bias: platform_bias(observations),
        positions: position_patterns(observations),
        contexts: brand_contexts(observations),
        competitor_strengths: competitor_strengths(comparison),
    }
}

/// Brand mention rate per platform.
fn platform_bias(observations: &[Observation]) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, (usize, usize)> = BTreeMap::new();

    for obs in observations {
        let entry = totals.entry(obs.platform.as_str().to_string()).or_insert((0, 0));
        entry.0 += 1;
        if obs.brand_mentioned {
            entry.1 += 1;
        }
    }

    totals
        .into_iter()
        .map(|(platform, (total, mentions))| {
            let rate = if total > 0 {
                mentions as f64 / total as f64
            } else {
                0.0
            };
            (platform, rate)
        })
        .collect()
}

fn position_patterns(observations: &[Observation]) -> PositionPatterns {
    let positions: Vec<u32> = observations.iter().filter_map(|o| o.position).collect();

    if positions.is_empty() {
        return PositionPatterns::default();
    }

    PositionPatterns {
        average: Some(positions.iter().map(|&p| p as f64).sum::<f64>() / positions.len() as f64),
        best: positions.iter().min().copied(),
        worst: positions.iter().max().copied(),
        top_3: positions.iter().filter(|&&p| p <= 3).count(),
        top_5: positions.iter().filter(|&&p| p <= 5).count(),
        beyond_5: positions.iter().filter(|&&p| p > 5).count(),
    }
}

fn brand_contexts(observations: &[Observation]) -> Vec<String> {
    observations
        .iter()
        .filter(|o| o.brand_mentioned)
        .filter_map(|o| o.context.clone())
        .collect()
}

fn competitor_strengths(comparison: &Comparison) -> Vec<CompetitorStrength> {
    comparison
        .competitor_scores
        .iter()
        .filter(|s| s.mention_rate > comparison.brand_score.mention_rate)
        .map(|s| CompetitorStrength {
            competitor: s.domain.clone(),
            mention_advantage: s.mention_rate - comparison.brand_score.mention_rate,
            strong_platforms: s
                .platforms
                .iter()
                .filter(|(_, &count)| count > 0)
                .map(|(platform, _)| platform.clone())
                .collect(),
        })
        .collect()
}
