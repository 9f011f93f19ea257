//! Mention extraction: turn one raw platform answer into a structured
//! [`Observation`].
//!
//! Matching is deliberately relaxed: answer engines usually reference a brand
//! by name ("Acme") rather than full domain ("acme.com"), so a domain counts
//! as mentioned when either the full domain or its name segment (the text
//! before the first dot) appears, case-insensitively.

use crate::gateway::SearchResponse;
use crate::model::{Observation, Platform};

/// Words per estimated position unit for plain chat answers.
const CHAT_WORDS_PER_UNIT: usize = 20;

/// Words per estimated position unit for search answers without a citation hit.
const SEARCH_WORDS_PER_UNIT: usize = 30;

/// Maximum excerpt length stored on an observation.
const CONTEXT_EXCERPT_LEN: usize = 500;

/// The text before the first dot: "acme" from "acme.com".
pub fn name_segment(domain: &str) -> &str {
    domain.split('.').next().unwrap_or(domain)
}

/// Relaxed mention test against lowercased answer text.
pub fn domain_mentioned(text_lower: &str, domain: &str) -> bool {
    let domain_lower = domain.to_lowercase();
    if text_lower.contains(&domain_lower) {
        return true;
    }
    let name = name_segment(&domain_lower);
    !name.is_empty() && text_lower.contains(name)
}

/// Estimate a 1-based position from the word offset of the first match.
fn position_from_text(text_lower: &str, domain: &str, words_per_unit: usize) -> Option<u32> {
    let domain_lower = domain.to_lowercase();
    let offset = text_lower
        .find(&domain_lower)
        .or_else(|| text_lower.find(name_segment(&domain_lower)))?;
    let words_before = text_lower[..offset].split_whitespace().count();
    Some((words_before / words_per_unit) as u32 + 1)
}

/// First `CONTEXT_EXCERPT_LEN` bytes of the answer, cut at a char boundary.
fn context_excerpt(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let mut end = CONTEXT_EXCERPT_LEN.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

fn mentioned_competitors(text_lower: &str, competitors: &[String]) -> Vec<String> {
    competitors
        .iter()
        .filter(|c| domain_mentioned(text_lower, c))
        .cloned()
        .collect()
}

/// Extract an observation from a plain chat answer (no source list).
pub fn extract_chat(
    content: &str,
    query: &str,
    brand_domain: &str,
    competitors: &[String],
) -> Observation {
    let content_lower = content.to_lowercase();

    let brand_mentioned = domain_mentioned(&content_lower, brand_domain);
    let position = if brand_mentioned {
        position_from_text(&content_lower, brand_domain, CHAT_WORDS_PER_UNIT)
    } else {
        None
    };

    Observation {
        query: query.to_string(),
        platform: Platform::Chatgpt,
        brand_mentioned,
        position,
        context: context_excerpt(content),
        competitors_mentioned: mentioned_competitors(&content_lower, competitors),
        raw_response: content.to_string(),
        citations: Vec::new(),
    }
}

/// Extract an observation from a search answer with a ranked source list.
///
/// Position prefers the 1-based index of the first citation naming the brand;
/// otherwise it is estimated from the answer text.
pub fn extract_search(
    response: &SearchResponse,
    query: &str,
    brand_domain: &str,
    competitors: &[String],
) -> Observation {
    let content_lower = response.content.to_lowercase();

    let brand_mentioned = domain_mentioned(&content_lower, brand_domain)
        || response
            .citations
            .iter()
            .any(|c| domain_mentioned(&c.to_lowercase(), brand_domain));

    let position = if brand_mentioned {
        response
            .citations
            .iter()
            .position(|c| domain_mentioned(&c.to_lowercase(), brand_domain))
            .map(|idx| idx as u32 + 1)
            .or_else(|| position_from_text(&content_lower, brand_domain, SEARCH_WORDS_PER_UNIT))
    } else {
        None
    };

    Observation {
        query: query.to_string(),
        platform: Platform::Perplexity,
        brand_mentioned,
        position,
        context: context_excerpt(&response.content),
        competitors_mentioned: mentioned_competitors(&content_lower, competitors),
        raw_response: response.content.clone(),
        citations: response.citations.clone(),
    }
}
