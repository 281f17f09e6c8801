//! Candidate-to-brand entity matching
//!
//! Source listings rarely carry the registry's exact name: marketplaces
//! append outlet qualifiers ("Ajisen Ramen (Jem)"), drop diacritics, or
//! reorder words. Matching happens on normalized slugs in descending
//! confidence tiers, and the tier is kept on the stored record.
//!
//! The heuristic is deliberately conservative. A missed match costs one
//! empty source slot that donor propagation or a later run can fill; a
//! wrong match publishes another restaurant's menu under the brand's name.
//! When in doubt, return `None`.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use carte_common::model::{BrandTarget, MatchConfidence};

use crate::sources::RawCandidate;

/// Fuzzy token equality is a typo net, not a similarity search: it only
/// applies to tokens this long and near-identical strings.
const FUZZY_MIN_TOKEN_LEN: usize = 5;
const FUZZY_THRESHOLD: f64 = 0.92;

/// Share of the brand's significant tokens that must land in the candidate
/// slug for a `Partial` match.
const PARTIAL_TOKEN_SHARE: f64 = 0.6;

/// The winning candidate for one (brand, source) call.
#[derive(Debug)]
pub struct Match {
    pub candidate: RawCandidate,
    pub confidence: MatchConfidence,
}

/// Normalize a display name to a dash-joined token slug: bracketed
/// qualifiers dropped, diacritics folded, lowercased, punctuation collapsed
/// to single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut bracket_depth = 0usize;
    for c in name.nfd() {
        match c {
            '(' | '[' => bracket_depth += 1,
            ')' | ']' => bracket_depth = bracket_depth.saturating_sub(1),
            _ if bracket_depth > 0 => {}
            _ if is_combining_mark(c) => {}
            // Letters NFD cannot decompose
            'ß' | 'ẞ' => slug.push_str("ss"),
            'æ' | 'Æ' => slug.push_str("ae"),
            'œ' | 'Œ' => slug.push_str("oe"),
            'ø' | 'Ø' => slug.push('o'),
            'đ' | 'Đ' | 'ð' | 'Ð' => slug.push('d'),
            'ł' | 'Ł' => slug.push('l'),
            'þ' | 'Þ' => slug.push_str("th"),
            _ if c.is_alphanumeric() => slug.extend(c.to_lowercase()),
            _ => {
                if !slug.is_empty() && !slug.ends_with('-') {
                    slug.push('-');
                }
            }
        }
    }
    let trimmed = slug.trim_end_matches('-').len();
    slug.truncate(trimmed);
    slug
}

/// Classify one candidate slug against the brand slug.
pub fn classify(brand_slug: &str, candidate_slug: &str) -> MatchConfidence {
    if brand_slug.is_empty() || candidate_slug.is_empty() {
        return MatchConfidence::None;
    }
    if brand_slug == candidate_slug {
        return MatchConfidence::Exact;
    }
    if candidate_slug.starts_with(brand_slug) || brand_slug.starts_with(candidate_slug) {
        return MatchConfidence::Prefix;
    }

    // Significant tokens only: short particles ("ya", "de") and digit runs
    // say nothing about identity.
    let brand_tokens: Vec<&str> = brand_slug
        .split('-')
        .filter(|t| t.len() >= 3 && t.chars().all(char::is_alphabetic))
        .collect();
    if brand_tokens.is_empty() {
        return MatchConfidence::None;
    }
    let candidate_tokens: Vec<&str> = candidate_slug.split('-').collect();
    let hits = brand_tokens
        .iter()
        .filter(|brand_token| {
            candidate_tokens
                .iter()
                .any(|candidate_token| token_matches(brand_token, candidate_token))
        })
        .count();
    if hits as f64 / brand_tokens.len() as f64 >= PARTIAL_TOKEN_SHARE {
        MatchConfidence::Partial
    } else {
        MatchConfidence::None
    }
}

fn token_matches(brand_token: &str, candidate_token: &str) -> bool {
    if candidate_token.starts_with(brand_token) {
        return true;
    }
    brand_token.len() >= FUZZY_MIN_TOKEN_LEN
        && strsim::jaro_winkler(brand_token, candidate_token) >= FUZZY_THRESHOLD
}

/// Pick the best candidate for the brand, or nothing.
///
/// `None`-confidence candidates are discarded outright. Among survivors a
/// stronger tier always wins; within a tier the candidate with the most
/// menu items wins, which weeds out empty ghost listings that share the
/// brand's name.
pub fn select_best(brand: &BrandTarget, candidates: Vec<RawCandidate>) -> Option<Match> {
    let brand_slug = if brand.slug.is_empty() {
        slugify(&brand.canonical_name)
    } else {
        brand.slug.clone()
    };

    let mut best: Option<Match> = None;
    for candidate in candidates {
        let candidate_slug = slugify(&candidate.display_name);
        let confidence = classify(&brand_slug, &candidate_slug);
        if confidence == MatchConfidence::None {
            tracing::debug!(
                brand = %brand_slug,
                candidate = %candidate.display_name,
                "discarding candidate with no plausible name match"
            );
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                confidence > current.confidence
                    || (confidence == current.confidence
                        && candidate.payload.item_count() > current.candidate.payload.item_count())
            }
        };
        if better {
            best = Some(Match {
                candidate,
                confidence,
            });
        }
    }
    best
}
