//! Source adapters: one per upstream menu source
//!
//! Every adapter answers one question: what does this source say this
//! brand's menu is? Network I/O only, no persistence.
//! Failures come back as `FetchError` values so the scheduler can classify
//! them per pair without one source sinking its siblings.

pub mod brand_site;
pub mod foodpanda;
pub mod grabfood;
pub mod render;
pub mod vision;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use carte_common::model::{BrandTarget, SourceId};

/// Failure modes of one adapter call.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection-level failure; worth another attempt on a later run
    #[error("network error: {0}")]
    Network(String),

    /// The source or a backing service sat on the request too long
    #[error("request timed out")]
    Timeout,

    /// Anti-bot challenge or explicit throttle response
    #[error("rate limited or blocked by source")]
    RateLimited,

    /// The page no longer carries the structure the adapter expects
    #[error("payload parse failure: {0}")]
    Parse(String),

    /// Render or transcription backend is down
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl FetchError {
    /// Transient failures deserve a retry on a later run. A parse failure
    /// means the source changed shape and the adapter itself needs updating,
    /// so it is counted separately in the run summary.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::Parse(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Raw menu payload as one source shaped it, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawPayload {
    /// Structured category tree when the source exposed one
    pub categories: Vec<RawCategory>,
    /// Rendered-page text when only a transcript could be extracted
    pub transcript: Option<String>,
}

impl RawPayload {
    /// True when the payload carries a machine-shaped category tree rather
    /// than page text. Decides which normalizer path runs.
    pub fn has_structure(&self) -> bool {
        !self.categories.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }

    pub fn from_transcript(text: String) -> Self {
        Self {
            categories: Vec::new(),
            transcript: Some(text),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawCategory {
    pub name: String,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Default)]
pub struct RawItem {
    pub name: String,
    /// Price as printed, e.g. "S$12.90"; parsed during normalization
    pub price_text: Option<String>,
    /// Price in minor units when the source hands out integers, e.g. 1290
    pub price_minor: Option<i64>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// One listing a source returned for a brand search, with its menu payload
/// attached. Ephemeral: produced per adapter call, consumed by the matcher,
/// never persisted.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub source: SourceId,
    /// Listing title as the source displays it
    pub display_name: String,
    pub source_url: String,
    pub payload: RawPayload,
}

/// One upstream menu source.
///
/// `Ok(vec![])` means the source genuinely lists nothing for the brand;
/// errors carry the failure kind for ledger classification. Implementations
/// must not panic on adversarial input.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// Search the source for the brand and return candidate listings with
    /// their menu payloads attached.
    async fn fetch_candidates(
        &self,
        brand: &BrandTarget,
    ) -> Result<Vec<RawCandidate>, FetchError>;
}

/// First element matching a CSS selector, or None when the selector is
/// invalid or nothing matches.
pub(crate) fn select_one<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next()
}

/// Split a locale hint like "en-SG" into site path components ("sg", "en").
pub(crate) fn locale_path(locale_hint: &str) -> (String, String) {
    let mut parts = locale_hint.splitn(2, '-');
    let lang = parts.next().unwrap_or("en").to_lowercase();
    let country = parts.next().unwrap_or("sg").to_lowercase();
    (country, lang)
}

/// Transcript extraction stops after this many lines; anything longer is
/// navigation chrome repeating itself, not menu content.
const MAX_TRANSCRIPT_LINES: usize = 800;

/// Visible text of the content-bearing elements, one line per element, in
/// document order. Nested matches repeat their text; downstream dedup by
/// name and price makes that harmless.
pub(crate) fn extract_transcript(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("h1, h2, h3, h4, li, td, p").ok()?;
    let mut lines = Vec::new();
    for element in doc.select(&selector) {
        let line = element
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if line.is_empty() || line.len() > 200 {
            continue;
        }
        lines.push(line);
        if lines.len() >= MAX_TRANSCRIPT_LINES {
            break;
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
