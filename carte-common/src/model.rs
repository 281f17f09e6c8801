//! Canonical data model shared by the ingest pipeline and review service
//!
//! `MenuRecord` is the output unit of the whole pipeline; everything else
//! here exists to produce, classify, or track one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Identifies one upstream menu source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// GrabFood marketplace listings
    Grabfood,
    /// foodpanda marketplace listings
    Foodpanda,
    /// The brand's own website
    BrandSite,
    /// Screenshot-and-transcribe fallback for otherwise unscrapable sites
    Vision,
}

impl SourceId {
    /// All sources in dispatch order.
    pub const ALL: [SourceId; 4] = [
        SourceId::Grabfood,
        SourceId::Foodpanda,
        SourceId::BrandSite,
        SourceId::Vision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Grabfood => "grabfood",
            SourceId::Foodpanda => "foodpanda",
            SourceId::BrandSite => "brand_site",
            SourceId::Vision => "vision",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grabfood" => Ok(SourceId::Grabfood),
            "foodpanda" => Ok(SourceId::Foodpanda),
            "brand_site" => Ok(SourceId::BrandSite),
            "vision" => Ok(SourceId::Vision),
            other => Err(Error::InvalidInput(format!("unknown source: {}", other))),
        }
    }
}

/// One brand/location entity from the canonical registry.
///
/// Created by `import-brands` or an upstream sync; the pipeline reads these
/// as units of work and writes back `accepted` / `accepted_item_count` after
/// each pass. Never deleted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandTarget {
    pub brand_id: Uuid,
    /// Display name as registered, e.g. "Ajisen Ramen (Jem)"
    pub canonical_name: String,
    /// Stable registry slug, e.g. "ajisen-ramen-jem"
    pub slug: String,
    /// Known URLs for the brand's own site, best first
    pub known_urls: Vec<String>,
    /// BCP 47-ish locale tag, e.g. "en-SG"; steers source search paths
    pub locale_hint: String,
    /// True once at least one accepted MenuRecord exists for the brand
    pub accepted: bool,
    /// Item count of the best accepted record, denormalized for the registry
    pub accepted_item_count: i64,
}

/// Quality gate verdict for a normalized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    /// Publishable as-is
    Accepted,
    /// Retained but held back from publish and propagation pending review
    Quarantined,
    /// Not a menu; nothing worth keeping
    Rejected,
}

impl QualityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStatus::Accepted => "accepted",
            QualityStatus::Quarantined => "quarantined",
            QualityStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for QualityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accepted" => Ok(QualityStatus::Accepted),
            "quarantined" => Ok(QualityStatus::Quarantined),
            "rejected" => Ok(QualityStatus::Rejected),
            other => Err(Error::InvalidInput(format!("unknown quality status: {}", other))),
        }
    }
}

/// Why the quality gate classified a record the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    /// Zero items after normalization
    Empty,
    /// Every item name matched the boilerplate blacklist and nothing had a price
    BoilerplateOnly,
    /// Large item count with near-zero price coverage
    LowPriceCoverage,
    /// Passed all rejection rules
    Passed,
    /// Operator promoted the record out of quarantine by hand
    OperatorPromoted,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::Empty => "empty",
            GateReason::BoilerplateOnly => "boilerplate_only",
            GateReason::LowPriceCoverage => "low_price_coverage",
            GateReason::Passed => "passed",
            GateReason::OperatorPromoted => "operator_promoted",
        }
    }
}

impl FromStr for GateReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "empty" => Ok(GateReason::Empty),
            "boilerplate_only" => Ok(GateReason::BoilerplateOnly),
            "low_price_coverage" => Ok(GateReason::LowPriceCoverage),
            "passed" => Ok(GateReason::Passed),
            "operator_promoted" => Ok(GateReason::OperatorPromoted),
            other => Err(Error::InvalidInput(format!("unknown gate reason: {}", other))),
        }
    }
}

/// How confidently the matcher tied a source listing to the brand.
///
/// Declared weakest to strongest so `Ord` ranks stronger tiers higher.
/// `None` means no match and yields no downstream work; the other tiers
/// ride along on the stored record so reviewers can weigh false-positive
/// risk when a menu looks off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    None,
    Partial,
    Prefix,
    Exact,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchConfidence::None => "none",
            MatchConfidence::Partial => "partial",
            MatchConfidence::Prefix => "prefix",
            MatchConfidence::Exact => "exact",
        }
    }
}

impl FromStr for MatchConfidence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(MatchConfidence::None),
            "partial" => Ok(MatchConfidence::Partial),
            "prefix" => Ok(MatchConfidence::Prefix),
            "exact" => Ok(MatchConfidence::Exact),
            other => Err(Error::InvalidInput(format!("unknown match confidence: {}", other))),
        }
    }
}

/// Whether a record came from live scraping or was copied from a donor sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Scraped,
    DonorCopied,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Scraped => "scraped",
            Provenance::DonorCopied => "donor_copied",
        }
    }
}

impl FromStr for Provenance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scraped" => Ok(Provenance::Scraped),
            "donor_copied" => Ok(Provenance::DonorCopied),
            other => Err(Error::InvalidInput(format!("unknown provenance: {}", other))),
        }
    }
}

/// One menu item in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    /// Major currency units; absent when the source gave no parseable price
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Position within the category as listed on the source
    pub sort_order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuCategory {
    pub name: String,
    pub items: Vec<MenuItem>,
}

/// Canonical output unit of the pipeline: one brand's menu as seen by one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuRecord {
    pub brand_id: Uuid,
    pub source: SourceId,
    pub categories: Vec<MenuCategory>,
    /// Sum of items across categories; always recomputed, never trusted
    pub item_count: u32,
    /// items_with_price / item_count, 0.0 when item_count is 0
    pub price_coverage: f64,
    /// items_with_image / item_count, 0.0 when item_count is 0
    pub image_coverage: f64,
    pub quality: QualityStatus,
    pub gate_reason: GateReason,
    /// Matcher tier behind this record; inherited from the donor on copies
    pub match_confidence: MatchConfidence,
    pub provenance: Provenance,
    /// Donor brand when `provenance == DonorCopied`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_brand_id: Option<Uuid>,
    /// Page the payload was extracted from
    pub source_url: String,
    /// SHA-256 over the canonical category JSON; detects unchanged re-scrapes
    pub payload_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl MenuRecord {
    /// Flattened item count across all categories.
    pub fn count_items(categories: &[MenuCategory]) -> u32 {
        categories.iter().map(|c| c.items.len() as u32).sum()
    }
}

/// Per (brand, source) crawl state, persisted in the progress ledger.
///
/// `Pending → InFlight → {Accepted, Quarantined, Rejected, Failed}`.
/// `Failed` is retryable on a later run up to the attempt bound; the other
/// three outcomes are terminal for the pair unless a re-scrape is forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Pending,
    InFlight,
    Accepted,
    Quarantined,
    Rejected,
    Failed,
}

impl PairState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairState::Pending => "pending",
            PairState::InFlight => "in_flight",
            PairState::Accepted => "accepted",
            PairState::Quarantined => "quarantined",
            PairState::Rejected => "rejected",
            PairState::Failed => "failed",
        }
    }

    /// Terminal states stay put across runs unless the operator forces a re-scrape.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PairState::Accepted | PairState::Quarantined | PairState::Rejected
        )
    }
}

impl FromStr for PairState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PairState::Pending),
            "in_flight" => Ok(PairState::InFlight),
            "accepted" => Ok(PairState::Accepted),
            "quarantined" => Ok(PairState::Quarantined),
            "rejected" => Ok(PairState::Rejected),
            "failed" => Ok(PairState::Failed),
            other => Err(Error::InvalidInput(format!("unknown pair state: {}", other))),
        }
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters for one pipeline pass, persisted with the run row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Pairs dispatched this run (terminal skips excluded)
    pub scheduled: u32,
    pub accepted: u32,
    pub quarantined: u32,
    pub rejected: u32,
    pub failed: u32,
    /// Pairs where the matcher found no plausible candidate
    pub no_match: u32,
    /// Terminal pairs skipped without a new adapter call
    pub skipped_terminal: u32,
    /// Re-scrapes whose payload hash matched the stored record
    pub skipped_unchanged: u32,
    /// Records written by donor propagation
    pub donor_copies: u32,
    /// Core-name groups skipped for exceeding the size cap
    pub oversized_groups: u32,
    /// Structural parse failures per source; a hot counter here means the
    /// source changed its page shape and the adapter needs updating
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parse_failures: BTreeMap<String, u32>,
}

impl RunSummary {
    pub fn note_parse_failure(&mut self, source: SourceId) {
        *self.parse_failures.entry(source.as_str().to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_round_trips_through_str() {
        for source in SourceId::ALL {
            assert_eq!(SourceId::from_str(source.as_str()).unwrap(), source);
        }
        assert!(SourceId::from_str("deliveroo").is_err());
    }

    #[test]
    fn terminal_states_exclude_failed_and_pending() {
        assert!(PairState::Accepted.is_terminal());
        assert!(PairState::Quarantined.is_terminal());
        assert!(PairState::Rejected.is_terminal());
        assert!(!PairState::Failed.is_terminal());
        assert!(!PairState::Pending.is_terminal());
        assert!(!PairState::InFlight.is_terminal());
    }

    #[test]
    fn count_items_sums_across_categories() {
        let categories = vec![
            MenuCategory {
                name: "Ramen".to_string(),
                items: vec![
                    MenuItem {
                        name: "Shoyu Ramen".to_string(),
                        price: Some(12.9),
                        description: None,
                        image_url: None,
                        sort_order: 0,
                    },
                    MenuItem {
                        name: "Miso Ramen".to_string(),
                        price: Some(13.9),
                        description: None,
                        image_url: None,
                        sort_order: 1,
                    },
                ],
            },
            MenuCategory {
                name: "Sides".to_string(),
                items: vec![MenuItem {
                    name: "Gyoza".to_string(),
                    price: Some(6.5),
                    description: None,
                    image_url: None,
                    sort_order: 0,
                }],
            },
        ];
        assert_eq!(MenuRecord::count_items(&categories), 3);
    }

    #[test]
    fn match_confidence_ranks_stronger_tiers_higher() {
        assert!(MatchConfidence::Exact > MatchConfidence::Prefix);
        assert!(MatchConfidence::Prefix > MatchConfidence::Partial);
        assert!(MatchConfidence::Partial > MatchConfidence::None);
        assert_eq!(
            MatchConfidence::from_str("prefix").unwrap(),
            MatchConfidence::Prefix
        );
    }

    #[test]
    fn parse_failure_counter_accumulates_per_source() {
        let mut summary = RunSummary::default();
        summary.note_parse_failure(SourceId::Grabfood);
        summary.note_parse_failure(SourceId::Grabfood);
        summary.note_parse_failure(SourceId::Foodpanda);
        assert_eq!(summary.parse_failures.get("grabfood"), Some(&2));
        assert_eq!(summary.parse_failures.get("foodpanda"), Some(&1));
    }
}
