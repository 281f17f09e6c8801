//! Raw payload to canonical menu normalization
//!
//! Two paths produce the same `MenuCategory` tree: structured payloads map
//! category-by-category, transcripts are segmented on price anchors. Both
//! paths dedupe on normalized name plus price and compute coverage ratios
//! before the record leaves this module, so the quality gate never has to
//! recount anything.
//!
//! Price parsing never fabricates: a token that does not read cleanly as a
//! currency amount leaves the item priceless.

use std::collections::HashSet;

use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use carte_common::model::{
    GateReason, MatchConfidence, MenuCategory, MenuItem, MenuRecord, Provenance, QualityStatus,
    SourceId,
};
use carte_common::{Error, Result};

use crate::sources::{RawCandidate, RawItem};

/// Prices outside this range are treated as parse noise, not menu prices.
const MAX_PRICE: f64 = 10_000.0;

/// Transcript headings longer than this are sentences, not section names.
const MAX_HEADING_LEN: usize = 48;

/// A normalized menu with its coverage ratios, ready for the quality gate.
#[derive(Debug, Clone)]
pub struct NormalizedMenu {
    pub categories: Vec<MenuCategory>,
    pub item_count: u32,
    pub price_coverage: f64,
    pub image_coverage: f64,
    pub source_url: String,
    pub payload_hash: String,
}

impl NormalizedMenu {
    /// Attach classification and identity to produce the persistable record.
    pub fn into_record(
        self,
        brand_id: Uuid,
        source: SourceId,
        match_confidence: MatchConfidence,
        quality: QualityStatus,
        gate_reason: GateReason,
    ) -> MenuRecord {
        MenuRecord {
            brand_id,
            source,
            categories: self.categories,
            item_count: self.item_count,
            price_coverage: self.price_coverage,
            image_coverage: self.image_coverage,
            quality,
            gate_reason,
            match_confidence,
            provenance: Provenance::Scraped,
            donor_brand_id: None,
            source_url: self.source_url,
            payload_hash: self.payload_hash,
            updated_at: chrono::Utc::now(),
        }
    }
}

pub struct Normalizer {
    /// "Kaya Toast Set S$5.60": currency-marked price closing a line
    currency_tail: Regex,
    /// "Kopi O 1.80": bare two-decimal amount closing a line
    decimal_tail: Regex,
    /// Whole-token price for structured payloads, currency marker optional
    price_value: Regex,
}

impl Normalizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Internal(format!("price pattern: {}", e)))
        };
        Ok(Self {
            currency_tail: compile(
                r"(?i)(?:s\$|sgd|rm|myr|\$)\s*((?:\d{1,3}(?:,\d{3})+|\d{1,4})(?:[.,]\d{1,2})?)\s*$",
            )?,
            decimal_tail: compile(r"((?:\d{1,3}(?:,\d{3})+|\d{1,4})[.,]\d{2})\s*$")?,
            price_value: compile(
                r"^(?i)(?:s\$|sgd|rm|myr|\$)?\s*((?:\d{1,3}(?:,\d{3})+|\d{1,4})(?:[.,]\d{1,2})?)$",
            )?,
        })
    }

    /// Normalize one matched candidate into canonical shape.
    pub fn normalize(&self, candidate: &RawCandidate) -> Result<NormalizedMenu> {
        let categories = if candidate.payload.has_structure() {
            self.map_structured(candidate)
        } else {
            self.segment_transcript(candidate.payload.transcript.as_deref().unwrap_or(""))
        };

        let item_count: u32 = categories.iter().map(|c| c.items.len() as u32).sum();
        let with_price = categories
            .iter()
            .flat_map(|c| &c.items)
            .filter(|i| i.price.is_some())
            .count() as u32;
        let with_image = categories
            .iter()
            .flat_map(|c| &c.items)
            .filter(|i| i.image_url.is_some())
            .count() as u32;
        let ratio = |n: u32| {
            if item_count == 0 {
                0.0
            } else {
                f64::from(n) / f64::from(item_count)
            }
        };

        let payload_hash = hash_categories(&categories)?;
        Ok(NormalizedMenu {
            price_coverage: ratio(with_price),
            image_coverage: ratio(with_image),
            categories,
            item_count,
            source_url: candidate.source_url.clone(),
            payload_hash,
        })
    }

    /// Structured path: clean names, resolve prices, drop empties, dedupe.
    fn map_structured(&self, candidate: &RawCandidate) -> Vec<MenuCategory> {
        let mut seen = HashSet::new();
        let mut categories = Vec::new();
        for raw_category in &candidate.payload.categories {
            let name = {
                let cleaned = clean_text(&raw_category.name);
                if cleaned.is_empty() {
                    "Menu".to_string()
                } else {
                    cleaned
                }
            };
            let mut items: Vec<MenuItem> = Vec::new();
            for raw_item in &raw_category.items {
                let item_name = clean_text(&raw_item.name);
                if item_name.is_empty() {
                    continue;
                }
                let price = self.resolve_price(raw_item);
                if !seen.insert(dedupe_key(&item_name, price)) {
                    continue;
                }
                items.push(MenuItem {
                    name: item_name,
                    price,
                    description: raw_item
                        .description
                        .as_deref()
                        .map(clean_text)
                        .filter(|d| !d.is_empty()),
                    image_url: raw_item.image_url.clone().filter(|u| !u.is_empty()),
                    sort_order: items.len() as u32,
                });
            }
            if !items.is_empty() {
                categories.push(MenuCategory { name, items });
            }
        }
        categories
    }

    fn resolve_price(&self, item: &RawItem) -> Option<f64> {
        if let Some(minor) = item.price_minor {
            if minor > 0 {
                return Some(minor as f64 / 100.0);
            }
            return None;
        }
        item.price_text.as_deref().and_then(|t| self.parse_price(t))
    }

    /// Parse a printed price token. Rejects anything that is not a clean
    /// currency amount; the caller stores the item without a price instead.
    pub fn parse_price(&self, text: &str) -> Option<f64> {
        let caps = self.price_value.captures(text.trim())?;
        parse_amount(caps.get(1)?.as_str())
    }

    /// Transcript path: segment page text on price anchors.
    ///
    /// A line ending in a price becomes an item; a bare price line prices
    /// the line above it; an all-caps line opens a new category. Everything
    /// else is held as a prospective item name for one line and then
    /// dropped, so navigation text never becomes an item.
    fn segment_transcript(&self, transcript: &str) -> Vec<MenuCategory> {
        let mut seen = HashSet::new();
        let mut categories: Vec<MenuCategory> = Vec::new();
        let mut current_name = "Menu".to_string();
        let mut current_items: Vec<MenuItem> = Vec::new();
        let mut pending_name: Option<String> = None;

        let flush = |name: &str, items: &mut Vec<MenuItem>, categories: &mut Vec<MenuCategory>| {
            if !items.is_empty() {
                categories.push(MenuCategory {
                    name: name.to_string(),
                    items: std::mem::take(items),
                });
            }
        };

        for raw_line in transcript.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if is_heading(line) {
                flush(&current_name, &mut current_items, &mut categories);
                current_name = clean_text(line);
                pending_name = None;
                continue;
            }

            if let Some((name_part, price)) = self.split_price_tail(line) {
                let name = if name_part.is_empty() {
                    match pending_name.take() {
                        Some(prev) => prev,
                        // an orphan price with nothing to attach to
                        None => continue,
                    }
                } else {
                    pending_name = None;
                    name_part
                };
                if seen.insert(dedupe_key(&name, Some(price))) {
                    current_items.push(MenuItem {
                        name,
                        price: Some(price),
                        description: None,
                        image_url: None,
                        sort_order: current_items.len() as u32,
                    });
                }
                continue;
            }

            pending_name = Some(clean_text(line)).filter(|n| !n.is_empty());
        }
        flush(&current_name, &mut current_items, &mut categories);
        categories
    }

    /// Split "Name ... S$12.90" into the name prefix and the price. An
    /// empty name means the whole line was the price.
    fn split_price_tail(&self, line: &str) -> Option<(String, f64)> {
        let caps = self
            .currency_tail
            .captures(line)
            .or_else(|| self.decimal_tail.captures(line))?;
        let span = caps.get(0)?;
        let value = parse_amount(caps.get(1)?.as_str())?;
        Some((clean_text(&line[..span.start()]), value))
    }
}

/// A comma followed by a final three-digit group is a thousands separator;
/// any shorter trailing group is a decimal mark ("1,290" vs "12,90").
fn parse_amount(digits: &str) -> Option<f64> {
    let normalized = match digits.rfind(',') {
        None => digits.to_string(),
        Some(at) if digits.contains('.') || digits.len() - at == 4 => digits.replace(',', ""),
        Some(at) => {
            let (head, tail) = digits.split_at(at);
            format!("{}.{}", head.replace(',', ""), &tail[1..])
        }
    };
    let value: f64 = normalized.parse().ok()?;
    if value > 0.0 && value < MAX_PRICE {
        Some(value)
    } else {
        None
    }
}

fn dedupe_key(name: &str, price: Option<f64>) -> (String, i64) {
    let cents = price.map(|p| (p * 100.0).round() as i64).unwrap_or(-1);
    (name.to_lowercase(), cents)
}

/// Collapse whitespace and shave decorative punctuation off the edges.
fn clean_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| matches!(c, '.' | '·' | '…' | ':' | '|' | '•' | '*' | '-' | ' '))
        .to_string()
}

/// Section headings in page text read as short all-caps lines without digits.
fn is_heading(line: &str) -> bool {
    if line.len() > MAX_HEADING_LEN || line.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 3 && line == line.to_uppercase()
}

/// SHA-256 over the canonical category JSON. Re-scrapes that hash the same
/// are skipped by the store instead of rewritten.
fn hash_categories(categories: &[MenuCategory]) -> Result<String> {
    let canonical = serde_json::to_string(categories)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{:x}", digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{RawCategory, RawPayload};

    fn normalizer() -> Normalizer {
        Normalizer::new().unwrap()
    }

    fn structured_candidate(categories: Vec<RawCategory>) -> RawCandidate {
        RawCandidate {
            source: SourceId::Grabfood,
            display_name: "Test".to_string(),
            source_url: "https://example.com/menu".to_string(),
            payload: RawPayload {
                categories,
                transcript: None,
            },
        }
    }

    fn transcript_candidate(text: &str) -> RawCandidate {
        RawCandidate {
            source: SourceId::BrandSite,
            display_name: "Test".to_string(),
            source_url: "https://example.com".to_string(),
            payload: RawPayload::from_transcript(text.to_string()),
        }
    }

    #[test]
    fn structured_payload_maps_prices_and_dedupes() {
        let candidate = structured_candidate(vec![RawCategory {
            name: " Ramen ".to_string(),
            items: vec![
                RawItem {
                    name: "Shoyu Ramen".to_string(),
                    price_minor: Some(1290),
                    image_url: Some("https://img/1.jpg".to_string()),
                    ..Default::default()
                },
                RawItem {
                    name: "shoyu ramen".to_string(),
                    price_minor: Some(1290),
                    ..Default::default()
                },
                RawItem {
                    name: "Gyoza".to_string(),
                    price_text: Some("S$6.50".to_string()),
                    ..Default::default()
                },
                RawItem {
                    name: "Seasonal Special".to_string(),
                    price_text: Some("market price".to_string()),
                    ..Default::default()
                },
                RawItem {
                    name: "".to_string(),
                    price_minor: Some(100),
                    ..Default::default()
                },
            ],
        }]);
        let menu = normalizer().normalize(&candidate).unwrap();
        assert_eq!(menu.item_count, 3);
        assert_eq!(menu.categories[0].name, "Ramen");
        let items = &menu.categories[0].items;
        assert_eq!(items[0].price, Some(12.9));
        assert_eq!(items[1].price, Some(6.5));
        // non-numeric price token stays unpriced instead of being invented
        assert_eq!(items[2].price, None);
        assert!((menu.price_coverage - 2.0 / 3.0).abs() < 1e-9);
        assert!((menu.image_coverage - 1.0 / 3.0).abs() < 1e-9);
        // sort order stays dense after the duplicate was dropped
        assert_eq!(
            items.iter().map(|i| i.sort_order).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn price_parsing_accepts_currency_amounts_only() {
        let n = normalizer();
        assert_eq!(n.parse_price("S$12.90"), Some(12.9));
        assert_eq!(n.parse_price("sgd 4"), Some(4.0));
        assert_eq!(n.parse_price("RM8.50"), Some(8.5));
        assert_eq!(n.parse_price(" $3.20 "), Some(3.2));
        assert_eq!(n.parse_price("12,90"), Some(12.9));

        assert_eq!(n.parse_price("free"), None);
        assert_eq!(n.parse_price("$0"), None);
        assert_eq!(n.parse_price("from $5"), None);
        assert_eq!(n.parse_price("12.999"), None);
        assert_eq!(n.parse_price("99999"), None);
        assert_eq!(n.parse_price(""), None);
    }

    #[test]
    fn price_parsing_strips_thousands_separators() {
        let n = normalizer();
        assert_eq!(n.parse_price("S$1,290.50"), Some(1290.5));
        assert_eq!(n.parse_price("$1,290"), Some(1290.0));
        assert_eq!(n.parse_price("rm 2,000"), Some(2000.0));

        // a short trailing group is still a decimal comma
        assert_eq!(n.parse_price("12,90"), Some(12.9));
        // the sanity cap applies to the stripped value
        assert_eq!(n.parse_price("$12,000"), None);
    }

    #[test]
    fn transcript_prices_with_separators_still_anchor_items() {
        let text = "PREMIUM SETS\n\
                    Wagyu Omakase S$1,280.00\n\
                    Celebration Platter 1,088.00\n";
        let menu = normalizer().normalize(&transcript_candidate(text)).unwrap();
        assert_eq!(menu.item_count, 2);
        assert_eq!(menu.categories[0].name, "PREMIUM SETS");
        assert_eq!(menu.categories[0].items[0].name, "Wagyu Omakase");
        assert_eq!(menu.categories[0].items[0].price, Some(1280.0));
        assert_eq!(menu.categories[0].items[1].name, "Celebration Platter");
        assert_eq!(menu.categories[0].items[1].price, Some(1088.0));
    }

    #[test]
    fn transcript_segments_on_price_anchors() {
        let text = "OUR MENU\n\
                    Kaya Toast Set S$5.60\n\
                    Kopi O\n\
                    S$1.80\n\
                    Follow us on Instagram\n\
                    SIDES\n\
                    Soft Boiled Eggs 2.20\n";
        let menu = normalizer().normalize(&transcript_candidate(text)).unwrap();
        assert_eq!(menu.item_count, 3);
        assert_eq!(menu.categories.len(), 2);
        assert_eq!(menu.categories[0].name, "OUR MENU");
        assert_eq!(menu.categories[0].items[0].name, "Kaya Toast Set");
        assert_eq!(menu.categories[0].items[0].price, Some(5.6));
        // bare price line attaches to the line above
        assert_eq!(menu.categories[0].items[1].name, "Kopi O");
        assert_eq!(menu.categories[0].items[1].price, Some(1.8));
        assert_eq!(menu.categories[1].name, "SIDES");
        assert_eq!(menu.categories[1].items[0].price, Some(2.2));
        // unpriced social-link line never became an item
        assert!((menu.price_coverage - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn transcript_drops_orphan_prices_and_repeated_lines() {
        let text = "$4.50\n\
                    Laksa S$6.80\n\
                    Laksa S$6.80\n";
        let menu = normalizer().normalize(&transcript_candidate(text)).unwrap();
        assert_eq!(menu.item_count, 1);
        assert_eq!(menu.categories[0].items[0].name, "Laksa");
    }

    #[test]
    fn empty_payload_normalizes_to_zero_items() {
        let menu = normalizer()
            .normalize(&structured_candidate(Vec::new()))
            .unwrap();
        assert_eq!(menu.item_count, 0);
        assert_eq!(menu.price_coverage, 0.0);
        assert_eq!(menu.image_coverage, 0.0);
        assert!(menu.categories.is_empty());
    }

    #[test]
    fn payload_hash_tracks_content() {
        let n = normalizer();
        let a = n
            .normalize(&transcript_candidate("Laksa S$6.80"))
            .unwrap();
        let b = n
            .normalize(&transcript_candidate("Laksa S$6.80"))
            .unwrap();
        let c = n
            .normalize(&transcript_candidate("Laksa S$7.80"))
            .unwrap();
        assert_eq!(a.payload_hash, b.payload_hash);
        assert_ne!(a.payload_hash, c.payload_hash);
    }

    #[test]
    fn record_carries_classification_and_scraped_provenance() {
        let menu = normalizer()
            .normalize(&transcript_candidate("Laksa S$6.80"))
            .unwrap();
        let brand_id = Uuid::new_v4();
        let record = menu.into_record(
            brand_id,
            SourceId::BrandSite,
            MatchConfidence::Exact,
            QualityStatus::Accepted,
            GateReason::Passed,
        );
        assert_eq!(record.brand_id, brand_id);
        assert_eq!(record.item_count, 1);
        assert_eq!(record.provenance, Provenance::Scraped);
        assert_eq!(record.match_confidence, MatchConfidence::Exact);
        assert_eq!(record.donor_brand_id, None);
        assert_eq!(MenuRecord::count_items(&record.categories), record.item_count);
    }
}
