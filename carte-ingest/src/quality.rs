//! Quality gate classification
//!
//! The cheapest reliable signal that scraped text is a menu rather than
//! site furniture is price coverage, backed by a blacklist for the classic
//! failure mode: the menu lives in an image or PDF, so the scrape comes
//! back as the page's navigation and footer. Rules run in order, first
//! match wins, and classification is a pure function of the record's
//! fields so the same record always gates the same way.

use regex::RegexSet;

use carte_common::config::QualityConfig;
use carte_common::model::{GateReason, MenuRecord, QualityStatus};
use carte_common::{Error, Result};

use crate::normalizer::NormalizedMenu;

/// Names that mean the scrape walked the page chrome, not the menu.
/// Matched whole-name, case-insensitive, built-ins plus config extras.
const BUILTIN_BLACKLIST: &[&str] = &[
    "privacy policy",
    "terms(?: (?:of (?:use|service)|and conditions))?",
    "cookies? policy",
    "refund policy",
    "careers?",
    "contact(?: us)?",
    "about(?: us)?",
    "faqs?",
    "help",
    "support",
    "add to cart",
    "cart",
    "checkout",
    "sign ?(?:in|up)",
    "log ?(?:in|out)",
    "my account",
    "order (?:now|online)",
    "track (?:my )?order",
    "gift cards?",
    "locations?",
    "find (?:a|your) store",
    "store locator",
    "delivery",
    "reservations?",
    "book (?:a )?table",
    "download (?:our |the )?app",
    "follow us(?: on \\w+)?",
    "newsletter",
    "subscribe",
    "franchis(?:e|ing)",
    "promotions?",
    "deals",
    "news",
    "blog",
    "events",
    "catering",
    "home",
    // generic category-only labels that name no actual dish
    "menu",
    "our menu",
    "food",
    "drinks",
    "beverages",
    "sides",
    "mains",
    "desserts",
];

pub struct QualityGate {
    blacklist: RegexSet,
    min_price_coverage: f64,
    bulk_item_threshold: u32,
}

impl QualityGate {
    pub fn new(config: &QualityConfig) -> Result<Self> {
        let patterns: Vec<String> = BUILTIN_BLACKLIST
            .iter()
            .map(|p| (*p).to_string())
            .chain(config.extra_blacklist.iter().cloned())
            .map(|p| format!("^(?i:{})$", p))
            .collect();
        let blacklist = RegexSet::new(&patterns)
            .map_err(|e| Error::Config(format!("quality blacklist pattern: {}", e)))?;
        Ok(Self {
            blacklist,
            min_price_coverage: config.min_price_coverage,
            bulk_item_threshold: config.bulk_item_threshold,
        })
    }

    /// Classify a freshly normalized menu.
    pub fn classify(&self, menu: &NormalizedMenu) -> (QualityStatus, GateReason) {
        self.decide(
            menu.item_count,
            menu.price_coverage,
            menu.categories
                .iter()
                .flat_map(|c| c.items.iter().map(|i| i.name.as_str())),
        )
    }

    /// Re-classify a stored record, e.g. a donor copy before it is written.
    pub fn classify_record(&self, record: &MenuRecord) -> (QualityStatus, GateReason) {
        self.decide(
            record.item_count,
            record.price_coverage,
            record
                .categories
                .iter()
                .flat_map(|c| c.items.iter().map(|i| i.name.as_str())),
        )
    }

    fn decide<'a, I>(
        &self,
        item_count: u32,
        price_coverage: f64,
        names: I,
    ) -> (QualityStatus, GateReason)
    where
        I: IntoIterator<Item = &'a str>,
    {
        if item_count == 0 {
            return (QualityStatus::Rejected, GateReason::Empty);
        }
        if price_coverage == 0.0 && names.into_iter().all(|n| self.blacklist.is_match(n)) {
            return (QualityStatus::Rejected, GateReason::BoilerplateOnly);
        }
        if price_coverage < self.min_price_coverage && item_count > self.bulk_item_threshold {
            return (QualityStatus::Quarantined, GateReason::LowPriceCoverage);
        }
        (QualityStatus::Accepted, GateReason::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carte_common::model::{MenuCategory, MenuItem};

    fn gate() -> QualityGate {
        QualityGate::new(&QualityConfig::default()).unwrap()
    }

    fn menu_of(names_and_prices: &[(&str, Option<f64>)]) -> NormalizedMenu {
        let items: Vec<MenuItem> = names_and_prices
            .iter()
            .enumerate()
            .map(|(i, (name, price))| MenuItem {
                name: (*name).to_string(),
                price: *price,
                description: None,
                image_url: None,
                sort_order: i as u32,
            })
            .collect();
        let item_count = items.len() as u32;
        let with_price = items.iter().filter(|i| i.price.is_some()).count() as u32;
        let price_coverage = if item_count == 0 {
            0.0
        } else {
            f64::from(with_price) / f64::from(item_count)
        };
        NormalizedMenu {
            categories: vec![MenuCategory {
                name: "Menu".to_string(),
                items,
            }],
            item_count,
            price_coverage,
            image_coverage: 0.0,
            source_url: "https://example.com".to_string(),
            payload_hash: "test".to_string(),
        }
    }

    #[test]
    fn empty_record_is_rejected() {
        let menu = NormalizedMenu {
            categories: Vec::new(),
            item_count: 0,
            price_coverage: 0.0,
            image_coverage: 0.0,
            source_url: String::new(),
            payload_hash: String::new(),
        };
        assert_eq!(
            gate().classify(&menu),
            (QualityStatus::Rejected, GateReason::Empty)
        );
    }

    #[test]
    fn unpriced_boilerplate_is_rejected_as_navigation_scrape() {
        let menu = menu_of(&[
            ("Privacy Policy", None),
            ("Careers", None),
            ("Contact Us", None),
            ("About Us", None),
            ("FAQ", None),
            ("Sign In", None),
            ("Order Online", None),
            ("Track My Order", None),
            ("Gift Cards", None),
            ("Locations", None),
            ("Follow Us", None),
            ("Menu", None),
        ]);
        assert_eq!(menu.item_count, 12);
        assert_eq!(
            gate().classify(&menu),
            (QualityStatus::Rejected, GateReason::BoilerplateOnly)
        );
    }

    #[test]
    fn one_real_dish_name_defuses_the_blacklist_rule() {
        // small and unpriced, but the names are food: keep it
        let menu = menu_of(&[
            ("Kaya Toast", None),
            ("Careers", None),
            ("Kopi O", None),
        ]);
        assert_eq!(
            gate().classify(&menu),
            (QualityStatus::Accepted, GateReason::Passed)
        );
    }

    #[test]
    fn bulk_scrape_with_one_price_is_quarantined() {
        let mut rows: Vec<(String, Option<f64>)> = (0..290)
            .map(|i| (format!("Chateau Fragment {}", i), None))
            .collect();
        rows.push(("House Pour".to_string(), Some(12.0)));
        let borrowed: Vec<(&str, Option<f64>)> =
            rows.iter().map(|(n, p)| (n.as_str(), *p)).collect();
        let menu = menu_of(&borrowed);
        assert_eq!(menu.item_count, 291);
        assert!(menu.price_coverage > 0.0 && menu.price_coverage < 0.05);
        assert_eq!(
            gate().classify(&menu),
            (QualityStatus::Quarantined, GateReason::LowPriceCoverage)
        );
    }

    #[test]
    fn small_unpriced_menu_passes() {
        // twenty items or fewer is below the bulk threshold
        let rows: Vec<(String, Option<f64>)> =
            (0..20).map(|i| (format!("Dish {}", i), None)).collect();
        let borrowed: Vec<(&str, Option<f64>)> =
            rows.iter().map(|(n, p)| (n.as_str(), *p)).collect();
        assert_eq!(
            gate().classify(&menu_of(&borrowed)),
            (QualityStatus::Accepted, GateReason::Passed)
        );
    }

    #[test]
    fn classification_is_idempotent() {
        let menu = menu_of(&[("Laksa", Some(6.8)), ("Mee Goreng", None)]);
        let gate = gate();
        let first = gate.classify(&menu);
        for _ in 0..3 {
            assert_eq!(gate.classify(&menu), first);
        }
    }

    #[test]
    fn extra_blacklist_patterns_extend_the_builtins() {
        let config = QualityConfig {
            extra_blacklist: vec!["outlet timings?".to_string()],
            ..QualityConfig::default()
        };
        let gate = QualityGate::new(&config).unwrap();
        let menu = menu_of(&[("Outlet Timings", None), ("Privacy Policy", None)]);
        assert_eq!(
            gate.classify(&menu),
            (QualityStatus::Rejected, GateReason::BoilerplateOnly)
        );
    }

    #[test]
    fn invalid_extra_pattern_is_a_config_error() {
        let config = QualityConfig {
            extra_blacklist: vec!["([unclosed".to_string()],
            ..QualityConfig::default()
        };
        assert!(matches!(
            QualityGate::new(&config),
            Err(Error::Config(_))
        ));
    }
}
