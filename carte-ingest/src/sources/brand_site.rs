//! Brand-site adapter
//!
//! Works off the registry's `known_urls` for the brand; there is no search
//! step. Each page is tried for schema.org JSON-LD first (Restaurant or Menu
//! nodes with `hasMenu`/`hasMenuSection`/`hasMenuItem`), and when no usable
//! node exists the visible text is collected as a transcript for the
//! segmentation path of the normalizer. Brand sites are too heterogeneous
//! for a structural miss to mean anything, so a page that renders but yields
//! neither shape is simply unproductive, not an error.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;

use carte_common::config::SourceConfig;
use carte_common::model::{BrandTarget, SourceId};
use carte_common::Result;

use super::render::Renderer;
use super::{
    extract_transcript, select_one, FetchError, RawCandidate, RawCategory, RawItem, RawPayload,
};
use crate::scheduler::pacing::SourcePacer;

const RESTAURANT_TYPES: &[&str] = &[
    "Restaurant",
    "FoodEstablishment",
    "FastFoodRestaurant",
    "CafeOrCoffeeShop",
    "Bakery",
    "BarOrPub",
];

pub struct BrandSiteAdapter {
    renderer: Arc<dyn Renderer>,
    pacer: Arc<SourcePacer>,
    max_candidates: usize,
}

impl BrandSiteAdapter {
    pub fn new(
        config: &SourceConfig,
        renderer: Arc<dyn Renderer>,
        pacer: Arc<SourcePacer>,
    ) -> Result<Self> {
        Ok(Self {
            renderer,
            pacer,
            max_candidates: config.max_candidates,
        })
    }
}

#[async_trait]
impl super::SourceAdapter for BrandSiteAdapter {
    fn id(&self) -> SourceId {
        SourceId::BrandSite
    }

    async fn fetch_candidates(
        &self,
        brand: &BrandTarget,
    ) -> std::result::Result<Vec<RawCandidate>, FetchError> {
        if brand.known_urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut last_error = None;
        for url in brand.known_urls.iter().take(self.max_candidates) {
            self.pacer.pace(SourceId::BrandSite).await;
            let page = match self.renderer.render(url).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(brand = %brand.slug, url = %url, error = %e, "brand site fetch failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let payload = match parse_json_ld_menu(&page.html) {
                Some(payload) => payload,
                None => match extract_transcript(&page.html) {
                    Some(text) => RawPayload::from_transcript(text),
                    None => {
                        tracing::debug!(brand = %brand.slug, url = %url, "page yielded no menu signal");
                        continue;
                    }
                },
            };

            candidates.push(RawCandidate {
                source: SourceId::BrandSite,
                display_name: page_title(&page.html)
                    .unwrap_or_else(|| brand.canonical_name.clone()),
                source_url: page.final_url,
                payload,
            });
        }

        if candidates.is_empty() {
            if let Some(e) = last_error {
                // Every URL failed to fetch; surface the failure for retry.
                return Err(e);
            }
        }
        Ok(candidates)
    }
}

/// One value or an array of values; schema.org publishers use both freely.
fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn type_matches(node: &Value, wanted: &[&str]) -> bool {
    as_list(&node["@type"])
        .iter()
        .filter_map(|t| t.as_str())
        .any(|t| wanted.contains(&t))
}

/// Flatten a JSON-LD document into candidate nodes: top-level arrays and
/// `@graph` containers both unwrap one level.
fn ld_nodes(doc: &Value) -> Vec<&Value> {
    let mut nodes = Vec::new();
    for value in as_list(doc) {
        if let Some(graph) = value.get("@graph") {
            nodes.extend(as_list(graph));
        }
        nodes.push(value);
    }
    nodes
}

fn parse_json_ld_menu(html: &str) -> Option<RawPayload> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("script[type=\"application/ld+json\"]").ok()?;
    for script in doc.select(&selector) {
        let text = script.text().collect::<String>();
        // Malformed blocks are common; try the next one.
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        for node in ld_nodes(&value) {
            let menu = if type_matches(node, &["Menu"]) {
                Some(node)
            } else if type_matches(node, RESTAURANT_TYPES) {
                as_list(&node["hasMenu"])
                    .into_iter()
                    .find(|m| m.is_object())
            } else {
                None
            };
            if let Some(menu) = menu {
                let payload = menu_node_to_payload(menu);
                if payload.item_count() > 0 {
                    return Some(payload);
                }
            }
        }
    }
    None
}

fn menu_node_to_payload(menu: &Value) -> RawPayload {
    let mut categories = Vec::new();

    for section in as_list(&menu["hasMenuSection"]) {
        let name = section["name"].as_str().unwrap_or("Menu").to_string();
        let items: Vec<RawItem> = as_list(&section["hasMenuItem"])
            .into_iter()
            .filter_map(menu_item_node)
            .collect();
        if !items.is_empty() {
            categories.push(RawCategory { name, items });
        }
    }

    // Items hung directly off the menu, outside any section
    let loose: Vec<RawItem> = as_list(&menu["hasMenuItem"])
        .into_iter()
        .filter_map(menu_item_node)
        .collect();
    if !loose.is_empty() {
        categories.push(RawCategory {
            name: "Menu".to_string(),
            items: loose,
        });
    }

    RawPayload {
        categories,
        transcript: None,
    }
}

fn menu_item_node(node: &Value) -> Option<RawItem> {
    let name = node["name"].as_str()?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut price_text = None;
    let mut price_minor = None;
    if let Some(offer) = as_list(&node["offers"]).into_iter().find(|o| o.is_object()) {
        match &offer["price"] {
            Value::String(s) => price_text = Some(s.clone()),
            Value::Number(n) => {
                price_minor = n.as_f64().map(|p| (p * 100.0).round() as i64);
            }
            _ => {}
        }
    }

    let image_url = match &node["image"] {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => node["image"]["url"].as_str().map(str::to_string),
        Value::Array(_) => as_list(&node["image"])
            .into_iter()
            .find_map(|i| i.as_str().map(str::to_string)),
        _ => None,
    };

    Some(RawItem {
        name,
        price_text,
        price_minor,
        description: node["description"].as_str().map(str::to_string),
        image_url,
    })
}

fn page_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    if let Some(meta) = select_one(&doc, "meta[property=\"og:site_name\"]") {
        if let Some(content) = meta.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }
    select_one(&doc, "title").and_then(|t| {
        let text = t.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_ld_restaurant_menu_is_preferred() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"@context":"https://schema.org","@type":"Restaurant",
             "name":"Ya Kun Kaya Toast",
             "hasMenu":{"@type":"Menu","hasMenuSection":[
                {"@type":"MenuSection","name":"Toast",
                 "hasMenuItem":[
                    {"@type":"MenuItem","name":"Kaya Butter Toast",
                     "offers":{"@type":"Offer","price":"2.60","priceCurrency":"SGD"}},
                    {"@type":"MenuItem","name":"French Toast",
                     "offers":{"@type":"Offer","price":3.20}}
                 ]}
             ]}}
            </script></head>
            <body><li>Navigation noise</li></body></html>"#;
        let payload = parse_json_ld_menu(html).unwrap();
        assert_eq!(payload.item_count(), 2);
        assert_eq!(payload.categories[0].name, "Toast");
        assert_eq!(
            payload.categories[0].items[0].price_text.as_deref(),
            Some("2.60")
        );
        assert_eq!(payload.categories[0].items[1].price_minor, Some(320));
    }

    #[test]
    fn graph_wrapped_menu_node_is_found() {
        let html = r#"<script type="application/ld+json">
            {"@context":"https://schema.org","@graph":[
                {"@type":"WebSite","name":"ignored"},
                {"@type":"Menu","hasMenuItem":[
                    {"@type":"MenuItem","name":"Laksa"}
                ]}
            ]}
            </script>"#;
        let payload = parse_json_ld_menu(html).unwrap();
        assert_eq!(payload.item_count(), 1);
        assert_eq!(payload.categories[0].name, "Menu");
    }

    #[test]
    fn no_json_ld_falls_back_to_transcript() {
        let html = r#"<html><body>
            <h2>OUR MENU</h2>
            <li>Kaya Toast Set S$5.60</li>
            <li>Kopi O S$1.80</li>
            </body></html>"#;
        assert!(parse_json_ld_menu(html).is_none());
        let transcript = extract_transcript(html).unwrap();
        assert!(transcript.contains("OUR MENU"));
        assert!(transcript.contains("Kaya Toast Set S$5.60"));
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(parse_json_ld_menu("<html></html>").is_none());
        assert!(extract_transcript("<html></html>").is_none());
    }

    #[test]
    fn display_name_prefers_og_site_name() {
        let html = r#"<html><head>
            <meta property="og:site_name" content="Ya Kun Kaya Toast">
            <title>Menu | Ya Kun</title></head></html>"#;
        assert_eq!(page_title(html).as_deref(), Some("Ya Kun Kaya Toast"));

        let html = "<html><head><title>Menu | Ya Kun</title></head></html>";
        assert_eq!(page_title(html).as_deref(), Some("Menu | Ya Kun"));
    }
}
