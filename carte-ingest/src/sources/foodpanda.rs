//! foodpanda marketplace adapter
//!
//! Listing and vendor pages embed their state as a bare
//! `window.__PRELOADED_STATE__ = {...}` assignment inside an inline script,
//! with further statements after the object literal. The parser locates the
//! marker and decodes one JSON value from that offset, ignoring the rest of
//! the script body. A vendor page that stops carrying the marker degrades to
//! a visible-text transcript instead of failing the pair.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

use carte_common::config::SourceConfig;
use carte_common::model::{BrandTarget, SourceId};
use carte_common::{Error, Result};

use super::render::Renderer;
use super::{
    extract_transcript, locale_path, FetchError, RawCandidate, RawCategory, RawItem, RawPayload,
};
use crate::scheduler::pacing::SourcePacer;

const STATE_MARKER: &str = "window.__PRELOADED_STATE__";

pub struct FoodpandaAdapter {
    renderer: Arc<dyn Renderer>,
    pacer: Arc<SourcePacer>,
    /// Configured override; normally the country domain comes from the
    /// brand's locale hint (foodpanda.sg, foodpanda.my, ...).
    base_url: Option<Url>,
    max_candidates: usize,
}

impl FoodpandaAdapter {
    pub fn new(
        config: &SourceConfig,
        renderer: Arc<dyn Renderer>,
        pacer: Arc<SourcePacer>,
    ) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::Config(format!("sources.foodpanda.base_url: {}", e)))?;
        Ok(Self {
            renderer,
            pacer,
            base_url,
            max_candidates: config.max_candidates,
        })
    }

    fn site_root(&self, brand: &BrandTarget) -> std::result::Result<Url, FetchError> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        let (country, _) = locale_path(&brand.locale_hint);
        Url::parse(&format!("https://www.foodpanda.{}", country))
            .map_err(|e| FetchError::Network(format!("site root for {}: {}", country, e)))
    }

    fn search_url(root: &Url, brand: &BrandTarget) -> std::result::Result<Url, FetchError> {
        let mut url = root
            .join("restaurants/new")
            .map_err(|e| FetchError::Network(format!("search url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("q", &brand.canonical_name)
            .append_pair("vertical", "restaurants");
        Ok(url)
    }

    fn vendor_url(root: &Url, listing: &FpListing) -> std::result::Result<Url, FetchError> {
        root.join(&format!("restaurant/{}/{}", listing.code, listing.url_key))
            .map_err(|e| FetchError::Network(format!("vendor url: {}", e)))
    }
}

#[async_trait]
impl super::SourceAdapter for FoodpandaAdapter {
    fn id(&self) -> SourceId {
        SourceId::Foodpanda
    }

    async fn fetch_candidates(
        &self,
        brand: &BrandTarget,
    ) -> std::result::Result<Vec<RawCandidate>, FetchError> {
        let root = self.site_root(brand)?;
        let search_url = Self::search_url(&root, brand)?;
        self.pacer.pace(SourceId::Foodpanda).await;
        let page = self.renderer.render(search_url.as_str()).await?;
        let listings = parse_search_results(&page.html)?;
        if listings.is_empty() {
            tracing::debug!(brand = %brand.slug, "foodpanda search returned no listings");
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut parse_failures = 0usize;
        for listing in listings.into_iter().take(self.max_candidates) {
            let url = Self::vendor_url(&root, &listing)?;
            self.pacer.pace(SourceId::Foodpanda).await;
            match self.renderer.render(url.as_str()).await {
                Ok(vendor_page) => match parse_vendor_menu(&vendor_page.html) {
                    Ok(payload) => candidates.push(RawCandidate {
                        source: SourceId::Foodpanda,
                        display_name: listing.name,
                        source_url: vendor_page.final_url,
                        payload,
                    }),
                    Err(e) => {
                        parse_failures += 1;
                        tracing::warn!(
                            brand = %brand.slug,
                            vendor = %listing.code,
                            error = %e,
                            "skipping unreadable foodpanda vendor page"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        brand = %brand.slug,
                        vendor = %listing.code,
                        error = %e,
                        "foodpanda vendor fetch failed"
                    );
                }
            }
        }

        if candidates.is_empty() {
            if parse_failures > 0 {
                return Err(FetchError::Parse(format!(
                    "no vendor page yielded a menu ({} parse failures)",
                    parse_failures
                )));
            }
            return Err(FetchError::Network("every vendor page fetch failed".into()));
        }
        Ok(candidates)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FpState {
    #[serde(rename = "organicListing")]
    organic_listing: Option<FpOrganicListing>,
    vendor: Option<FpVendor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FpOrganicListing {
    views: Vec<FpListingView>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FpListingView {
    items: Vec<FpListing>,
}

#[derive(Debug, Deserialize)]
struct FpListing {
    code: String,
    name: String,
    #[serde(default)]
    url_key: String,
}

#[derive(Debug, Deserialize)]
struct FpVendor {
    #[allow(dead_code)]
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    menus: Vec<FpMenu>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FpMenu {
    menu_categories: Vec<FpMenuCategory>,
}

#[derive(Debug, Deserialize)]
struct FpMenuCategory {
    name: String,
    #[serde(default)]
    products: Vec<FpProduct>,
}

#[derive(Debug, Deserialize)]
struct FpProduct {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    images: Vec<FpImage>,
    #[serde(default)]
    product_variations: Vec<FpVariation>,
}

#[derive(Debug, Deserialize)]
struct FpImage {
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct FpVariation {
    price: f64,
}

/// Find the preloaded-state assignment and decode the object literal that
/// follows it. `into_iter` stops at the end of the first complete JSON value,
/// so trailing statements in the same script are harmless. `Ok(None)` means
/// no script on the page carries the marker at all.
fn extract_preloaded_state(html: &str) -> std::result::Result<Option<FpState>, FetchError> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("script")
        .map_err(|e| FetchError::Parse(format!("script selector: {}", e)))?;
    for script in doc.select(&selector) {
        let text = script.text().collect::<String>();
        let Some(marker_at) = text.find(STATE_MARKER) else {
            continue;
        };
        let after_marker = &text[marker_at + STATE_MARKER.len()..];
        let Some(eq_at) = after_marker.find('=') else {
            continue;
        };
        let literal = after_marker[eq_at + 1..].trim_start();
        let mut stream = serde_json::Deserializer::from_str(literal).into_iter::<FpState>();
        return match stream.next() {
            Some(Ok(state)) => Ok(Some(state)),
            Some(Err(e)) => Err(FetchError::Parse(format!("preloaded state decode: {}", e))),
            None => Err(FetchError::Parse("preloaded state assignment is empty".into())),
        };
    }
    Ok(None)
}

fn parse_search_results(html: &str) -> std::result::Result<Vec<FpListing>, FetchError> {
    let state = extract_preloaded_state(html)?
        .ok_or_else(|| FetchError::Parse("search page has no preloaded state script".into()))?;
    let listing = state
        .organic_listing
        .ok_or_else(|| FetchError::Parse("search state missing organicListing".into()))?;
    Ok(listing.views.into_iter().flat_map(|view| view.items).collect())
}

/// A stateless vendor page falls back to its visible text and takes the
/// transcript segmentation path downstream. A page that carries the marker
/// with an unexpected shape is still a parse failure.
fn parse_vendor_menu(html: &str) -> std::result::Result<RawPayload, FetchError> {
    let Some(state) = extract_preloaded_state(html)? else {
        return match extract_transcript(html) {
            Some(text) => Ok(RawPayload::from_transcript(text)),
            None => Err(FetchError::Parse(
                "vendor page has neither preloaded state nor readable text".into(),
            )),
        };
    };
    let vendor = state
        .vendor
        .ok_or_else(|| FetchError::Parse("vendor state missing vendor entity".into()))?;

    let categories = vendor
        .menus
        .into_iter()
        .flat_map(|menu| menu.menu_categories)
        .map(|category| RawCategory {
            name: category.name,
            items: category.products.into_iter().map(product_to_item).collect(),
        })
        .collect();
    Ok(RawPayload {
        categories,
        transcript: None,
    })
}

fn product_to_item(product: FpProduct) -> RawItem {
    // Variations are cheapest-first on the site; take the head price.
    let price_minor = product
        .product_variations
        .first()
        .map(|variation| (variation.price * 100.0).round() as i64);
    RawItem {
        name: product.name,
        price_text: None,
        price_minor,
        description: product.description,
        image_url: product.images.into_iter().next().map(|image| image.image_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_state(state_json: &str) -> String {
        format!(
            "<html><head><script>var x=1;\
             window.__PRELOADED_STATE__ = {};\
             window.__I18N__ = {{\"locale\":\"en\"}};</script></head>\
             <body></body></html>",
            state_json
        )
    }

    #[test]
    fn search_listings_survive_trailing_script_statements() {
        let html = page_with_state(
            r#"{"organicListing":{"views":[{"items":[
                {"code":"x1ab","name":"Ajisen Ramen (Jem)","url_key":"ajisen-ramen-jem"},
                {"code":"y2cd","name":"KFC (Jem)","url_key":"kfc-jem"}
            ]}]}}"#,
        );
        let listings = parse_search_results(&html).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[1].code, "y2cd");
        assert_eq!(listings[1].url_key, "kfc-jem");
    }

    #[test]
    fn vendor_menu_flattens_menus_and_converts_prices() {
        let html = page_with_state(
            r#"{"vendor":{"name":"Ajisen Ramen","menus":[{"menu_categories":[
                {"name":"Ramen","products":[
                    {"name":"Shoyu Ramen","description":"Classic",
                     "images":[{"image_url":"https://img/shoyu.jpg"}],
                     "product_variations":[{"price":12.9},{"price":15.9}]},
                    {"name":"Plain Ramen","product_variations":[]}
                ]}
            ]}]}}"#,
        );
        let payload = parse_vendor_menu(&html).unwrap();
        assert_eq!(payload.item_count(), 2);
        let items = &payload.categories[0].items;
        assert_eq!(items[0].price_minor, Some(1290));
        assert_eq!(items[0].image_url.as_deref(), Some("https://img/shoyu.jpg"));
        assert_eq!(items[1].price_minor, None);
    }

    #[test]
    fn missing_state_is_a_parse_failure_for_search() {
        let err =
            parse_search_results("<html><body>are you a robot?</body></html>").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn stateless_vendor_page_degrades_to_a_transcript() {
        let html = "<html><body>\
             <h2>SIGNATURE RAMEN</h2>\
             <li>Shoyu Ramen S$12.90</li>\
             <li>Gyoza (5 pcs) S$6.50</li>\
             </body></html>";
        let payload = parse_vendor_menu(html).unwrap();
        assert!(!payload.has_structure());
        let transcript = payload.transcript.unwrap();
        assert!(transcript.contains("SIGNATURE RAMEN"));
        assert!(transcript.contains("Shoyu Ramen S$12.90"));
    }

    #[test]
    fn bare_vendor_shell_is_still_a_parse_failure() {
        let err = parse_vendor_menu("<html><body><script>boot()</script></body></html>")
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn vendor_page_without_vendor_entity_is_a_parse_failure() {
        let html = page_with_state(r#"{"organicListing":{"views":[]}}"#);
        let err = parse_vendor_menu(&html).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
