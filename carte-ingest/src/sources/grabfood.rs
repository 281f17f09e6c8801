//! GrabFood marketplace adapter
//!
//! Search and merchant pages are Next.js applications; once the page
//! settles, the full Redux state sits in a `script#__NEXT_DATA__` tag and
//! carries far more than the visible listing, including the merchant's
//! complete menu tree. Extraction works off that state, never the DOM.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;
use url::Url;

use carte_common::config::SourceConfig;
use carte_common::model::{BrandTarget, SourceId};
use carte_common::{Error, Result};

use super::render::Renderer;
use super::{locale_path, select_one, FetchError, RawCandidate, RawCategory, RawItem, RawPayload};
use crate::scheduler::pacing::SourcePacer;

/// One host serves every country; the path carries the locale.
const DEFAULT_BASE_URL: &str = "https://food.grab.com";

pub struct GrabfoodAdapter {
    renderer: Arc<dyn Renderer>,
    pacer: Arc<SourcePacer>,
    base_url: Url,
    max_candidates: usize,
}

impl GrabfoodAdapter {
    pub fn new(
        config: &SourceConfig,
        renderer: Arc<dyn Renderer>,
        pacer: Arc<SourcePacer>,
    ) -> Result<Self> {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let base_url = Url::parse(base)
            .map_err(|e| Error::Config(format!("sources.grabfood.base_url: {}", e)))?;
        Ok(Self {
            renderer,
            pacer,
            base_url,
            max_candidates: config.max_candidates,
        })
    }

    fn search_url(&self, brand: &BrandTarget) -> std::result::Result<Url, FetchError> {
        let (country, lang) = locale_path(&brand.locale_hint);
        let mut url = self
            .base_url
            .join(&format!("{}/{}/restaurants", country, lang))
            .map_err(|e| FetchError::Network(format!("search url: {}", e)))?;
        url.query_pairs_mut().append_pair("search", &brand.canonical_name);
        Ok(url)
    }

    fn merchant_url(
        &self,
        brand: &BrandTarget,
        merchant_id: &str,
    ) -> std::result::Result<Url, FetchError> {
        let (country, lang) = locale_path(&brand.locale_hint);
        self.base_url
            .join(&format!("{}/{}/restaurant/{}", country, lang, merchant_id))
            .map_err(|e| FetchError::Network(format!("merchant url: {}", e)))
    }
}

#[async_trait]
impl super::SourceAdapter for GrabfoodAdapter {
    fn id(&self) -> SourceId {
        SourceId::Grabfood
    }

    async fn fetch_candidates(
        &self,
        brand: &BrandTarget,
    ) -> std::result::Result<Vec<RawCandidate>, FetchError> {
        let search_url = self.search_url(brand)?;
        self.pacer.pace(SourceId::Grabfood).await;
        let page = self.renderer.render(search_url.as_str()).await?;
        let listings = parse_search_results(&page.html)?;
        if listings.is_empty() {
            tracing::debug!(brand = %brand.slug, "grabfood search returned no listings");
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut parse_failures = 0usize;
        for listing in listings.into_iter().take(self.max_candidates) {
            let url = self.merchant_url(brand, &listing.id)?;
            self.pacer.pace(SourceId::Grabfood).await;
            match self.renderer.render(url.as_str()).await {
                Ok(merchant_page) => match parse_merchant_menu(&merchant_page.html) {
                    Ok(payload) => candidates.push(RawCandidate {
                        source: SourceId::Grabfood,
                        display_name: listing.name,
                        source_url: merchant_page.final_url,
                        payload,
                    }),
                    Err(e) => {
                        parse_failures += 1;
                        tracing::warn!(
                            brand = %brand.slug,
                            merchant = %listing.id,
                            error = %e,
                            "skipping unreadable grabfood merchant page"
                        );
                    }
                },
                Err(e) => {
                    // One dead merchant page must not sink the other hits.
                    tracing::warn!(
                        brand = %brand.slug,
                        merchant = %listing.id,
                        error = %e,
                        "grabfood merchant fetch failed"
                    );
                }
            }
        }

        if candidates.is_empty() {
            if parse_failures > 0 {
                return Err(FetchError::Parse(format!(
                    "no merchant page yielded a menu ({} parse failures)",
                    parse_failures
                )));
            }
            return Err(FetchError::Network("every merchant page fetch failed".into()));
        }
        Ok(candidates)
    }
}

#[derive(Debug, Deserialize)]
struct GfNextData {
    props: GfProps,
}

#[derive(Debug, Deserialize)]
struct GfProps {
    #[serde(rename = "initialReduxState")]
    initial_redux_state: GfReduxState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GfReduxState {
    #[serde(rename = "pageRestaurantList")]
    restaurant_list: Option<GfRestaurantListPage>,
    #[serde(rename = "pageRestaurantDetail")]
    restaurant_detail: Option<GfRestaurantDetailPage>,
}

#[derive(Debug, Deserialize)]
struct GfRestaurantListPage {
    entities: GfListEntities,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GfListEntities {
    #[serde(rename = "restaurantList")]
    restaurants: Vec<GfRestaurantSummary>,
}

#[derive(Debug, Deserialize)]
struct GfRestaurantSummary {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GfRestaurantDetailPage {
    entities: GfDetailEntities,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GfDetailEntities {
    restaurant: Option<GfRestaurantDetail>,
}

#[derive(Debug, Deserialize)]
struct GfRestaurantDetail {
    #[serde(default)]
    menu: Option<GfMenu>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GfMenu {
    categories: Vec<GfCategory>,
}

#[derive(Debug, Deserialize)]
struct GfCategory {
    name: String,
    #[serde(default)]
    items: Vec<GfItem>,
}

#[derive(Debug, Deserialize)]
struct GfItem {
    name: String,
    #[serde(rename = "priceInMinorUnit", default)]
    price_in_minor_unit: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "imgHref", default)]
    img_href: Option<String>,
}

fn extract_next_data(html: &str) -> std::result::Result<GfReduxState, FetchError> {
    let doc = Html::parse_document(html);
    let script = select_one(&doc, "script#__NEXT_DATA__")
        .ok_or_else(|| FetchError::Parse("page has no __NEXT_DATA__ script".into()))?;
    let json = script.text().collect::<String>();
    let data: GfNextData = serde_json::from_str(&json)
        .map_err(|e| FetchError::Parse(format!("__NEXT_DATA__ decode: {}", e)))?;
    Ok(data.props.initial_redux_state)
}

fn parse_search_results(html: &str) -> std::result::Result<Vec<GfRestaurantSummary>, FetchError> {
    let state = extract_next_data(html)?;
    let list = state
        .restaurant_list
        .ok_or_else(|| FetchError::Parse("search state missing pageRestaurantList".into()))?;
    Ok(list.entities.restaurants)
}

fn parse_merchant_menu(html: &str) -> std::result::Result<RawPayload, FetchError> {
    let state = extract_next_data(html)?;
    let menu = state
        .restaurant_detail
        .and_then(|page| page.entities.restaurant)
        .and_then(|restaurant| restaurant.menu)
        .ok_or_else(|| FetchError::Parse("merchant state missing menu tree".into()))?;

    let categories = menu
        .categories
        .into_iter()
        .map(|category| RawCategory {
            name: category.name,
            items: category
                .items
                .into_iter()
                .map(|item| RawItem {
                    name: item.name,
                    price_text: None,
                    price_minor: item.price_in_minor_unit,
                    description: item.description,
                    image_url: item.img_href,
                })
                .collect(),
        })
        .collect();
    Ok(RawPayload {
        categories,
        transcript: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_state(state_json: &str) -> String {
        format!(
            "<html><body><div id=\"root\"></div>\
             <script id=\"__NEXT_DATA__\" type=\"application/json\">\
             {{\"props\":{{\"initialReduxState\":{}}}}}\
             </script></body></html>",
            state_json
        )
    }

    #[test]
    fn search_results_come_from_embedded_state() {
        let html = page_with_state(
            r#"{"pageRestaurantList":{"entities":{"restaurantList":[
                {"id":"5-C2KZTBLEBVJLJA","name":"Ajisen Ramen (Jem)"},
                {"id":"5-C3FAKE","name":"KFC (Jem)"}
            ]}}}"#,
        );
        let listings = parse_search_results(&html).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].id, "5-C2KZTBLEBVJLJA");
        assert_eq!(listings[0].name, "Ajisen Ramen (Jem)");
    }

    #[test]
    fn merchant_menu_maps_categories_and_minor_units() {
        let html = page_with_state(
            r#"{"pageRestaurantDetail":{"entities":{"restaurant":{"menu":{"categories":[
                {"name":"Ramen","items":[
                    {"name":"Shoyu Ramen","priceInMinorUnit":1290,"imgHref":"https://img/1.jpg"},
                    {"name":"Miso Ramen","priceInMinorUnit":1390,"description":"Rich broth"}
                ]},
                {"name":"Sides","items":[{"name":"Gyoza","priceInMinorUnit":650}]}
            ]}}}}}"#,
        );
        let payload = parse_merchant_menu(&html).unwrap();
        assert!(payload.has_structure());
        assert_eq!(payload.item_count(), 3);
        assert_eq!(payload.categories[0].items[0].price_minor, Some(1290));
        assert_eq!(
            payload.categories[0].items[0].image_url.as_deref(),
            Some("https://img/1.jpg")
        );
        assert_eq!(
            payload.categories[0].items[1].description.as_deref(),
            Some("Rich broth")
        );
    }

    #[test]
    fn missing_next_data_is_a_parse_failure() {
        let err = parse_search_results("<html><body>challenge page</body></html>").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn reshaped_state_is_a_parse_failure() {
        // state present but the list moved somewhere else
        let html = page_with_state(r#"{"somethingNew":{}}"#);
        let err = parse_search_results(&html).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));

        let err = parse_merchant_menu(&html).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
