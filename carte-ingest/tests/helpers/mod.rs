//! Shared fixtures for pipeline tests
//!
//! Stub adapters stand in for the real marketplace sources so runs are
//! deterministic and offline. Behaviors are keyed by brand slug.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use carte_common::config::CarteConfig;
use carte_common::db::init_database_pool;
use carte_common::model::{BrandTarget, SourceId};
use carte_ingest::scheduler::pacing::SourcePacer;
use carte_ingest::scheduler::Scheduler;
use carte_ingest::sources::{
    FetchError, RawCandidate, RawCategory, RawItem, RawPayload, SourceAdapter,
};
use carte_ingest::store::registry;

#[derive(Clone)]
pub enum StubBehavior {
    /// One listing whose menu holds `priced` priced and `unpriced` unpriced items
    Menu { priced: u32, unpriced: u32 },
    /// Search succeeds but finds nothing
    NoListings,
    /// Fail with the given error
    Fail(FetchError),
    /// Never answer; exercises the call timeout
    Hang,
}

pub struct StubAdapter {
    pub source: SourceId,
    pub behaviors: HashMap<String, StubBehavior>,
}

impl StubAdapter {
    pub fn new(source: SourceId, behaviors: &[(&str, StubBehavior)]) -> Self {
        Self {
            source,
            behaviors: behaviors
                .iter()
                .map(|(slug, b)| (slug.to_string(), b.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn id(&self) -> SourceId {
        self.source
    }

    async fn fetch_candidates(
        &self,
        brand: &BrandTarget,
    ) -> Result<Vec<RawCandidate>, FetchError> {
        let behavior = self
            .behaviors
            .get(&brand.slug)
            .cloned()
            .unwrap_or(StubBehavior::NoListings);
        match behavior {
            StubBehavior::Menu { priced, unpriced } => Ok(vec![menu_candidate(
                self.source,
                &brand.canonical_name,
                priced,
                unpriced,
            )]),
            StubBehavior::NoListings => Ok(Vec::new()),
            StubBehavior::Fail(e) => Err(e),
            StubBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// A structured candidate whose display name matches the brand exactly.
pub fn menu_candidate(
    source: SourceId,
    display_name: &str,
    priced: u32,
    unpriced: u32,
) -> RawCandidate {
    let mut items = Vec::new();
    for i in 0..priced {
        items.push(RawItem {
            name: format!("Dish {}", i),
            price_text: None,
            price_minor: Some(500 + i as i64 * 10),
            description: None,
            image_url: None,
        });
    }
    for i in 0..unpriced {
        items.push(RawItem {
            name: format!("Special {}", i),
            price_text: None,
            price_minor: None,
            description: None,
            image_url: None,
        });
    }
    RawCandidate {
        source,
        display_name: display_name.to_string(),
        source_url: "https://stub.example/listing".to_string(),
        payload: RawPayload {
            categories: vec![RawCategory {
                name: "Menu".to_string(),
                items,
            }],
            transcript: None,
        },
    }
}

/// Zero-delay, short-timeout configuration for offline runs.
pub fn test_config() -> CarteConfig {
    let mut config = CarteConfig::default();
    config.sources.grabfood.min_delay_ms = 0;
    config.sources.foodpanda.min_delay_ms = 0;
    config.sources.brand_site.min_delay_ms = 0;
    config.sources.vision.min_delay_ms = 0;
    config.scheduler.call_timeout_ms = 500;
    config
}

pub async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database_pool(&dir.path().join("carte.db")).await.unwrap();
    (dir, pool)
}

pub async fn seed_brand(pool: &SqlitePool, name: &str, slug: &str) -> BrandTarget {
    let brand = BrandTarget {
        brand_id: Uuid::new_v4(),
        canonical_name: name.to_string(),
        slug: slug.to_string(),
        known_urls: Vec::new(),
        locale_hint: "en-SG".to_string(),
        accepted: false,
        accepted_item_count: 0,
    };
    registry::upsert_brand(pool, &brand).await.unwrap();
    brand
}

pub fn adapter_map(
    adapters: Vec<StubAdapter>,
) -> HashMap<SourceId, Arc<dyn SourceAdapter>> {
    adapters
        .into_iter()
        .map(|a| (a.source, Arc::new(a) as Arc<dyn SourceAdapter>))
        .collect()
}

pub fn scheduler_with(
    pool: &SqlitePool,
    config: &CarteConfig,
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
) -> Scheduler {
    let pacer = Arc::new(SourcePacer::new(config));
    Scheduler::new(pool.clone(), config.clone(), adapters, pacer).unwrap()
}
