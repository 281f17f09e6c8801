//! Canonical brand registry access
//!
//! The registry is the pipeline's work queue and its only write-back
//! surface: brands come in from `import-brands` or an upstream sync, and
//! after each run the accepted flag and best item count are refreshed so
//! the owning system can see enrichment progress.

use std::path::Path;

use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use carte_common::model::BrandTarget;
use carte_common::{Error, Result};

use crate::matcher::slugify;

fn row_to_brand(row: &sqlx::sqlite::SqliteRow) -> Result<BrandTarget> {
    let brand_id: String = row.get("brand_id");
    let brand_id = Uuid::parse_str(&brand_id)
        .map_err(|e| Error::Internal(format!("bad brand_id in registry: {}", e)))?;

    let known_urls: String = row.get("known_urls");
    let known_urls: Vec<String> = serde_json::from_str(&known_urls)
        .map_err(|e| Error::Internal(format!("bad known_urls for {}: {}", brand_id, e)))?;

    Ok(BrandTarget {
        brand_id,
        canonical_name: row.get("canonical_name"),
        slug: row.get("slug"),
        known_urls,
        locale_hint: row.get("locale_hint"),
        accepted: row.get::<i64, _>("accepted") != 0,
        accepted_item_count: row.get("accepted_item_count"),
    })
}

const BRAND_COLUMNS: &str =
    "brand_id, canonical_name, slug, known_urls, locale_hint, accepted, accepted_item_count";

/// Every brand, in stable slug order.
pub async fn all_brands(pool: &SqlitePool) -> Result<Vec<BrandTarget>> {
    let rows = sqlx::query(&format!("SELECT {} FROM brands ORDER BY slug", BRAND_COLUMNS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_brand).collect()
}

pub async fn brand_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<BrandTarget>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM brands WHERE slug = ?",
        BRAND_COLUMNS
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_brand).transpose()
}

/// Insert or fully update one brand, keyed by brand_id.
pub async fn upsert_brand(pool: &SqlitePool, brand: &BrandTarget) -> Result<()> {
    let known_urls = serde_json::to_string(&brand.known_urls)?;
    sqlx::query(
        r#"
        INSERT INTO brands (brand_id, canonical_name, slug, known_urls, locale_hint,
                            accepted, accepted_item_count, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(brand_id) DO UPDATE SET
            canonical_name = excluded.canonical_name,
            slug = excluded.slug,
            known_urls = excluded.known_urls,
            locale_hint = excluded.locale_hint,
            accepted = excluded.accepted,
            accepted_item_count = excluded.accepted_item_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(brand.brand_id.to_string())
    .bind(&brand.canonical_name)
    .bind(&brand.slug)
    .bind(known_urls)
    .bind(&brand.locale_hint)
    .bind(brand.accepted as i64)
    .bind(brand.accepted_item_count)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Write back per-brand acceptance after a pass: the flag and the item
/// count of the best accepted record, donor copies included.
pub async fn refresh_accepted_counts(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE brands SET
            accepted = EXISTS(
                SELECT 1 FROM menu_records m
                WHERE m.brand_id = brands.brand_id AND m.quality = 'accepted'
            ),
            accepted_item_count = COALESCE((
                SELECT MAX(m.item_count) FROM menu_records m
                WHERE m.brand_id = brands.brand_id AND m.quality = 'accepted'
            ), 0)
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// One brand as it appears in an import file. Only the name is mandatory.
#[derive(Debug, Deserialize)]
pub struct BrandSeed {
    pub canonical_name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub known_urls: Vec<String>,
    #[serde(default)]
    pub locale_hint: Option<String>,
}

/// Load a JSON array of brand seeds, keyed by slug: existing slugs update
/// in place and keep their brand_id, new slugs insert with a fresh one.
pub async fn import_brands(pool: &SqlitePool, path: &Path) -> Result<(u32, u32)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let seeds: Vec<BrandSeed> = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;

    let mut inserted = 0u32;
    let mut updated = 0u32;
    for seed in seeds {
        let slug = match &seed.slug {
            Some(s) if !s.is_empty() => s.clone(),
            _ => slugify(&seed.canonical_name),
        };
        if slug.is_empty() {
            tracing::warn!(name = %seed.canonical_name, "skipping brand with unusable name");
            continue;
        }
        let locale_hint = seed.locale_hint.unwrap_or_else(|| "en-SG".to_string());
        let known_urls = serde_json::to_string(&seed.known_urls)?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT brand_id FROM brands WHERE slug = ?")
                .bind(&slug)
                .fetch_optional(pool)
                .await?;
        match existing {
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE brands
                    SET canonical_name = ?, known_urls = ?, locale_hint = ?, updated_at = ?
                    WHERE slug = ?
                    "#,
                )
                .bind(&seed.canonical_name)
                .bind(known_urls)
                .bind(&locale_hint)
                .bind(chrono::Utc::now().to_rfc3339())
                .bind(&slug)
                .execute(pool)
                .await?;
                updated += 1;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO brands (brand_id, canonical_name, slug, known_urls,
                                        locale_hint, accepted, accepted_item_count, updated_at)
                    VALUES (?, ?, ?, ?, ?, 0, 0, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&seed.canonical_name)
                .bind(&slug)
                .bind(known_urls)
                .bind(&locale_hint)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(pool)
                .await?;
                inserted += 1;
            }
        }
    }
    Ok((inserted, updated))
}
