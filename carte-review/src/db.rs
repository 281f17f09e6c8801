//! Database queries for the review surface
//!
//! carte-review owns its own queries against the shared database rather
//! than linking the ingest pipeline in. Promote and delete mirror the
//! ledger conventions the pipeline uses so the two services agree on what
//! a pair's state means.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use carte_common::model::SourceId;
use carte_common::{Error, Result};

/// One quarantined menu in the list view.
#[derive(Debug, Serialize)]
pub struct QuarantineRow {
    pub brand_id: Uuid,
    pub slug: String,
    pub canonical_name: String,
    pub source: String,
    pub item_count: i64,
    pub price_coverage: f64,
    pub gate_reason: String,
    pub updated_at: String,
}

/// Full quarantined record for the detail view, categories included.
#[derive(Debug, Serialize)]
pub struct QuarantinedRecord {
    pub brand_id: Uuid,
    pub source: String,
    pub categories: serde_json::Value,
    pub item_count: i64,
    pub price_coverage: f64,
    pub image_coverage: f64,
    pub gate_reason: String,
    pub match_confidence: String,
    pub source_url: String,
    pub updated_at: String,
}

pub async fn list_quarantined(pool: &SqlitePool) -> Result<Vec<QuarantineRow>> {
    let rows = sqlx::query(
        r#"
        SELECT m.brand_id, b.slug, b.canonical_name, m.source, m.item_count,
               m.price_coverage, m.gate_reason, m.updated_at
        FROM menu_records m
        JOIN brands b ON b.brand_id = m.brand_id
        WHERE m.quality = 'quarantined'
        ORDER BY m.updated_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let brand_id: String = row.get("brand_id");
            Ok(QuarantineRow {
                brand_id: Uuid::parse_str(&brand_id)
                    .map_err(|e| Error::Internal(format!("bad brand_id: {}", e)))?,
                slug: row.get("slug"),
                canonical_name: row.get("canonical_name"),
                source: row.get("source"),
                item_count: row.get("item_count"),
                price_coverage: row.get("price_coverage"),
                gate_reason: row.get("gate_reason"),
                updated_at: row.get("updated_at"),
            })
        })
        .collect()
}

pub async fn quarantined_records(
    pool: &SqlitePool,
    brand_id: Uuid,
) -> Result<Vec<QuarantinedRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT brand_id, source, categories, item_count, price_coverage,
               image_coverage, gate_reason, match_confidence, source_url, updated_at
        FROM menu_records
        WHERE brand_id = ? AND quality = 'quarantined'
        ORDER BY source ASC
        "#,
    )
    .bind(brand_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let categories: String = row.get("categories");
            let categories: serde_json::Value = serde_json::from_str(&categories)?;
            Ok(QuarantinedRecord {
                brand_id,
                source: row.get("source"),
                categories,
                item_count: row.get("item_count"),
                price_coverage: row.get("price_coverage"),
                image_coverage: row.get("image_coverage"),
                gate_reason: row.get("gate_reason"),
                match_confidence: row.get("match_confidence"),
                source_url: row.get("source_url"),
                updated_at: row.get("updated_at"),
            })
        })
        .collect()
}

/// Promote a quarantined record to accepted and bring the ledger and brand
/// registry along. Returns false when the pair has nothing quarantined.
pub async fn promote(pool: &SqlitePool, brand_id: Uuid, source: SourceId) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    let changed = sqlx::query(
        "UPDATE menu_records SET quality = 'accepted', gate_reason = 'operator_promoted', \
         updated_at = ? WHERE brand_id = ? AND source = ? AND quality = 'quarantined'",
    )
    .bind(&now)
    .bind(brand_id.to_string())
    .bind(source.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if changed == 0 {
        tx.commit().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO crawl_ledger (brand_id, source, state, attempts, note, updated_at)
        VALUES (?, ?, 'accepted', 1, 'operator promoted', ?)
        ON CONFLICT(brand_id, source) DO UPDATE SET
            state = 'accepted',
            note = 'operator promoted',
            updated_at = excluded.updated_at
        "#,
    )
    .bind(brand_id.to_string())
    .bind(source.as_str())
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    refresh_brand(&mut tx, brand_id, &now).await?;
    tx.commit().await?;
    Ok(true)
}

/// Drop a quarantined record and reject the pair so the pipeline does not
/// re-scrape it without force.
pub async fn delete_quarantined(
    pool: &SqlitePool,
    brand_id: Uuid,
    source: SourceId,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query(
        "DELETE FROM menu_records WHERE brand_id = ? AND source = ? AND quality = 'quarantined'",
    )
    .bind(brand_id.to_string())
    .bind(source.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if deleted == 0 {
        tx.commit().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO crawl_ledger (brand_id, source, state, attempts, note, updated_at)
        VALUES (?, ?, 'rejected', 1, 'quarantine deleted by operator', ?)
        ON CONFLICT(brand_id, source) DO UPDATE SET
            state = 'rejected',
            note = 'quarantine deleted by operator',
            updated_at = excluded.updated_at
        "#,
    )
    .bind(brand_id.to_string())
    .bind(source.as_str())
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

async fn refresh_brand(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    brand_id: Uuid,
    now: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE brands SET
            accepted = CASE WHEN EXISTS (
                SELECT 1 FROM menu_records
                WHERE brand_id = brands.brand_id AND quality = 'accepted'
            ) THEN 1 ELSE 0 END,
            accepted_item_count = COALESCE((
                SELECT MAX(item_count) FROM menu_records
                WHERE brand_id = brands.brand_id AND quality = 'accepted'
            ), 0),
            updated_at = ?
        WHERE brand_id = ?
        "#,
    )
    .bind(now)
    .bind(brand_id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
