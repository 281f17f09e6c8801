//! Menu record persistence
//!
//! One row per (brand, source), idempotently upserted. A re-scrape whose
//! payload hash matches the stored row is skipped outright, which keeps
//! repeated runs over unchanged sources byte-identical in the database and
//! preserves the original scrape timestamp.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use carte_common::model::{
    GateReason, MatchConfidence, MenuCategory, MenuRecord, Provenance, QualityStatus, SourceId,
};
use carte_common::{Error, Result};

use super::registry;

/// What an upsert actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    /// Stored row already carries this payload and classification
    Unchanged,
}

const RECORD_COLUMNS: &str = "brand_id, source, categories, item_count, price_coverage, \
     image_coverage, quality, gate_reason, match_confidence, provenance, donor_brand_id, \
     source_url, payload_hash, updated_at";

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<MenuRecord> {
    let brand_id: String = row.get("brand_id");
    let brand_id = Uuid::parse_str(&brand_id)
        .map_err(|e| Error::Internal(format!("bad brand_id in menu_records: {}", e)))?;

    let source: String = row.get("source");
    let source = SourceId::from_str(&source)?;

    let categories: String = row.get("categories");
    let categories: Vec<MenuCategory> = serde_json::from_str(&categories)
        .map_err(|e| Error::Internal(format!("bad categories for {}: {}", brand_id, e)))?;

    let quality: String = row.get("quality");
    let gate_reason: String = row.get("gate_reason");
    let match_confidence: String = row.get("match_confidence");
    let provenance: String = row.get("provenance");

    let donor_brand_id: Option<String> = row.get("donor_brand_id");
    let donor_brand_id = donor_brand_id
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("bad donor_brand_id: {}", e)))?;

    let updated_at: String = row.get("updated_at");
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| Error::Internal(format!("bad updated_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(MenuRecord {
        brand_id,
        source,
        categories,
        item_count: row.get::<i64, _>("item_count") as u32,
        price_coverage: row.get("price_coverage"),
        image_coverage: row.get("image_coverage"),
        quality: QualityStatus::from_str(&quality)?,
        gate_reason: GateReason::from_str(&gate_reason)?,
        match_confidence: MatchConfidence::from_str(&match_confidence)?,
        provenance: Provenance::from_str(&provenance)?,
        donor_brand_id,
        source_url: row.get("source_url"),
        payload_hash: row.get("payload_hash"),
        updated_at,
    })
}

/// Write one record, replacing whatever the pair held before. Returns
/// `Unchanged` without touching the row when the stored payload hash,
/// quality, and provenance already match.
pub async fn upsert(pool: &SqlitePool, record: &MenuRecord) -> Result<UpsertOutcome> {
    let mut tx = pool.begin().await?;

    let existing: Option<(String, String, String)> = sqlx::query_as(
        "SELECT payload_hash, quality, provenance FROM menu_records \
         WHERE brand_id = ? AND source = ?",
    )
    .bind(record.brand_id.to_string())
    .bind(record.source.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((hash, quality, provenance)) = existing {
        if hash == record.payload_hash
            && quality == record.quality.as_str()
            && provenance == record.provenance.as_str()
        {
            tx.commit().await?;
            return Ok(UpsertOutcome::Unchanged);
        }
    }

    let categories = serde_json::to_string(&record.categories)?;
    sqlx::query(
        r#"
        INSERT INTO menu_records (brand_id, source, categories, item_count,
                                  price_coverage, image_coverage, quality, gate_reason,
                                  match_confidence, provenance, donor_brand_id,
                                  source_url, payload_hash, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(brand_id, source) DO UPDATE SET
            categories = excluded.categories,
            item_count = excluded.item_count,
            price_coverage = excluded.price_coverage,
            image_coverage = excluded.image_coverage,
            quality = excluded.quality,
            gate_reason = excluded.gate_reason,
            match_confidence = excluded.match_confidence,
            provenance = excluded.provenance,
            donor_brand_id = excluded.donor_brand_id,
            source_url = excluded.source_url,
            payload_hash = excluded.payload_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(record.brand_id.to_string())
    .bind(record.source.as_str())
    .bind(categories)
    .bind(record.item_count as i64)
    .bind(record.price_coverage)
    .bind(record.image_coverage)
    .bind(record.quality.as_str())
    .bind(record.gate_reason.as_str())
    .bind(record.match_confidence.as_str())
    .bind(record.provenance.as_str())
    .bind(record.donor_brand_id.map(|id| id.to_string()))
    .bind(&record.source_url)
    .bind(&record.payload_hash)
    .bind(record.updated_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(UpsertOutcome::Written)
}

pub async fn get_record(
    pool: &SqlitePool,
    brand_id: Uuid,
    source: SourceId,
) -> Result<Option<MenuRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM menu_records WHERE brand_id = ? AND source = ?",
        RECORD_COLUMNS
    ))
    .bind(brand_id.to_string())
    .bind(source.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_record).transpose()
}

pub async fn has_record(pool: &SqlitePool, brand_id: Uuid, source: SourceId) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM menu_records WHERE brand_id = ? AND source = ?")
            .bind(brand_id.to_string())
            .bind(source.as_str())
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

/// Best accepted item count per brand, for donor selection and registry
/// write-back. Brands with no accepted record are absent.
pub async fn accepted_item_counts(pool: &SqlitePool) -> Result<HashMap<Uuid, u32>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT brand_id, MAX(item_count) FROM menu_records \
         WHERE quality = 'accepted' GROUP BY brand_id",
    )
    .fetch_all(pool)
    .await?;

    let mut counts = HashMap::with_capacity(rows.len());
    for (brand_id, count) in rows {
        let brand_id = Uuid::parse_str(&brand_id)
            .map_err(|e| Error::Internal(format!("bad brand_id in menu_records: {}", e)))?;
        counts.insert(brand_id, count as u32);
    }
    Ok(counts)
}

/// The brand's largest accepted menu, the one donor propagation clones.
pub async fn best_accepted_record(
    pool: &SqlitePool,
    brand_id: Uuid,
) -> Result<Option<MenuRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM menu_records \
         WHERE brand_id = ? AND quality = 'accepted' \
         ORDER BY item_count DESC LIMIT 1",
        RECORD_COLUMNS
    ))
    .bind(brand_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_record).transpose()
}

/// One quarantined record as shown to the operator.
#[derive(Debug, Clone)]
pub struct QuarantineEntry {
    pub brand_id: Uuid,
    pub slug: String,
    pub canonical_name: String,
    pub source: SourceId,
    pub item_count: u32,
    pub price_coverage: f64,
    pub gate_reason: GateReason,
    pub updated_at: DateTime<Utc>,
}

/// All quarantined records with their brand identity, oldest first.
pub async fn quarantined(pool: &SqlitePool) -> Result<Vec<QuarantineEntry>> {
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
            let brand_id = Uuid::parse_str(&brand_id)
                .map_err(|e| Error::Internal(format!("bad brand_id in menu_records: {}", e)))?;
            let source: String = row.get("source");
            let gate_reason: String = row.get("gate_reason");
            let updated_at: String = row.get("updated_at");
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| Error::Internal(format!("bad updated_at: {}", e)))?
                .with_timezone(&Utc);
            Ok(QuarantineEntry {
                brand_id,
                slug: row.get("slug"),
                canonical_name: row.get("canonical_name"),
                source: SourceId::from_str(&source)?,
                item_count: row.get::<i64, _>("item_count") as u32,
                price_coverage: row.get("price_coverage"),
                gate_reason: GateReason::from_str(&gate_reason)?,
                updated_at,
            })
        })
        .collect()
}

/// Promote a quarantined record to accepted. Returns false when the pair
/// holds no quarantined record.
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

    // The pair's crawl state follows the record out of quarantine.
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

    tx.commit().await?;
    registry::refresh_accepted_counts(pool).await?;
    Ok(true)
}

/// Drop a quarantined record the operator judged to be garbage. The pair
/// goes to rejected so it is not re-scraped without force.
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
