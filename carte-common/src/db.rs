//! SQLite bootstrap shared by the ingest pipeline and review service

use std::path::Path;

use sqlx::SqlitePool;

use crate::Result;

/// Initialize database connection pool
///
/// Connects to carte.db in the data directory, creating the file and the
/// schema on first use. WAL keeps concurrent ledger writers from stalling
/// the review service's reads.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize pipeline tables
///
/// Creates brands, crawl_ledger, menu_records, and runs if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS brands (
            brand_id TEXT PRIMARY KEY,
            canonical_name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            known_urls TEXT NOT NULL DEFAULT '[]',
            locale_hint TEXT NOT NULL DEFAULT 'en-SG',
            accepted INTEGER NOT NULL DEFAULT 0,
            accepted_item_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Progress ledger: one row per (brand, source) pair, upserted by whichever
    // worker owns the pair at the time. Terminal rows survive across runs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_ledger (
            brand_id TEXT NOT NULL,
            source TEXT NOT NULL,
            state TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            note TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (brand_id, source)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS menu_records (
            brand_id TEXT NOT NULL,
            source TEXT NOT NULL,
            categories TEXT NOT NULL,
            item_count INTEGER NOT NULL,
            price_coverage REAL NOT NULL,
            image_coverage REAL NOT NULL,
            quality TEXT NOT NULL,
            gate_reason TEXT NOT NULL,
            match_confidence TEXT NOT NULL DEFAULT 'none',
            provenance TEXT NOT NULL,
            donor_brand_id TEXT,
            source_url TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (brand_id, source)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            summary TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_menu_records_quality ON menu_records(quality)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_crawl_ledger_state ON crawl_ledger(state)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (brands, crawl_ledger, menu_records, runs)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_creates_schema_and_is_rerunnable() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("carte.db");

        let pool = init_database_pool(&db_path).await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"brands"));
        assert!(names.contains(&"crawl_ledger"));
        assert!(names.contains(&"menu_records"));
        assert!(names.contains(&"runs"));
        pool.close().await;

        // Second bootstrap against the same file must not error
        let pool = init_database_pool(&db_path).await.unwrap();
        pool.close().await;
    }
}
