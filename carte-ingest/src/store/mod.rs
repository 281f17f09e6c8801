//! Persistence for brands, menu records, and run history
//!
//! All access goes through these functions; nothing else in the crate
//! writes SQL. The progress ledger has its own home in
//! `scheduler::ledger` since its lifecycle belongs to the scheduler.

pub mod menus;
pub mod registry;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use carte_common::model::RunSummary;
use carte_common::Result;

/// Append one finished run to the history table.
pub async fn record_run(
    pool: &SqlitePool,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    summary: &RunSummary,
) -> Result<()> {
    let summary_json = serde_json::to_string(summary)?;
    sqlx::query(
        r#"
        INSERT INTO runs (run_id, started_at, ended_at, summary)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(run_id.to_string())
    .bind(started_at.to_rfc3339())
    .bind(ended_at.to_rfc3339())
    .bind(summary_json)
    .execute(pool)
    .await?;
    Ok(())
}
