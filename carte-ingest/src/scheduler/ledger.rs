//! Resumable crawl ledger
//!
//! One row per (brand, source) pair records where that pair got to, so an
//! interrupted backlog run picks up where it stopped instead of re-crawling
//! everything. States follow `PairState`; `attempts` only ever grows until
//! a forced reset.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use carte_common::model::{PairState, SourceId};
use carte_common::{Error, Result};

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub brand_id: Uuid,
    pub source: SourceId,
    pub state: PairState,
    pub attempts: u32,
    pub note: Option<String>,
}

/// Planner verdict for one (brand, source) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Go,
    /// Already accepted, quarantined, or rejected
    SkipTerminal,
    /// Failed too many times; waits for a forced re-scrape
    SkipExhausted,
}

/// Decide whether a pair should be crawled this run.
pub fn should_dispatch(entry: Option<&LedgerEntry>, max_attempts: u32, force: bool) -> Dispatch {
    let Some(entry) = entry else {
        return Dispatch::Go;
    };
    if force {
        return Dispatch::Go;
    }
    match entry.state {
        PairState::Pending => Dispatch::Go,
        // in_flight rows only survive a crash; recovery turns them into
        // failed before planning, so treat both as retryable here
        PairState::InFlight | PairState::Failed => {
            if entry.attempts >= max_attempts {
                Dispatch::SkipExhausted
            } else {
                Dispatch::Go
            }
        }
        _ => Dispatch::SkipTerminal,
    }
}

#[derive(Clone)]
pub struct CrawlLedger {
    pool: SqlitePool,
}

impl CrawlLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LedgerEntry> {
        let brand_id: String = row.get("brand_id");
        let brand_id = Uuid::parse_str(&brand_id)
            .map_err(|e| Error::Internal(format!("bad brand_id in crawl_ledger: {}", e)))?;
        let source: String = row.get("source");
        let state: String = row.get("state");
        Ok(LedgerEntry {
            brand_id,
            source: SourceId::from_str(&source)?,
            state: PairState::from_str(&state)?,
            attempts: row.get::<i64, _>("attempts") as u32,
            note: row.get("note"),
        })
    }

    pub async fn get(&self, brand_id: Uuid, source: SourceId) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            "SELECT brand_id, source, state, attempts, note FROM crawl_ledger \
             WHERE brand_id = ? AND source = ?",
        )
        .bind(brand_id.to_string())
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// The whole ledger in one read, for planning a run without a query per pair.
    pub async fn load_all(&self) -> Result<HashMap<(Uuid, SourceId), LedgerEntry>> {
        let rows = sqlx::query("SELECT brand_id, source, state, attempts, note FROM crawl_ledger")
            .fetch_all(&self.pool)
            .await?;
        let mut entries = HashMap::with_capacity(rows.len());
        for row in &rows {
            let entry = Self::row_to_entry(row)?;
            entries.insert((entry.brand_id, entry.source), entry);
        }
        Ok(entries)
    }

    /// Mark a pair in flight and count the attempt. First touch inserts the row.
    pub async fn begin_attempt(&self, brand_id: Uuid, source: SourceId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_ledger (brand_id, source, state, attempts, note, updated_at)
            VALUES (?, ?, 'in_flight', 1, NULL, ?)
            ON CONFLICT(brand_id, source) DO UPDATE SET
                state = 'in_flight',
                attempts = crawl_ledger.attempts + 1,
                note = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(brand_id.to_string())
        .bind(source.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Settle a pair into a new state, keeping its attempt count.
    pub async fn set_state(
        &self,
        brand_id: Uuid,
        source: SourceId,
        state: PairState,
        note: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_ledger (brand_id, source, state, attempts, note, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            ON CONFLICT(brand_id, source) DO UPDATE SET
                state = excluded.state,
                note = excluded.note,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(brand_id.to_string())
        .bind(source.as_str())
        .bind(state.as_str())
        .bind(note)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Turn rows a crashed run left in flight into retryable failures.
    /// Returns how many pairs were recovered.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let recovered = sqlx::query(
            "UPDATE crawl_ledger SET state = 'failed', note = 'interrupted', updated_at = ? \
             WHERE state = 'in_flight'",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(recovered)
    }

    /// Forced re-scrape: put the pair back to pending with a fresh attempt budget.
    pub async fn reset_pair(&self, brand_id: Uuid, source: SourceId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_ledger (brand_id, source, state, attempts, note, updated_at)
            VALUES (?, ?, 'pending', 0, NULL, ?)
            ON CONFLICT(brand_id, source) DO UPDATE SET
                state = 'pending',
                attempts = 0,
                note = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(brand_id.to_string())
        .bind(source.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carte_common::db::init_database_pool;

    fn entry(state: PairState, attempts: u32) -> LedgerEntry {
        LedgerEntry {
            brand_id: Uuid::new_v4(),
            source: SourceId::Grabfood,
            state,
            attempts,
            note: None,
        }
    }

    #[test]
    fn dispatch_covers_the_state_table() {
        assert_eq!(should_dispatch(None, 3, false), Dispatch::Go);
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Pending, 0)), 3, false),
            Dispatch::Go
        );
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Failed, 1)), 3, false),
            Dispatch::Go
        );
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Failed, 3)), 3, false),
            Dispatch::SkipExhausted
        );
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Accepted, 1)), 3, false),
            Dispatch::SkipTerminal
        );
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Quarantined, 1)), 3, false),
            Dispatch::SkipTerminal
        );
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Rejected, 1)), 3, false),
            Dispatch::SkipTerminal
        );
    }

    #[test]
    fn force_overrides_every_skip() {
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Accepted, 1)), 3, true),
            Dispatch::Go
        );
        assert_eq!(
            should_dispatch(Some(&entry(PairState::Failed, 9)), 3, true),
            Dispatch::Go
        );
    }

    async fn test_ledger() -> (tempfile::TempDir, CrawlLedger) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("carte.db")).await.unwrap();
        (dir, CrawlLedger::new(pool))
    }

    #[tokio::test]
    async fn attempts_accumulate_across_runs() {
        let (_dir, ledger) = test_ledger().await;
        let brand_id = Uuid::new_v4();

        ledger.begin_attempt(brand_id, SourceId::Grabfood).await.unwrap();
        let e = ledger.get(brand_id, SourceId::Grabfood).await.unwrap().unwrap();
        assert_eq!(e.state, PairState::InFlight);
        assert_eq!(e.attempts, 1);

        ledger
            .set_state(brand_id, SourceId::Grabfood, PairState::Failed, Some("timeout"))
            .await
            .unwrap();
        let e = ledger.get(brand_id, SourceId::Grabfood).await.unwrap().unwrap();
        assert_eq!(e.state, PairState::Failed);
        assert_eq!(e.attempts, 1);
        assert_eq!(e.note.as_deref(), Some("timeout"));

        // retry bumps the counter and clears the old note
        ledger.begin_attempt(brand_id, SourceId::Grabfood).await.unwrap();
        let e = ledger.get(brand_id, SourceId::Grabfood).await.unwrap().unwrap();
        assert_eq!(e.attempts, 2);
        assert_eq!(e.note, None);
    }

    #[tokio::test]
    async fn interrupted_pairs_become_retryable_failures() {
        let (_dir, ledger) = test_ledger().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        ledger.begin_attempt(a, SourceId::Grabfood).await.unwrap();
        ledger.begin_attempt(b, SourceId::Foodpanda).await.unwrap();
        ledger
            .set_state(b, SourceId::Foodpanda, PairState::Accepted, None)
            .await
            .unwrap();

        assert_eq!(ledger.recover_interrupted().await.unwrap(), 1);
        let e = ledger.get(a, SourceId::Grabfood).await.unwrap().unwrap();
        assert_eq!(e.state, PairState::Failed);
        assert_eq!(e.note.as_deref(), Some("interrupted"));
        // settled pairs are untouched
        let e = ledger.get(b, SourceId::Foodpanda).await.unwrap().unwrap();
        assert_eq!(e.state, PairState::Accepted);
    }

    #[tokio::test]
    async fn reset_clears_attempts_and_loads_back() {
        let (_dir, ledger) = test_ledger().await;
        let brand_id = Uuid::new_v4();

        ledger.begin_attempt(brand_id, SourceId::Vision).await.unwrap();
        ledger.begin_attempt(brand_id, SourceId::Vision).await.unwrap();
        ledger.reset_pair(brand_id, SourceId::Vision).await.unwrap();

        let all = ledger.load_all().await.unwrap();
        let e = all.get(&(brand_id, SourceId::Vision)).unwrap();
        assert_eq!(e.state, PairState::Pending);
        assert_eq!(e.attempts, 0);
    }
}
