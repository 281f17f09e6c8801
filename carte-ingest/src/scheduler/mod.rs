//! Crawl scheduling and the per-pair pipeline
//!
//! A run plans (brand, source) pairs from the ledger, dispatches them to a
//! bounded worker pool, and drives each pair through fetch, match, normalize,
//! and gate. Pair failures are isolated: one source timing out or one page
//! shape changing never aborts the rest of the run.

pub mod ledger;
pub mod pacing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use carte_common::config::CarteConfig;
use carte_common::model::{BrandTarget, PairState, QualityStatus, RunSummary, SourceId};
use carte_common::Result;

use crate::matcher;
use crate::normalizer::Normalizer;
use crate::quality::QualityGate;
use crate::sources::{FetchError, SourceAdapter};
use crate::store::menus::{self, UpsertOutcome};

use ledger::{should_dispatch, CrawlLedger, Dispatch};
use pacing::SourcePacer;

/// One (brand, source) pair scheduled for this run.
#[derive(Debug, Clone)]
struct WorkItem {
    brand: BrandTarget,
    source: SourceId,
}

/// How one dispatched pair ended.
enum PairOutcome {
    Accepted { unchanged: bool },
    Quarantined { unchanged: bool },
    Rejected,
    NoMatch,
    Failed { source: SourceId, structural: bool },
    /// Run was cancelled before this pair started
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    pub force: bool,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

pub struct Scheduler {
    pool: SqlitePool,
    config: CarteConfig,
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
    pacer: Arc<SourcePacer>,
    ledger: CrawlLedger,
    normalizer: Normalizer,
    gate: QualityGate,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        config: CarteConfig,
        adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
        pacer: Arc<SourcePacer>,
    ) -> Result<Self> {
        let ledger = CrawlLedger::new(pool.clone());
        let normalizer = Normalizer::new()?;
        let gate = QualityGate::new(&config.quality)?;
        Ok(Self {
            pool,
            config,
            adapters,
            pacer,
            ledger,
            normalizer,
            gate,
        })
    }

    pub fn ledger(&self) -> &CrawlLedger {
        &self.ledger
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Sources this scheduler can dispatch, in fixed registry order.
    pub fn active_sources(&self) -> Vec<SourceId> {
        SourceId::ALL
            .into_iter()
            .filter(|id| self.adapters.contains_key(id))
            .collect()
    }

    /// Plan the pairs to dispatch. Terminal pairs and exhausted failures are
    /// skipped unless forced; `limit` caps how many brands get new work.
    async fn plan(
        &self,
        brands: &[BrandTarget],
        options: &PassOptions,
        summary: &mut RunSummary,
    ) -> Result<Vec<WorkItem>> {
        let states = self.ledger.load_all().await?;
        let sources = self.active_sources();
        let max_attempts = self.config.scheduler.max_attempts;

        let mut items = Vec::new();
        let mut brands_taken = 0usize;
        for brand in brands {
            if let Some(limit) = options.limit {
                if brands_taken >= limit {
                    break;
                }
            }
            let mut brand_items = Vec::new();
            for &source in &sources {
                // these two sources work off the brand's own pages
                if matches!(source, SourceId::BrandSite | SourceId::Vision)
                    && brand.known_urls.is_empty()
                {
                    debug!(brand = %brand.slug, source = %source, "no known urls, skipping source");
                    continue;
                }
                let entry = states.get(&(brand.brand_id, source));
                match should_dispatch(entry, max_attempts, options.force) {
                    Dispatch::Go => brand_items.push(WorkItem {
                        brand: brand.clone(),
                        source,
                    }),
                    Dispatch::SkipTerminal => summary.skipped_terminal += 1,
                    Dispatch::SkipExhausted => {
                        debug!(brand = %brand.slug, source = %source, "attempts exhausted, skipping");
                    }
                }
            }
            if !brand_items.is_empty() {
                brands_taken += 1;
                items.extend(brand_items);
            }
        }
        Ok(items)
    }

    /// Run one acquisition pass over the given brands. Cancellation stops new
    /// pairs from starting; pairs already in flight run to completion.
    pub async fn run_pass(
        &self,
        brands: &[BrandTarget],
        options: &PassOptions,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let items = self.plan(brands, options, &mut summary).await?;
        info!(
            pairs = items.len(),
            brands = brands.len(),
            dry_run = options.dry_run,
            "acquisition pass planned"
        );

        let dry_run = options.dry_run;
        let results: Vec<(WorkItem, Result<PairOutcome>)> =
            stream::iter(items.into_iter().map(|item| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (item, Ok(PairOutcome::Cancelled));
                    }
                    let outcome = self.process_pair(&item, dry_run).await;
                    (item, outcome)
                }
            }))
            .buffer_unordered(self.config.scheduler.max_in_flight)
            .collect()
            .await;

        if cancel.is_cancelled() {
            info!("acquisition pass cancelled; in-flight pairs were allowed to finish");
        }

        for (item, result) in results {
            match result {
                Ok(PairOutcome::Cancelled) => {}
                Ok(outcome) => {
                    summary.scheduled += 1;
                    match outcome {
                        PairOutcome::Accepted { unchanged } => {
                            summary.accepted += 1;
                            if unchanged {
                                summary.skipped_unchanged += 1;
                            }
                        }
                        PairOutcome::Quarantined { unchanged } => {
                            summary.quarantined += 1;
                            if unchanged {
                                summary.skipped_unchanged += 1;
                            }
                        }
                        PairOutcome::Rejected => summary.rejected += 1,
                        PairOutcome::NoMatch => summary.no_match += 1,
                        PairOutcome::Failed { source, structural } => {
                            summary.failed += 1;
                            if structural {
                                summary.note_parse_failure(source);
                            }
                        }
                        PairOutcome::Cancelled => {}
                    }
                }
                Err(e) => {
                    summary.scheduled += 1;
                    summary.failed += 1;
                    error!(
                        brand = %item.brand.slug,
                        source = %item.source,
                        error = %e,
                        "pair processing failed"
                    );
                }
            }
        }
        Ok(summary)
    }

    async fn process_pair(&self, item: &WorkItem, dry_run: bool) -> Result<PairOutcome> {
        // cap concurrent calls per source; the permit rides the whole pair
        let _slot = self.pacer.acquire_slot(item.source).await;

        if !dry_run {
            self.ledger.begin_attempt(item.brand.brand_id, item.source).await?;
        }

        let adapter = self.adapters.get(&item.source).ok_or_else(|| {
            carte_common::Error::Internal(format!("no adapter registered for {}", item.source))
        })?;

        let budget = Duration::from_millis(self.config.scheduler.call_timeout_ms);
        let fetched = match tokio::time::timeout(budget, adapter.fetch_candidates(&item.brand)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        let candidates = match fetched {
            Ok(candidates) => candidates,
            Err(e) => {
                let structural = !e.is_transient();
                warn!(
                    brand = %item.brand.slug,
                    source = %item.source,
                    error = %e,
                    structural,
                    "source call failed"
                );
                if !dry_run {
                    self.ledger
                        .set_state(
                            item.brand.brand_id,
                            item.source,
                            PairState::Failed,
                            Some(&e.to_string()),
                        )
                        .await?;
                }
                return Ok(PairOutcome::Failed {
                    source: item.source,
                    structural,
                });
            }
        };

        if candidates.is_empty() {
            debug!(brand = %item.brand.slug, source = %item.source, "source returned no listings");
            if !dry_run {
                self.ledger
                    .set_state(
                        item.brand.brand_id,
                        item.source,
                        PairState::Rejected,
                        Some("no listings returned"),
                    )
                    .await?;
            }
            return Ok(PairOutcome::NoMatch);
        }

        let candidate_count = candidates.len();
        let Some(matched) = matcher::select_best(&item.brand, candidates) else {
            info!(
                brand = %item.brand.slug,
                source = %item.source,
                candidates = candidate_count,
                "no candidate matched the brand"
            );
            if !dry_run {
                self.ledger
                    .set_state(
                        item.brand.brand_id,
                        item.source,
                        PairState::Rejected,
                        Some("no candidate matched"),
                    )
                    .await?;
            }
            return Ok(PairOutcome::NoMatch);
        };

        let menu = self.normalizer.normalize(&matched.candidate)?;
        let (quality, gate_reason) = self.gate.classify(&menu);
        let record = menu.into_record(
            item.brand.brand_id,
            item.source,
            matched.confidence,
            quality,
            gate_reason,
        );

        match record.quality {
            QualityStatus::Accepted | QualityStatus::Quarantined => {
                let accepted = record.quality == QualityStatus::Accepted;
                let unchanged = if dry_run {
                    info!(
                        brand = %item.brand.slug,
                        source = %item.source,
                        items = record.item_count,
                        price_coverage = format!("{:.2}", record.price_coverage),
                        quality = record.quality.as_str(),
                        "dry run, not persisting"
                    );
                    false
                } else {
                    let outcome = menus::upsert(&self.pool, &record).await?;
                    self.ledger
                        .set_state(
                            item.brand.brand_id,
                            item.source,
                            if accepted { PairState::Accepted } else { PairState::Quarantined },
                            Some(record.gate_reason.as_str()),
                        )
                        .await?;
                    outcome == UpsertOutcome::Unchanged
                };
                if accepted {
                    Ok(PairOutcome::Accepted { unchanged })
                } else {
                    warn!(
                        brand = %item.brand.slug,
                        source = %item.source,
                        items = record.item_count,
                        price_coverage = format!("{:.2}", record.price_coverage),
                        "menu quarantined for review"
                    );
                    Ok(PairOutcome::Quarantined { unchanged })
                }
            }
            QualityStatus::Rejected => {
                // garbage extractions are not stored, only noted in the ledger
                info!(
                    brand = %item.brand.slug,
                    source = %item.source,
                    reason = record.gate_reason.as_str(),
                    "menu rejected by quality gate"
                );
                if !dry_run {
                    self.ledger
                        .set_state(
                            item.brand.brand_id,
                            item.source,
                            PairState::Rejected,
                            Some(record.gate_reason.as_str()),
                        )
                        .await?;
                }
                Ok(PairOutcome::Rejected)
            }
        }
    }
}
