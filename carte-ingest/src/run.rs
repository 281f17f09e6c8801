//! One end-to-end ingest run
//!
//! Wires adapters, scheduler, and propagation together: recover anything a
//! crashed run left in flight, crawl the selected brands, then run the donor
//! propagation barrier once every scheduled pair has settled.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use carte_common::config::CarteConfig;
use carte_common::model::{BrandTarget, RunSummary, SourceId};
use carte_common::{Error, Result};

use crate::propagation::Propagator;
use crate::scheduler::pacing::SourcePacer;
use crate::scheduler::{PassOptions, Scheduler};
use crate::sources::brand_site::BrandSiteAdapter;
use crate::sources::foodpanda::FoodpandaAdapter;
use crate::sources::grabfood::GrabfoodAdapter;
use crate::sources::render::build_renderer;
use crate::sources::vision::VisionAdapter;
use crate::sources::SourceAdapter;
use crate::store::{self, registry};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Crawl a single brand instead of the backlog
    pub slug: Option<String>,
    /// Cap on brands given new work this run
    pub limit: Option<usize>,
    /// Plan and fetch but write nothing
    pub dry_run: bool,
    /// Re-scrape pairs that already settled
    pub force: bool,
    /// Restrict the run to one source
    pub only_source: Option<SourceId>,
}

fn build_adapters(
    config: &CarteConfig,
    pacer: &Arc<SourcePacer>,
    only_source: Option<SourceId>,
) -> Result<HashMap<SourceId, Arc<dyn SourceAdapter>>> {
    let renderer = build_renderer(&config.render)?;
    let mut adapters: HashMap<SourceId, Arc<dyn SourceAdapter>> = HashMap::new();
    for id in config.enabled_sources() {
        if only_source.is_some_and(|only| only != id) {
            continue;
        }
        let adapter: Arc<dyn SourceAdapter> = match id {
            SourceId::Grabfood => Arc::new(GrabfoodAdapter::new(
                config.source(id),
                renderer.clone(),
                pacer.clone(),
            )?),
            SourceId::Foodpanda => Arc::new(FoodpandaAdapter::new(
                config.source(id),
                renderer.clone(),
                pacer.clone(),
            )?),
            SourceId::BrandSite => Arc::new(BrandSiteAdapter::new(
                config.source(id),
                renderer.clone(),
                pacer.clone(),
            )?),
            SourceId::Vision => Arc::new(VisionAdapter::new(
                config.source(id),
                &config.vision,
                pacer.clone(),
            )?),
        };
        adapters.insert(id, adapter);
    }
    if adapters.is_empty() {
        return Err(Error::Config(match only_source {
            Some(source) => format!("source {} is disabled in the configuration", source),
            None => "no sources are enabled in the configuration".into(),
        }));
    }
    Ok(adapters)
}

async fn select_brands(pool: &SqlitePool, slug: Option<&str>) -> Result<Vec<BrandTarget>> {
    match slug {
        Some(slug) => {
            let brand = registry::brand_by_slug(pool, slug)
                .await?
                .ok_or_else(|| Error::NotFound(format!("no brand with slug '{}'", slug)))?;
            Ok(vec![brand])
        }
        None => registry::all_brands(pool).await,
    }
}

/// Run the acquisition pipeline once and return its summary.
pub async fn execute(
    config: &CarteConfig,
    pool: &SqlitePool,
    options: RunOptions,
) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(run_id = %run_id, dry_run = options.dry_run, "starting ingest run");

    let pacer = Arc::new(SourcePacer::new(config));
    let adapters = build_adapters(config, &pacer, options.only_source)?;
    let brands = select_brands(pool, options.slug.as_deref()).await?;
    info!(brands = brands.len(), sources = adapters.len(), "run scope resolved");

    let scheduler = Scheduler::new(pool.clone(), config.clone(), adapters, pacer)?;

    if !options.dry_run {
        let recovered = scheduler.ledger().recover_interrupted().await?;
        if recovered > 0 {
            warn!(pairs = recovered, "recovered pairs left in flight by an earlier run");
        }
        if options.force {
            // Reset only the pairs this run can re-crawl; a --source run
            // must leave the other sources' settled state alone.
            let sources = scheduler.active_sources();
            for brand in &brands {
                for &source in &sources {
                    scheduler.ledger().reset_pair(brand.brand_id, source).await?;
                }
            }
        }
    }

    // Ctrl-C stops new pairs; pairs already in flight run to completion.
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, letting in-flight calls finish");
                cancel.cancel();
            }
        })
    };

    let pass = PassOptions {
        force: options.force,
        dry_run: options.dry_run,
        limit: options.limit,
    };
    let mut summary = scheduler.run_pass(&brands, &pass, &cancel).await?;
    watcher.abort();

    // Donor groups depend on every sibling's final classification, so
    // propagation requires a full, uncancelled pass over the whole registry.
    if cancel.is_cancelled() {
        warn!("skipping donor propagation, run was cancelled mid-pass");
    } else if options.slug.is_some() {
        info!("single-brand run, skipping donor propagation");
    } else {
        let propagator = Propagator::new(&config.propagation);
        let outcome = propagator
            .run(pool, scheduler.gate(), &brands, options.dry_run)
            .await?;
        summary.donor_copies = outcome.copies;
        summary.oversized_groups = outcome.oversized_groups;
    }

    if !options.dry_run {
        registry::refresh_accepted_counts(pool).await?;
        store::record_run(pool, run_id, started_at, Utc::now(), &summary).await?;
    }

    print_summary(&summary, options.dry_run);
    info!(run_id = %run_id, "ingest run finished");
    Ok(summary)
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!();
    if dry_run {
        println!("Run summary (dry run, nothing persisted)");
    } else {
        println!("Run summary");
    }
    println!("  pairs dispatched:   {}", summary.scheduled);
    println!("  accepted:           {}", summary.accepted);
    println!("  quarantined:        {}", summary.quarantined);
    println!("  rejected:           {}", summary.rejected);
    println!("  no match:           {}", summary.no_match);
    println!("  failed:             {}", summary.failed);
    println!("  skipped (settled):  {}", summary.skipped_terminal);
    println!("  unchanged payloads: {}", summary.skipped_unchanged);
    println!("  donor copies:       {}", summary.donor_copies);
    if summary.oversized_groups > 0 {
        println!("  oversized groups:   {}", summary.oversized_groups);
    }
    if !summary.parse_failures.is_empty() {
        println!("  parse failures (adapter may need updating):");
        for (source, count) in &summary.parse_failures {
            println!("    {}: {}", source, count);
        }
    }
    println!();
}
