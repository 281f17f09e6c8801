//! Per-source politeness controls
//!
//! Every marketplace call goes through two gates: a rate limiter spacing
//! calls at least `min_delay_ms` apart, and a semaphore capping how many
//! calls to one source are in flight at once. Both are keyed by source so
//! a slow foodpanda never throttles grabfood.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use carte_common::config::CarteConfig;
use carte_common::model::SourceId;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct SourcePacer {
    limiters: HashMap<SourceId, DirectLimiter>,
    gates: HashMap<SourceId, Arc<Semaphore>>,
}

fn delay_quota(min_delay_ms: u64) -> Option<Quota> {
    if min_delay_ms == 0 {
        return None;
    }
    Quota::with_period(Duration::from_millis(min_delay_ms))
        .map(|q| q.allow_burst(NonZeroU32::new(1).unwrap_or(NonZeroU32::MIN)))
}

impl SourcePacer {
    pub fn new(config: &CarteConfig) -> Self {
        let mut limiters = HashMap::new();
        let mut gates = HashMap::new();
        let slots = config.scheduler.per_source_in_flight.max(1);
        for id in SourceId::ALL {
            if let Some(quota) = delay_quota(config.source(id).min_delay_ms) {
                limiters.insert(id, RateLimiter::direct(quota));
            }
            gates.insert(id, Arc::new(Semaphore::new(slots)));
        }
        Self { limiters, gates }
    }

    /// Wait until the source's minimum inter-call delay allows another call.
    pub async fn pace(&self, source: SourceId) {
        if let Some(limiter) = self.limiters.get(&source) {
            limiter.until_ready().await;
        }
    }

    /// Claim an in-flight slot for the source, waiting if it is saturated.
    /// The slot is released when the returned permit is dropped.
    pub async fn acquire_slot(&self, source: SourceId) -> Option<OwnedSemaphorePermit> {
        let gate = self.gates.get(&source)?.clone();
        gate.acquire_owned().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn config_with_delay(ms: u64) -> CarteConfig {
        let mut config = CarteConfig::default();
        config.sources.grabfood.min_delay_ms = ms;
        config
    }

    #[tokio::test]
    async fn zero_delay_never_waits() {
        let pacer = SourcePacer::new(&config_with_delay(0));
        let start = Instant::now();
        for _ in 0..5 {
            pacer.pace(SourceId::Grabfood).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn consecutive_calls_are_spaced() {
        let pacer = SourcePacer::new(&config_with_delay(30));
        let start = Instant::now();
        pacer.pace(SourceId::Grabfood).await;
        pacer.pace(SourceId::Grabfood).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn sources_are_paced_independently() {
        let mut config = config_with_delay(5_000);
        config.sources.foodpanda.min_delay_ms = 0;
        let pacer = SourcePacer::new(&config);
        pacer.pace(SourceId::Grabfood).await;
        let start = Instant::now();
        pacer.pace(SourceId::Foodpanda).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn in_flight_slots_are_bounded_per_source() {
        let mut config = CarteConfig::default();
        config.scheduler.per_source_in_flight = 1;
        let pacer = SourcePacer::new(&config);

        let held = pacer.acquire_slot(SourceId::Grabfood).await.unwrap();

        // the only slot is taken
        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            pacer.acquire_slot(SourceId::Grabfood),
        )
        .await;
        assert!(blocked.is_err());

        // another source is unaffected
        assert!(pacer.acquire_slot(SourceId::Foodpanda).await.is_some());

        drop(held);
        assert!(pacer.acquire_slot(SourceId::Grabfood).await.is_some());
    }
}
