// ============================================================================
// exporter.rs
// ============================================================================
//! Collection orchestrator.
//!
//! The `Exporter` is invoked once per pull. It scrapes every configured
//! target concurrently, waits for the results in configuration order, and
//! hands back the merged metric families. A collection never fails as a
//! whole: every per-target problem ends at the target boundary.

use std::sync::Arc;

use tokio::{sync::Semaphore, time::Instant};
use tracing::{debug, error};

use super::{
    model::MetricFamily,
    scrape::{aggregate::Aggregator, error::ScrapeError, targets::TargetRegistry},
    transport::Transport,
};
use crate::config::phpfpm::PhpFpmConfig;

/// Scrapes a fixed [`TargetRegistry`] through one [`Transport`].
///
/// Cheap to share behind an `Arc`: `collect` takes `&self` and keeps no
/// state between cycles.
pub struct Exporter {
    transport: Arc<dyn Transport>,
    registry: Arc<TargetRegistry>,
    limiter: Option<Arc<Semaphore>>,
}

impl Exporter {
    /// Creates a new Exporter.
    ///
    /// # Arguments
    /// * `transport` - Transport used for every request
    /// * `registry` - Targets to scrape on each collection
    /// * `max_concurrent` - Upper bound on in-flight scrapes, `0` for no limit
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: TargetRegistry,
        max_concurrent: usize,
    ) -> Self {
        let limiter = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self {
            transport,
            registry: Arc::new(registry),
            limiter,
        }
    }

    /// Builds the registry from `config` and applies its concurrency limit.
    pub fn from_config(transport: Arc<dyn Transport>, config: &PhpFpmConfig) -> Self {
        Self::new(
            transport,
            TargetRegistry::from_config(config),
            config.max_concurrent_scrapes,
        )
    }

    /// Targets scraped on every cycle, in configuration order.
    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Runs one collection cycle.
    ///
    /// Returns `php_fpm_up` first, then the status families, then script
    /// families in the order they were first seen. Empty families are left out.
    pub async fn collect(&self) -> Vec<MetricFamily> {
        let start = Instant::now();

        // Spawn one task per target
        let tasks: Vec<_> = self
            .registry
            .targets()
            .iter()
            .cloned()
            .map(|target| {
                let transport = self.transport.clone();
                let limiter = self.limiter.clone();
                tokio::spawn(async move {
                    let _permit = match limiter {
                        Some(limiter) => limiter.acquire_owned().await.ok(),
                        None => None,
                    };
                    target.scrape(transport.as_ref()).await
                })
            })
            .collect();

        let mut aggregator = Aggregator::new();
        for (target, task) in self.registry.targets().iter().zip(tasks) {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Scrape task for {} did not complete: {}", target, e);
                    Err(ScrapeError::Task(e.to_string()))
                }
            };
            aggregator.record(target, result);
        }

        debug!(
            targets = self.registry.len(),
            succeeded = aggregator.succeeded(),
            failed = aggregator.failed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Collection cycle finished"
        );
        aggregator.finish()
    }
}
