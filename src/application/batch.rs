//! Batch runner over the configured sites
//!
//! Sites are pulled from a shared queue by up to `max_concurrent_sessions`
//! workers. Each worker owns at most one page session, opened lazily from the
//! `SessionFactory` the first time it meets a live site, and never shares it.
//! Cancellation is checked between pages and threaded into every wait.

use chrono::Utc;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::price_pipeline::PricePipeline;
use crate::application::report::{BatchReport, PageOutcome};
use crate::infrastructure::browser::{PageSession, SessionFactory, pause};
use crate::infrastructure::config::{BatchConfig, ExtractionMode, SiteConfig};
use crate::infrastructure::parsing_error::PageError;

type SiteQueue = Mutex<VecDeque<(usize, SiteConfig)>>;

pub struct BatchRunner {
    pipeline: Arc<PricePipeline>,
    sessions: Option<Arc<dyn SessionFactory>>,
    config: BatchConfig,
}

impl BatchRunner {
    /// Without a session factory, live sites fail with a session error.
    pub fn new(pipeline: Arc<PricePipeline>, sessions: Option<Arc<dyn SessionFactory>>, config: BatchConfig) -> Self {
        Self {
            pipeline,
            sessions,
            config,
        }
    }

    /// Process `sites` and report outcomes in input order. Pages not started
    /// before cancellation are left out of the report.
    pub async fn run(&self, sites: Vec<SiteConfig>, cancel: &CancellationToken) -> BatchReport {
        let started_at = Utc::now();
        let total = sites.len();
        let workers = self.config.max_concurrent_sessions.clamp(1, total.max(1));
        info!("Starting batch of {} page(s) with {} worker(s)", total, workers);

        let queue: SiteQueue = Mutex::new(sites.into_iter().enumerate().collect());
        let per_worker = join_all((0..workers).map(|id| self.worker(id, &queue, cancel))).await;

        let mut indexed: Vec<(usize, PageOutcome)> = per_worker.into_iter().flatten().collect();
        indexed.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<PageOutcome> = indexed.into_iter().map(|(_, outcome)| outcome).collect();

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("Batch cancelled after {} of {} page(s)", outcomes.len(), total);
        }
        let report = BatchReport::new(started_at, outcomes, cancelled);
        info!(
            "Batch finished: {} succeeded, {} failed",
            report.summary.succeeded, report.summary.failed
        );
        report
    }

    async fn worker(&self, id: usize, queue: &SiteQueue, cancel: &CancellationToken) -> Vec<(usize, PageOutcome)> {
        let mut session: Option<Box<dyn PageSession>> = None;
        let mut results = Vec::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if !results.is_empty() && !pause(self.polite_delay(), cancel).await {
                break;
            }
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some((index, site)) = next else {
                break;
            };
            debug!("Worker {} took page {} ({})", id, index, site.name);

            let outcome = match site.mode {
                ExtractionMode::Static => self.pipeline.process_static(&site, cancel).await,
                ExtractionMode::Live => {
                    if session.is_none() {
                        match self.open_session().await {
                            Ok(opened) => session = Some(opened),
                            Err(e) => {
                                warn!("Worker {} could not open a session: {}", id, e);
                                results.push((index, PageOutcome::new(&site, ExtractionMode::Live).with_error(e.to_string())));
                                continue;
                            }
                        }
                    }
                    self.pipeline.process(&site, session.as_deref(), cancel).await
                }
            };
            results.push((index, outcome));
        }

        debug!("Worker {} done after {} page(s)", id, results.len());
        results
    }

    async fn open_session(&self) -> Result<Box<dyn PageSession>, PageError> {
        let factory = self.sessions.as_ref().ok_or_else(|| PageError::SessionUnavailable {
            reason: "no session factory configured".to_string(),
        })?;
        factory.open().await.map_err(|e| PageError::SessionUnavailable { reason: e.to_string() })
    }

    /// Base delay plus random jitter
    fn polite_delay(&self) -> Duration {
        let jitter = if self.config.page_delay_jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.config.page_delay_jitter_ms)
        };
        Duration::from_millis(self.config.page_delay_ms + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::AppConfig;
    use crate::test_utils::{ScriptedFactory, ScriptedFetcher, ScriptedSession};
    use tokio::time::Instant;

    const PAGE: &str = r#"<html><body><p class="price">R$ 49,90</p></body></html>"#;

    fn runner(factory: Option<Arc<dyn SessionFactory>>, concurrency: usize) -> BatchRunner {
        let config = AppConfig::default();
        let pipeline = PricePipeline::new(&config, Arc::new(ScriptedFetcher::repeating(PAGE))).unwrap();
        let batch = BatchConfig {
            max_concurrent_sessions: concurrency,
            page_delay_ms: 1_000,
            page_delay_jitter_ms: 0,
            report_path: None,
        };
        BatchRunner::new(Arc::new(pipeline), factory, batch)
    }

    fn sites(n: usize, mode: ExtractionMode) -> Vec<SiteConfig> {
        (0..n)
            .map(|i| SiteConfig::new(format!("site-{i}"), format!("https://shop.example.com/p/{i}")).with_mode(mode))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_static_batch_keeps_order() {
        let started = Instant::now();
        let report = runner(None, 1).run(sites(3, ExtractionMode::Static), &CancellationToken::new()).await;

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 3);
        let names: Vec<_> = report.outcomes.iter().map(|o| o.site_name.as_str()).collect();
        assert_eq!(names, vec!["site-0", "site-1", "site-2"]);
        // Two polite delays between three pages
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_worker_opens_its_own_session() {
        let factory = Arc::new(ScriptedFactory::new(|| ScriptedSession::single(&[("R$ 10,00", "R$ 10,00")])));
        let report = runner(Some(factory.clone()), 2)
            .run(sites(4, ExtractionMode::Live), &CancellationToken::new())
            .await;

        assert_eq!(report.summary.succeeded, 4);
        assert_eq!(factory.opened(), 2);
        assert!(report.outcomes.iter().all(|o| o.extraction.as_ref().is_some_and(|e| e.found())));
    }

    #[tokio::test]
    async fn test_live_sites_without_factory_fail_individually() {
        let report = runner(None, 1).run(sites(2, ExtractionMode::Live), &CancellationToken::new()).await;
        assert_eq!(report.summary.failed, 2);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("no session factory"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_between_pages() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let report = runner(None, 1).run(sites(5, ExtractionMode::Static), &cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = runner(None, 4).run(Vec::new(), &CancellationToken::new()).await;
        assert_eq!(report.summary.total, 0);
        assert!(!report.cancelled);
    }
}
