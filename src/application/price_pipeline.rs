//! Per-page price pipeline
//!
//! Live path: navigate, stabilize, capture diagnostics, watch the container
//! (or the configured price element), then resolve over the page source.
//! Static path: fetch, resolve, and refetch once when the first document
//! looks stale.
//!
//! Only page-fatal conditions end up in `PageOutcome::error`; everything
//! else is absorbed and logged.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::report::PageOutcome;
use crate::domain::price::{ExtractionResult, ExtractionSnapshot, ResolvedPrice, SourceFindings};
use crate::infrastructure::browser::{PageSession, pause};
use crate::infrastructure::config::{AppConfig, ExtractionMode, PipelineConfig, SiteConfig};
use crate::infrastructure::http_client::DocumentFetcher;
use crate::infrastructure::mutation_watcher::MutationWatcher;
use crate::infrastructure::page_stabilizer::PageStabilizer;
use crate::infrastructure::parsing::{CandidateExtractor, MultiSourcePriceResolver, ParsingResult};
use crate::infrastructure::parsing_error::PageError;

pub struct PricePipeline {
    stabilizer: PageStabilizer,
    watcher: MutationWatcher,
    extractor: CandidateExtractor,
    resolver: MultiSourcePriceResolver,
    fetcher: Arc<dyn DocumentFetcher>,
    config: PipelineConfig,
}

impl PricePipeline {
    /// Build every stage from the application configuration.
    ///
    /// Fails only when a configured selector or key list does not compile.
    pub fn new(config: &AppConfig, fetcher: Arc<dyn DocumentFetcher>) -> ParsingResult<Self> {
        Ok(Self {
            stabilizer: PageStabilizer::new(config.stabilizer.clone()),
            watcher: MutationWatcher::new(config.watcher.clone()),
            extractor: CandidateExtractor::new(&config.resolver),
            resolver: MultiSourcePriceResolver::with_config(&config.resolver)?,
            fetcher,
            config: config.pipeline.clone(),
        })
    }

    pub fn resolver(&self) -> &MultiSourcePriceResolver {
        &self.resolver
    }

    /// Process one page through the path its mode selects. Live pages need a
    /// session; static pages ignore it.
    pub async fn process(
        &self,
        site: &SiteConfig,
        session: Option<&dyn PageSession>,
        cancel: &CancellationToken,
    ) -> PageOutcome {
        match (site.mode, session) {
            (ExtractionMode::Static, _) => self.process_static(site, cancel).await,
            (ExtractionMode::Live, Some(session)) => self.process_live(session, site, cancel).await,
            (ExtractionMode::Live, None) => PageOutcome::new(site, ExtractionMode::Live).with_error(
                PageError::SessionUnavailable {
                    reason: "no page session available".to_string(),
                }
                .to_string(),
            ),
        }
    }

    pub async fn process_live(&self, session: &dyn PageSession, site: &SiteConfig, cancel: &CancellationToken) -> PageOutcome {
        let outcome = PageOutcome::new(site, ExtractionMode::Live);
        if cancel.is_cancelled() {
            return outcome.with_error(PageError::Cancelled.to_string());
        }

        info!("Processing {} ({})", site.name, site.url);
        if let Err(e) = session.navigate(&site.url).await {
            let error = PageError::NavigationFailed {
                url: site.url.clone(),
                reason: e.to_string(),
            };
            warn!("{}", error);
            return outcome.with_error(error.to_string());
        }

        let report = match self
            .stabilizer
            .stabilize(session, site.postal_code.as_deref(), self.extractor.container_locators(), cancel)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!("{}: {}", site.name, e);
                return outcome.with_error(e.to_string());
            }
        };
        debug!("{}: stabilization report {:?}", site.name, report);

        self.capture_screenshot(session, site).await;

        let extraction = self
            .watcher
            .watch(session, &self.extractor, site.price_js.as_deref(), cancel)
            .await;

        // Best effort: the live page also gets the multi-source view
        let resolution = match session.page_source().await {
            Ok(html) => Some(self.resolver.resolve_html(&html)),
            Err(e) => {
                debug!("{}: page source unavailable: {}", site.name, e);
                None
            }
        };

        let outcome = PageOutcome {
            extraction: Some(extraction),
            resolution,
            ..outcome
        };
        log_outcome(&outcome);
        outcome
    }

    pub async fn process_static(&self, site: &SiteConfig, cancel: &CancellationToken) -> PageOutcome {
        let outcome = PageOutcome::new(site, ExtractionMode::Static);
        if cancel.is_cancelled() {
            return outcome.with_error(PageError::Cancelled.to_string());
        }

        info!("Fetching {} ({})", site.name, site.url);
        let html = match self.fetcher.fetch(&site.url, cancel).await {
            Ok(html) => html,
            Err(e) => {
                let error = PageError::FetchFailed {
                    url: site.url.clone(),
                    reason: format!("{e:#}"),
                };
                warn!("{}", error);
                return outcome.with_error(error.to_string());
            }
        };

        let mut findings = self.resolver.collect(&html);
        if needs_refetch(&findings) {
            findings = self.refetch(site, findings, cancel).await;
        }

        let resolution = self.resolver.resolve(findings);
        let outcome = PageOutcome {
            extraction: Some(static_extraction(&resolution)),
            resolution: Some(resolution),
            ..outcome
        };
        log_outcome(&outcome);
        outcome
    }

    /// One delayed refetch, merged so the newer document wins per source.
    /// A failed or cancelled refetch keeps the first findings.
    async fn refetch(&self, site: &SiteConfig, findings: SourceFindings, cancel: &CancellationToken) -> SourceFindings {
        let delay = Duration::from_millis(self.config.refetch_delay_ms);
        info!(
            "{}: {} after first fetch, refetching in {:?}",
            site.name,
            if findings.is_empty() { "nothing found" } else { "only structured data" },
            delay
        );

        if !pause(delay, cancel).await {
            return findings;
        }
        match self.fetcher.fetch(&site.url, cancel).await {
            Ok(html) => findings.merge_newer(self.resolver.collect(&html)),
            Err(e) => {
                warn!("{}: refetch failed, keeping first document: {:#}", site.name, e);
                findings
            }
        }
    }

    async fn capture_screenshot(&self, session: &dyn PageSession, site: &SiteConfig) {
        let Some(dir) = &self.config.screenshot_dir else {
            return;
        };
        let path = screenshot_path(dir, &site.name);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                debug!("Screenshot directory unavailable: {}", e);
                return;
            }
        }
        match session.screenshot(&path).await {
            Ok(()) => debug!("Screenshot saved to {:?}", path),
            Err(e) => debug!("Screenshot skipped: {}", e),
        }
    }
}

/// Nothing found, or only the structured price (often stale on first load).
fn needs_refetch(findings: &SourceFindings) -> bool {
    findings.is_empty() || findings.only_structured_data()
}

/// The static document as a single snapshot: the winning source's
/// candidates, or nothing with a diagnostic.
fn static_extraction(resolution: &ResolvedPrice) -> ExtractionResult {
    let candidates = resolution
        .source()
        .and_then(|source| resolution.all_candidates_by_source().get(&source))
        .cloned()
        .unwrap_or_default();
    let error = candidates
        .is_empty()
        .then(|| "no strategy yielded a price from the fetched document".to_string());
    let snapshot = ExtractionSnapshot::new(0, Duration::ZERO, candidates.clone());
    ExtractionResult::from_history(candidates, vec![snapshot], error)
}

fn screenshot_path(dir: &std::path::Path, site_name: &str) -> PathBuf {
    let slug: String = site_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    dir.join(format!("{slug}_{}.png", Utc::now().format("%Y%m%d_%H%M%S")))
}

fn log_outcome(outcome: &PageOutcome) {
    let source = outcome.resolution.as_ref().and_then(ResolvedPrice::source);
    match (outcome.price_extracted_success(), outcome.price()) {
        (true, Some(price)) => info!(
            "{}: price {:.2} (resolved from {})",
            outcome.site_name,
            price,
            source.map_or_else(|| "live container".to_string(), |s| s.to_string())
        ),
        (true, None) => info!("{}: marked price text found, value unparsed", outcome.site_name),
        (false, _) => warn!(
            "{}: no price ({})",
            outcome.site_name,
            outcome.failure_reason().unwrap_or_default()
        ),
    }
}
