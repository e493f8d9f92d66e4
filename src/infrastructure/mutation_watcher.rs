//! Bounded monitoring of a live container for late price updates
//!
//! Prices are often rendered after the page looks settled (lazy widgets,
//! postal-code recalculation). The watcher samples the container at fixed
//! ticks and keeps a snapshot every time the candidate sequence changes.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::price::{ExtractionResult, ExtractionSnapshot, PriceCandidate};
use crate::infrastructure::browser::{PageSession, pause};
use crate::infrastructure::parsing::{CandidateExtractor, ParsingResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Number of samples after the initial capture
    pub ticks: u32,
    pub interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            ticks: 10,
            interval_ms: 1_000,
        }
    }
}

impl WatcherConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

pub struct MutationWatcher {
    config: WatcherConfig,
}

impl MutationWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Watch the content container of `session`.
    ///
    /// With `price_expression` set, each sample evaluates that expression for
    /// a single price element instead of reading the whole container.
    pub async fn watch(
        &self,
        session: &dyn PageSession,
        extractor: &CandidateExtractor,
        price_expression: Option<&str>,
        cancel: &CancellationToken,
    ) -> ExtractionResult {
        match price_expression {
            Some(expression) => {
                self.watch_with(cancel, move || extractor.extract_via_script(session, expression))
                    .await
            }
            None => self.watch_with(cancel, move || extractor.extract_live(session)).await,
        }
    }

    /// Watch using an arbitrary sampler.
    ///
    /// A failed initial sample fails the whole attempt. Failed tick samples
    /// are skipped, so a container that is briefly detached does not erase
    /// what was already seen. Cancellation ends the window early with the
    /// history gathered so far.
    pub async fn watch_with<F, Fut>(&self, cancel: &CancellationToken, mut sample: F) -> ExtractionResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ParsingResult<Vec<PriceCandidate>>>,
    {
        let started = Instant::now();

        let initial = match sample().await {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("Initial extraction failed: {}", e);
                return ExtractionResult::failed(e.to_string());
            }
        };
        let mut history = vec![ExtractionSnapshot::new(0, Duration::ZERO, initial)];

        for tick in 1..=self.config.ticks {
            if !pause(self.config.interval(), cancel).await {
                debug!("Monitoring cancelled at tick {}", tick);
                break;
            }

            let candidates = match sample().await {
                Ok(candidates) => candidates,
                Err(e) => {
                    debug!("Tick {} skipped: {}", tick, e);
                    continue;
                }
            };

            let snapshot = ExtractionSnapshot::new(tick, started.elapsed(), candidates);
            let changed = history.last().is_none_or(|latest| snapshot.differs_from(latest));
            if changed {
                info!(
                    "Container changed at tick {} ({} candidate(s), {} marked)",
                    tick,
                    snapshot.candidates.len(),
                    snapshot.candidates.iter().filter(|c| c.has_marker).count()
                );
                history.push(snapshot);
            }
        }

        let latest = history.last().map(|s| s.candidates.clone()).unwrap_or_default();
        ExtractionResult::from_history(latest, history, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::parsing::ParsingConfig;
    use crate::test_utils::{Frame, ScriptedSession};

    fn watcher() -> MutationWatcher {
        MutationWatcher::new(WatcherConfig::default())
    }

    fn extractor() -> CandidateExtractor {
        CandidateExtractor::new(&ParsingConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_container_keeps_one_snapshot() {
        let session = ScriptedSession::single(&[("Preço", "Preço"), ("R$ 89,90", "R$ 89,90")]);
        let result = watcher().watch(&session, &extractor(), None, &CancellationToken::new()).await;

        assert!(result.found());
        assert_eq!(result.history().len(), 1);
        assert_eq!(result.candidates().len(), 2);
        assert_eq!(result.first_marked().and_then(|c| c.value), Some(89.90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_at_fourth_tick_is_recorded() {
        let session = ScriptedSession::single(&[("Carregando", "Carregando")])
            .with_frame_at(Duration::from_secs(4), Frame::nodes(&[("R$ 42,00", "<b>R$</b> 42,00")]));
        let result = watcher().watch(&session, &extractor(), None, &CancellationToken::new()).await;

        assert!(result.found());
        let history = result.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].tick, 4);
        assert_eq!(history[1].timestamp, Duration::from_secs(4));
        assert_eq!(result.candidates()[0].value, Some(42.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_container_fails_with_diagnostic() {
        let session = ScriptedSession::without_container();
        let result = watcher().watch(&session, &extractor(), None, &CancellationToken::new()).await;

        assert!(!result.found());
        assert!(result.error().is_some_and(|e| e.contains("container")));
        assert!(result.candidates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_container_tick_is_skipped() {
        let session = ScriptedSession::single(&[("R$ 15,00", "R$ 15,00")])
            .with_frame_at(Duration::from_secs(2), Frame::Missing)
            .with_frame_at(Duration::from_secs(3), Frame::nodes(&[("R$ 15,00", "R$ 15,00")]));
        let result = watcher().watch(&session, &extractor(), None, &CancellationToken::new()).await;

        assert!(result.found());
        assert_eq!(result.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_bounded() {
        let started = Instant::now();
        let result = watcher()
            .watch_with(&CancellationToken::new(), || async { Ok(Vec::new()) })
            .await;
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(!result.found());
        assert!(result.error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ends_window_early() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let session = ScriptedSession::single(&[("R$ 7,00", "R$ 7,00")]);
        let result = watcher().watch(&session, &extractor(), None, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_sampling() {
        let session = ScriptedSession::without_container().with_script_result(serde_json::json!({
            "found": true,
            "text": "R$ 249,00",
            "html": "R$ 249,00"
        }));
        let result = watcher()
            .watch(&session, &extractor(), Some("document.querySelector('.price')"), &CancellationToken::new())
            .await;
        assert!(result.found());
        assert_eq!(result.candidates().len(), 1);
    }
}
