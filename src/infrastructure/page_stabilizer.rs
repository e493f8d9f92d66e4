//! Page stabilization for the live extraction path
//!
//! Drives a freshly navigated page to a quiescent state before any extraction
//! is attempted:
//!
//! 1. wait for the document root (fatal on timeout)
//! 2. wait for the readiness signal (best effort)
//! 3. dismiss the postal-code interstitial if one is shown (best effort)
//! 4. wait for the product content container (best effort)
//! 5. settle for a fixed interval
//!
//! Every wait is bounded and observes the caller's cancellation token.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::browser::{
    ElementId, Locator, PageSession, WaitOutcome, pause, wait_for_element, wait_until,
};
use crate::infrastructure::parsing_error::{PageError, PageResult};

/// Timeouts and selectors used while stabilizing a page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Element whose presence marks a loaded document
    pub root_selector: String,
    /// Bound for the root element and the readiness signal
    pub page_timeout_ms: u64,
    /// Bound for the content container
    pub content_timeout_ms: u64,
    /// Bound for locating the interstitial input and waiting for its button
    pub interstitial_timeout_ms: u64,
    /// Fixed pause after the container is present
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
    pub interstitial_input_selectors: Vec<Locator>,
    pub interstitial_button_selectors: Vec<Locator>,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            root_selector: "body".to_string(),
            page_timeout_ms: 30_000,
            content_timeout_ms: 10_000,
            interstitial_timeout_ms: 5_000,
            settle_ms: 2_000,
            poll_interval_ms: 250,
            interstitial_input_selectors: vec![
                Locator::css("input[name='cep'], input[name='zipcode'], input[aria-label*='CEP']"),
                Locator::css("input[placeholder*='CEP']"),
                Locator::css("input[type='text'][maxlength='8'], input[type='text'][maxlength='9']"),
            ],
            interstitial_button_selectors: vec![
                Locator::xpath("//button[contains(., 'OK') or contains(., 'Confirmar') or contains(., 'Calcular')]"),
                Locator::css("button[type='submit']"),
                Locator::css("input[type='submit']"),
                Locator::xpath("//div[contains(@class, 'modal')]//button"),
            ],
        }
    }
}

impl StabilizerConfig {
    pub const fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub const fn content_timeout(&self) -> Duration {
        Duration::from_millis(self.content_timeout_ms)
    }

    pub const fn interstitial_timeout(&self) -> Duration {
        Duration::from_millis(self.interstitial_timeout_ms)
    }

    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Stages of the stabilization state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizationStage {
    AwaitingRoot,
    AwaitingReady,
    Interstitial,
    AwaitingContent,
    Settling,
    Done,
}

impl fmt::Display for StabilizationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingRoot => "awaiting-root",
            Self::AwaitingReady => "awaiting-ready",
            Self::Interstitial => "interstitial",
            Self::AwaitingContent => "awaiting-content",
            Self::Settling => "settling",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// What stabilization observed. Only the root wait can fail the page; the
/// other flags are diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StabilizationReport {
    pub ready_state_complete: bool,
    pub interstitial_dismissed: bool,
    pub container_present: bool,
    pub current_url: Option<String>,
    pub elapsed: Duration,
}

pub struct PageStabilizer {
    config: StabilizerConfig,
}

impl PageStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Bring `session` to a stable state.
    ///
    /// The interstitial step only runs when a postal code is supplied.
    /// `container_locators` are tried in order while waiting for content.
    pub async fn stabilize(
        &self,
        session: &dyn PageSession,
        postal_code: Option<&str>,
        container_locators: &[Locator],
        cancel: &CancellationToken,
    ) -> PageResult<StabilizationReport> {
        let started = Instant::now();
        let mut report = StabilizationReport::default();
        let mut stage = StabilizationStage::AwaitingRoot;

        while stage != StabilizationStage::Done {
            debug!("Stabilization stage: {}", stage);
            stage = match stage {
                StabilizationStage::AwaitingRoot => {
                    self.await_root(session, cancel).await?;
                    StabilizationStage::AwaitingReady
                }
                StabilizationStage::AwaitingReady => {
                    report.ready_state_complete = self.await_ready(session, cancel).await?;
                    report.current_url = session.current_url().await.ok();
                    if let Some(url) = &report.current_url {
                        info!("Page loaded, current URL: {}", url);
                    }
                    StabilizationStage::Interstitial
                }
                StabilizationStage::Interstitial => {
                    if let Some(code) = postal_code {
                        report.interstitial_dismissed = self.dismiss_interstitial(session, code, cancel).await?;
                    }
                    StabilizationStage::AwaitingContent
                }
                StabilizationStage::AwaitingContent => {
                    report.container_present = self.await_content(session, container_locators, cancel).await?;
                    StabilizationStage::Settling
                }
                StabilizationStage::Settling => {
                    if !pause(self.config.settle(), cancel).await {
                        return Err(PageError::Cancelled);
                    }
                    StabilizationStage::Done
                }
                StabilizationStage::Done => StabilizationStage::Done,
            };
        }

        report.elapsed = started.elapsed();
        debug!("Page stabilized in {:?}: {:?}", report.elapsed, report);
        Ok(report)
    }

    async fn await_root(&self, session: &dyn PageSession, cancel: &CancellationToken) -> PageResult<()> {
        let root = [Locator::css(self.config.root_selector.clone())];
        let (outcome, _) = wait_for_element(
            session,
            &root,
            self.config.page_timeout(),
            self.config.poll_interval(),
            cancel,
        )
        .await;

        match outcome {
            WaitOutcome::Satisfied => Ok(()),
            WaitOutcome::Cancelled => Err(PageError::Cancelled),
            WaitOutcome::TimedOut => Err(PageError::RootElementTimeout {
                timeout: self.config.page_timeout(),
            }),
        }
    }

    async fn await_ready(&self, session: &dyn PageSession, cancel: &CancellationToken) -> PageResult<bool> {
        let outcome = wait_until(self.config.page_timeout(), self.config.poll_interval(), cancel, move || async move {
            session.ready_state().await.is_ok_and(|state| state == "complete")
        })
        .await;

        match outcome {
            WaitOutcome::Satisfied => Ok(true),
            WaitOutcome::Cancelled => Err(PageError::Cancelled),
            WaitOutcome::TimedOut => {
                warn!("Readiness signal not complete after {:?}, continuing", self.config.page_timeout());
                Ok(false)
            }
        }
    }

    async fn await_content(
        &self,
        session: &dyn PageSession,
        container_locators: &[Locator],
        cancel: &CancellationToken,
    ) -> PageResult<bool> {
        let (outcome, _) = wait_for_element(
            session,
            container_locators,
            self.config.content_timeout(),
            self.config.poll_interval(),
            cancel,
        )
        .await;

        match outcome {
            WaitOutcome::Satisfied => Ok(true),
            WaitOutcome::Cancelled => Err(PageError::Cancelled),
            WaitOutcome::TimedOut => {
                warn!("Content container not present after {:?}, continuing", self.config.content_timeout());
                Ok(false)
            }
        }
    }

    /// Fill and submit the postal-code prompt. Any failure other than
    /// cancellation is logged and reported as "not dismissed".
    async fn dismiss_interstitial(
        &self,
        session: &dyn PageSession,
        postal_code: &str,
        cancel: &CancellationToken,
    ) -> PageResult<bool> {
        let (outcome, input) = wait_for_element(
            session,
            &self.config.interstitial_input_selectors,
            self.config.interstitial_timeout(),
            self.config.poll_interval(),
            cancel,
        )
        .await;

        if outcome == WaitOutcome::Cancelled {
            return Err(PageError::Cancelled);
        }
        let Some(input) = input else {
            debug!("No postal-code prompt shown");
            return Ok(false);
        };

        if let Err(e) = session.clear(&input).await {
            debug!("Could not clear postal-code input: {}", e);
            return Ok(false);
        }
        if let Err(e) = session.send_keys(&input, postal_code).await {
            debug!("Could not type postal code: {}", e);
            return Ok(false);
        }

        for locator in &self.config.interstitial_button_selectors {
            let button = match session.find_first(locator).await {
                Ok(Some(button)) => button,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Button lookup with {} failed: {}", locator, e);
                    continue;
                }
            };

            match self.await_enabled(session, &button, cancel).await {
                WaitOutcome::Satisfied => {}
                WaitOutcome::Cancelled => return Err(PageError::Cancelled),
                WaitOutcome::TimedOut => {
                    debug!("Button {} never became enabled", locator);
                    continue;
                }
            }

            match session.click(&button).await {
                Ok(()) => {
                    info!("Postal code {} submitted", postal_code);
                    return Ok(true);
                }
                Err(e) => debug!("Click on {} failed: {}", locator, e),
            }
        }

        warn!("Postal-code prompt found but no submit button could be clicked");
        Ok(false)
    }

    async fn await_enabled(&self, session: &dyn PageSession, button: &ElementId, cancel: &CancellationToken) -> WaitOutcome {
        wait_until(
            self.config.interstitial_timeout(),
            self.config.poll_interval(),
            cancel,
            move || async move {
                let enabled = session.is_enabled(button).await.unwrap_or(false);
                let disabled_attr = session.attribute(button, "disabled").await.ok().flatten();
                enabled && disabled_attr.is_none()
            },
        )
        .await
    }
}
