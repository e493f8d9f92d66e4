//! Page/session capability consumed by the live extraction path
//!
//! The browser (or anything that behaves like one) is an external,
//! single-owner resource. It is threaded explicitly into the stabilizer,
//! extractor and watcher as a `&dyn PageSession`; nothing in the crate keeps
//! a global handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How an element is located
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::XPath(expression.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Css(s) | Self::XPath(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Opaque handle to an element owned by a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("Script execution failed: {0}")]
    Script(String),

    #[error("Operation not supported by this session: {0}")]
    Unsupported(&'static str),

    #[error("Session transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session cancelled")]
    Cancelled,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Query, interaction and session control over one page.
///
/// Every call is a blocking step from the pipeline's point of view; callers
/// never issue two calls concurrently against the same session.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigate to `url`
    async fn navigate(&self, url: &str) -> SessionResult<()>;

    /// Current value of the page readiness signal (`"loading"`, `"complete"`, ...)
    async fn ready_state(&self) -> SessionResult<String>;

    async fn current_url(&self) -> SessionResult<String>;

    /// Serialized markup of the whole document
    async fn page_source(&self) -> SessionResult<String>;

    /// Locate elements in document order
    async fn find_elements(&self, locator: &Locator) -> SessionResult<Vec<ElementId>>;

    /// Locate descendants of `parent` in document order
    async fn find_within(&self, parent: &ElementId, locator: &Locator) -> SessionResult<Vec<ElementId>>;

    /// Trimmed text content
    async fn text(&self, element: &ElementId) -> SessionResult<String>;

    /// Serialized inner markup
    async fn inner_html(&self, element: &ElementId) -> SessionResult<String>;

    async fn attribute(&self, element: &ElementId, name: &str) -> SessionResult<Option<String>>;

    async fn is_enabled(&self, element: &ElementId) -> SessionResult<bool>;

    async fn clear(&self, element: &ElementId) -> SessionResult<()>;

    async fn send_keys(&self, element: &ElementId, text: &str) -> SessionResult<()>;

    async fn click(&self, element: &ElementId) -> SessionResult<()>;

    /// Evaluate a script expression and return its structured result
    async fn execute_script(&self, script: &str) -> SessionResult<Value>;

    /// Best-effort diagnostic capture
    async fn screenshot(&self, path: &Path) -> SessionResult<()>;

    /// First element matching `locator`, if any.
    async fn find_first(&self, locator: &Locator) -> SessionResult<Option<ElementId>> {
        Ok(self.find_elements(locator).await?.into_iter().next())
    }
}

/// Produces independent sessions for parallel page workers
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> SessionResult<Box<dyn PageSession>>;
}

/// Outcome of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
    Cancelled,
}

impl WaitOutcome {
    pub const fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Poll `condition` until it holds, `timeout` elapses, or `cancel` fires.
///
/// The condition is always evaluated at least once. Cancellation interrupts the
/// sleep between polls, so a cancelled wait returns promptly.
pub async fn wait_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
    mut condition: F,
) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        if condition().await {
            return WaitOutcome::Satisfied;
        }

        let now = Instant::now();
        if now >= deadline {
            trace!("wait_until timed out after {:?}", timeout);
            return WaitOutcome::TimedOut;
        }

        let nap = poll_interval.min(deadline - now);
        tokio::select! {
            () = cancel.cancelled() => return WaitOutcome::Cancelled,
            () = tokio::time::sleep(nap) => {}
        }
    }
}

/// Wait for the first element matching any of `locators`, tried in order on
/// every poll. Query failures count as "not there yet".
pub async fn wait_for_element(
    session: &dyn PageSession,
    locators: &[Locator],
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> (WaitOutcome, Option<ElementId>) {
    let slot: Mutex<Option<ElementId>> = Mutex::new(None);
    let found = &slot;

    let outcome = wait_until(timeout, poll_interval, cancel, move || async move {
        for locator in locators {
            if let Ok(Some(element)) = session.find_first(locator).await {
                if let Ok(mut guard) = found.lock() {
                    *guard = Some(element);
                }
                return true;
            }
        }
        false
    })
    .await;

    (outcome, slot.into_inner().ok().flatten())
}

/// Sleep for `duration` unless cancelled first. Returns false on cancellation.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
