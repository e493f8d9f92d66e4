//! Test utilities for pricewatch
//!
//! `ScriptedSession` plays back a scripted page: a timeline of container
//! states keyed by (tokio) time since the session was created, plus knobs for
//! the readiness signal, the root element and a postal-code interstitial.
//! Run tests with `#[tokio::test(start_paused = true)]` so the timeline is
//! driven by virtual time.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::browser::{ElementId, Locator, PageSession, SessionError, SessionFactory, SessionResult};
use crate::infrastructure::http_client::DocumentFetcher;
use crate::infrastructure::parsing::ParsingConfig;
use crate::infrastructure::page_stabilizer::StabilizerConfig;

const BODY: &str = "body";
const CONTAINER: &str = "container";
const INPUT: &str = "interstitial-input";
const BUTTON: &str = "interstitial-button";

static MISSING: Frame = Frame::Missing;

/// State of the content container at some point of the timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Container not in the document
    Missing,
    /// Container present with `(text, inner_html)` per text node
    Nodes(Vec<(String, String)>),
}

impl Frame {
    pub fn nodes(nodes: &[(&str, &str)]) -> Self {
        Self::Nodes(nodes.iter().map(|(t, h)| ((*t).to_string(), (*h).to_string())).collect())
    }
}

#[derive(Debug, Clone)]
struct Interstitial {
    input: Locator,
    button: Locator,
    button_enabled_after: Duration,
}

#[derive(Debug, Default)]
struct Recorded {
    navigated: Vec<String>,
    typed: Vec<String>,
    clicked: bool,
    screenshots: Vec<PathBuf>,
}

/// Scripted `PageSession` for tests
#[derive(Debug)]
pub struct ScriptedSession {
    started: Instant,
    timeline: Vec<(Duration, Frame)>,
    container_selectors: Vec<String>,
    node_selector: String,
    root_selector: String,
    body_after: Option<Duration>,
    ready_after: Duration,
    page_source: String,
    script_result: Option<Value>,
    navigation_error: Option<SessionError>,
    interstitial: Option<Interstitial>,
    recorded: Mutex<Recorded>,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    /// Body present, readiness complete, no container.
    pub fn new() -> Self {
        let parsing = ParsingConfig::default();
        let stabilizer = StabilizerConfig::default();
        Self {
            started: Instant::now(),
            timeline: Vec::new(),
            container_selectors: parsing.container_selectors,
            node_selector: parsing.candidate_node_selector,
            root_selector: stabilizer.root_selector,
            body_after: Some(Duration::ZERO),
            ready_after: Duration::ZERO,
            page_source: "<html><body></body></html>".to_string(),
            script_result: None,
            navigation_error: None,
            interstitial: None,
            recorded: Mutex::new(Recorded::default()),
        }
    }

    /// A container that never changes.
    pub fn single(nodes: &[(&str, &str)]) -> Self {
        Self::new().with_frame_at(Duration::ZERO, Frame::nodes(nodes))
    }

    pub fn without_container() -> Self {
        Self::new()
    }

    /// From `offset` onward the container shows `frame`.
    pub fn with_frame_at(mut self, offset: Duration, frame: Frame) -> Self {
        self.timeline.push((offset, frame));
        self.timeline.sort_by_key(|(at, _)| *at);
        self
    }

    pub fn with_ready_after(mut self, delay: Duration) -> Self {
        self.ready_after = delay;
        self
    }

    pub fn with_body_after(mut self, delay: Duration) -> Self {
        self.body_after = Some(delay);
        self
    }

    pub fn without_body(mut self) -> Self {
        self.body_after = None;
        self
    }

    pub fn with_page_source(mut self, html: impl Into<String>) -> Self {
        self.page_source = html.into();
        self
    }

    pub fn with_script_result(mut self, value: Value) -> Self {
        self.script_result = Some(value);
        self
    }

    pub fn with_navigation_error(mut self, error: SessionError) -> Self {
        self.navigation_error = Some(error);
        self
    }

    /// Postal-code prompt using the first default input and button locators.
    pub fn with_interstitial(mut self, button_enabled_after: Duration) -> Self {
        let config = StabilizerConfig::default();
        if let (Some(input), Some(button)) = (
            config.interstitial_input_selectors.first(),
            config.interstitial_button_selectors.first(),
        ) {
            self.interstitial = Some(Interstitial {
                input: input.clone(),
                button: button.clone(),
                button_enabled_after,
            });
        }
        self
    }

    pub fn navigated(&self) -> Vec<String> {
        self.recorded().navigated.clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.recorded().typed.clone()
    }

    pub fn clicked(&self) -> bool {
        self.recorded().clicked
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.recorded().screenshots.clone()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn current_frame(&self) -> (usize, &Frame) {
        let elapsed = self.elapsed();
        self.timeline
            .iter()
            .enumerate()
            .rev()
            .find(|(_, (at, _))| *at <= elapsed)
            .map_or((0, &MISSING), |(index, (_, frame))| (index, frame))
    }

    fn node(&self, id: &ElementId) -> SessionResult<&(String, String)> {
        let not_found = || SessionError::ElementNotFound(id.to_string());
        let mut parts = id.as_str().strip_prefix("node-").ok_or_else(not_found)?.split('-');
        let frame = parts.next().and_then(|n| n.parse::<usize>().ok()).ok_or_else(not_found)?;
        let index = parts.next().and_then(|n| n.parse::<usize>().ok()).ok_or_else(not_found)?;
        match self.timeline.get(frame) {
            Some((_, Frame::Nodes(nodes))) => nodes.get(index).ok_or_else(not_found),
            _ => Err(not_found()),
        }
    }

    fn interstitial_open(&self) -> bool {
        self.interstitial.is_some() && !self.recorded().clicked
    }
}

#[async_trait]
impl PageSession for ScriptedSession {
    async fn navigate(&self, url: &str) -> SessionResult<()> {
        self.recorded().navigated.push(url.to_string());
        match &self.navigation_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn ready_state(&self) -> SessionResult<String> {
        let state = if self.elapsed() >= self.ready_after { "complete" } else { "loading" };
        Ok(state.to_string())
    }

    async fn current_url(&self) -> SessionResult<String> {
        Ok(self.recorded().navigated.last().cloned().unwrap_or_default())
    }

    async fn page_source(&self) -> SessionResult<String> {
        Ok(self.page_source.clone())
    }

    async fn find_elements(&self, locator: &Locator) -> SessionResult<Vec<ElementId>> {
        if let Locator::Css(selector) = locator {
            if *selector == self.root_selector {
                let present = self.body_after.is_some_and(|after| self.elapsed() >= after);
                return Ok(if present { vec![ElementId::new(BODY)] } else { Vec::new() });
            }
            if self.container_selectors.contains(selector) {
                return Ok(match self.current_frame() {
                    (_, Frame::Nodes(_)) => vec![ElementId::new(CONTAINER)],
                    (_, Frame::Missing) => Vec::new(),
                });
            }
        }

        if let Some(interstitial) = &self.interstitial {
            if self.interstitial_open() {
                if *locator == interstitial.input {
                    return Ok(vec![ElementId::new(INPUT)]);
                }
                if *locator == interstitial.button {
                    return Ok(vec![ElementId::new(BUTTON)]);
                }
            }
        }
        Ok(Vec::new())
    }

    async fn find_within(&self, parent: &ElementId, locator: &Locator) -> SessionResult<Vec<ElementId>> {
        if parent.as_str() != CONTAINER || locator.as_str() != self.node_selector {
            return Ok(Vec::new());
        }
        match self.current_frame() {
            (frame, Frame::Nodes(nodes)) => Ok((0..nodes.len()).map(|i| ElementId::new(format!("node-{frame}-{i}"))).collect()),
            (_, Frame::Missing) => Err(SessionError::ElementNotFound(CONTAINER.to_string())),
        }
    }

    async fn text(&self, element: &ElementId) -> SessionResult<String> {
        Ok(self.node(element)?.0.trim().to_string())
    }

    async fn inner_html(&self, element: &ElementId) -> SessionResult<String> {
        Ok(self.node(element)?.1.clone())
    }

    async fn attribute(&self, element: &ElementId, name: &str) -> SessionResult<Option<String>> {
        if element.as_str() == BUTTON && name == "disabled" && !self.is_enabled(element).await? {
            return Ok(Some("disabled".to_string()));
        }
        Ok(None)
    }

    async fn is_enabled(&self, element: &ElementId) -> SessionResult<bool> {
        match (&self.interstitial, element.as_str()) {
            (Some(interstitial), BUTTON) => Ok(self.elapsed() >= interstitial.button_enabled_after),
            _ => Ok(true),
        }
    }

    async fn clear(&self, element: &ElementId) -> SessionResult<()> {
        if element.as_str() == INPUT {
            Ok(())
        } else {
            Err(SessionError::NotInteractable(element.to_string()))
        }
    }

    async fn send_keys(&self, element: &ElementId, text: &str) -> SessionResult<()> {
        if element.as_str() != INPUT {
            return Err(SessionError::NotInteractable(element.to_string()));
        }
        self.recorded().typed.push(text.to_string());
        Ok(())
    }

    async fn click(&self, element: &ElementId) -> SessionResult<()> {
        if element.as_str() != BUTTON || !self.is_enabled(element).await? {
            return Err(SessionError::NotInteractable(element.to_string()));
        }
        self.recorded().clicked = true;
        Ok(())
    }

    async fn execute_script(&self, _script: &str) -> SessionResult<Value> {
        self.script_result
            .clone()
            .ok_or(SessionError::Unsupported("no scripted result"))
    }

    async fn screenshot(&self, path: &Path) -> SessionResult<()> {
        self.recorded().screenshots.push(path.to_path_buf());
        Ok(())
    }
}

/// Factory building a fresh scripted session per worker
pub struct ScriptedFactory<F> {
    build: F,
    opened: AtomicUsize,
}

impl<F> ScriptedFactory<F>
where
    F: Fn() -> ScriptedSession + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self {
            build,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> SessionFactory for ScriptedFactory<F>
where
    F: Fn() -> ScriptedSession + Send + Sync,
{
    async fn open(&self) -> SessionResult<Box<dyn PageSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new((self.build)()))
    }
}

/// Fetcher answering with scripted documents in order; the last answer
/// repeats once the script runs out.
pub struct ScriptedFetcher {
    documents: Vec<Result<String, String>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new(documents: Vec<Result<String, String>>) -> Self {
        Self {
            documents,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(html: impl Into<String>) -> Self {
        Self::new(vec![Ok(html.into())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl DocumentFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> anyhow::Result<String> {
        if cancel.is_cancelled() {
            anyhow::bail!("fetch of {url} cancelled");
        }
        self.urls.lock().unwrap_or_else(PoisonError::into_inner).push(url.to_string());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .documents
            .get(call)
            .or_else(|| self.documents.last())
            .cloned()
            .unwrap_or_else(|| Err("no document scripted".to_string()));
        answer.map_err(|reason| anyhow::anyhow!("fetch of {url} failed: {reason}"))
    }
}
