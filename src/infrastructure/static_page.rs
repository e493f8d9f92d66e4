//! `PageSession` over a fetched HTML snapshot
//!
//! Lets the live pipeline run without a browser: queries are answered from
//! the parsed document, the readiness signal is always `complete`, and
//! interaction/script calls report `Unsupported` (which the stabilizer treats
//! as "no interstitial present").

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::infrastructure::browser::{ElementId, Locator, PageSession, SessionError, SessionFactory, SessionResult};
use crate::infrastructure::http_client::DocumentFetcher;

/// Route from the document root to one element: `(selector, nth match)` per hop
type ElementPath = Vec<(String, usize)>;

#[derive(Debug, Default)]
struct SnapshotState {
    url: String,
    html: String,
    elements: Vec<ElementPath>,
}

pub struct StaticPageSession {
    state: Mutex<SnapshotState>,
    fetcher: Option<Arc<dyn DocumentFetcher>>,
    cancel: CancellationToken,
}

impl StaticPageSession {
    /// Session that fetches documents on `navigate`.
    pub fn new(fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self {
            state: Mutex::new(SnapshotState::default()),
            fetcher: Some(fetcher),
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight fetches when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Session over a fixed document.
    pub fn from_html(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(SnapshotState {
                url: url.into(),
                html: html.into(),
                elements: Vec::new(),
            }),
            fetcher: None,
            cancel: CancellationToken::new(),
        }
    }

    fn state(&self) -> SessionResult<MutexGuard<'_, SnapshotState>> {
        self.state
            .lock()
            .map_err(|_| SessionError::Transport("snapshot state lock poisoned".to_string()))
    }

    fn load(&self, url: &str, html: String) -> SessionResult<()> {
        let mut state = self.state()?;
        state.url = url.to_string();
        state.html = html;
        state.elements.clear();
        Ok(())
    }

    fn css(locator: &Locator) -> SessionResult<&str> {
        match locator {
            Locator::Css(selector) => Ok(selector),
            Locator::XPath(_) => Err(SessionError::Unsupported("xpath locators on a static snapshot")),
        }
    }

    fn compile(selector: &str) -> SessionResult<Selector> {
        Selector::parse(selector).map_err(|e| SessionError::Script(format!("invalid selector '{selector}': {e}")))
    }

    fn resolve<'a>(document: &'a Html, path: &ElementPath) -> SessionResult<ElementRef<'a>> {
        let mut current: Option<ElementRef<'a>> = None;
        for (selector, nth) in path {
            let compiled = Self::compile(selector)?;
            let next = match current {
                None => document.select(&compiled).nth(*nth),
                Some(parent) => parent.select(&compiled).nth(*nth),
            };
            current = Some(next.ok_or_else(|| SessionError::ElementNotFound(selector.clone()))?);
        }
        current.ok_or_else(|| SessionError::ElementNotFound("empty element path".to_string()))
    }

    /// Run `f` against the element behind `id`.
    fn with_element<T>(&self, id: &ElementId, f: impl FnOnce(ElementRef<'_>) -> T) -> SessionResult<T> {
        let state = self.state()?;
        let index = id
            .as_str()
            .strip_prefix("el-")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| SessionError::ElementNotFound(id.to_string()))?;
        let path = state
            .elements
            .get(index)
            .ok_or_else(|| SessionError::ElementNotFound(id.to_string()))?;
        let document = Html::parse_document(&state.html);
        let element = Self::resolve(&document, path)?;
        Ok(f(element))
    }

    /// Match `selector` under `parent` (or the document) and register handles.
    fn query(&self, parent: Option<&ElementId>, selector: &str) -> SessionResult<Vec<ElementId>> {
        let mut state = self.state()?;
        let compiled = Self::compile(selector)?;

        let base_path = match parent {
            None => Vec::new(),
            Some(id) => {
                let index = id
                    .as_str()
                    .strip_prefix("el-")
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| SessionError::ElementNotFound(id.to_string()))?;
                state
                    .elements
                    .get(index)
                    .cloned()
                    .ok_or_else(|| SessionError::ElementNotFound(id.to_string()))?
            }
        };

        let count = {
            let document = Html::parse_document(&state.html);
            if base_path.is_empty() {
                document.select(&compiled).count()
            } else {
                Self::resolve(&document, &base_path)?.select(&compiled).count()
            }
        };

        // Repeated queries hand back the handles already registered
        let ids = (0..count)
            .map(|nth| {
                let mut path = base_path.clone();
                path.push((selector.to_string(), nth));
                let index = match state.elements.iter().position(|known| *known == path) {
                    Some(index) => index,
                    None => {
                        state.elements.push(path);
                        state.elements.len() - 1
                    }
                };
                ElementId::new(format!("el-{index}"))
            })
            .collect();
        Ok(ids)
    }
}

#[async_trait]
impl PageSession for StaticPageSession {
    async fn navigate(&self, url: &str) -> SessionResult<()> {
        let Some(fetcher) = &self.fetcher else {
            let already_loaded = self.state()?.url == url;
            return if already_loaded {
                Ok(())
            } else {
                Err(SessionError::Unsupported("navigation without a document fetcher"))
            };
        };

        let html = match fetcher.fetch(url, &self.cancel).await {
            Ok(html) => html,
            Err(_) if self.cancel.is_cancelled() => return Err(SessionError::Cancelled),
            Err(e) => return Err(SessionError::Transport(format!("{e:#}"))),
        };
        debug!("Loaded static snapshot of {url} ({} bytes)", html.len());
        self.load(url, html)
    }

    async fn ready_state(&self) -> SessionResult<String> {
        Ok("complete".to_string())
    }

    async fn current_url(&self) -> SessionResult<String> {
        Ok(self.state()?.url.clone())
    }

    async fn page_source(&self) -> SessionResult<String> {
        Ok(self.state()?.html.clone())
    }

    async fn find_elements(&self, locator: &Locator) -> SessionResult<Vec<ElementId>> {
        self.query(None, Self::css(locator)?)
    }

    async fn find_within(&self, parent: &ElementId, locator: &Locator) -> SessionResult<Vec<ElementId>> {
        self.query(Some(parent), Self::css(locator)?)
    }

    async fn text(&self, element: &ElementId) -> SessionResult<String> {
        self.with_element(element, |el| el.text().collect::<String>().trim().to_string())
    }

    async fn inner_html(&self, element: &ElementId) -> SessionResult<String> {
        self.with_element(element, |el| el.inner_html())
    }

    async fn attribute(&self, element: &ElementId, name: &str) -> SessionResult<Option<String>> {
        self.with_element(element, |el| el.value().attr(name).map(str::to_string))
    }

    async fn is_enabled(&self, element: &ElementId) -> SessionResult<bool> {
        self.with_element(element, |el| el.value().attr("disabled").is_none())
    }

    async fn clear(&self, _element: &ElementId) -> SessionResult<()> {
        Err(SessionError::Unsupported("interaction on a static snapshot"))
    }

    async fn send_keys(&self, _element: &ElementId, _text: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported("interaction on a static snapshot"))
    }

    async fn click(&self, _element: &ElementId) -> SessionResult<()> {
        Err(SessionError::Unsupported("interaction on a static snapshot"))
    }

    async fn execute_script(&self, _script: &str) -> SessionResult<Value> {
        Err(SessionError::Unsupported("script execution on a static snapshot"))
    }

    async fn screenshot(&self, _path: &Path) -> SessionResult<()> {
        Err(SessionError::Unsupported("screenshots of a static snapshot"))
    }
}

/// Opens one fetch-backed snapshot session per worker
pub struct StaticSessionFactory {
    fetcher: Arc<dyn DocumentFetcher>,
    cancel: CancellationToken,
}

impl StaticSessionFactory {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self {
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Sessions opened from here stop fetching once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl SessionFactory for StaticSessionFactory {
    async fn open(&self) -> SessionResult<Box<dyn PageSession>> {
        let session = StaticPageSession::new(Arc::clone(&self.fetcher)).with_cancellation(self.cancel.clone());
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <aside data-test="product-details-info">
            <p>Vendido por <b>Loja</b></p>
            <p class="price"><span>R$</span> 79,90</p>
        </aside>
        <form><input name="zipcode"><button disabled>OK</button></form>
    </body></html>"#;

    #[tokio::test]
    async fn test_query_text_and_markup() {
        let session = StaticPageSession::from_html("https://shop.test/p/1", PAGE);
        let aside = session
            .find_first(&Locator::css("aside[data-test='product-details-info']"))
            .await
            .unwrap()
            .expect("aside present");
        let paragraphs = session.find_within(&aside, &Locator::css("p")).await.unwrap();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(session.text(&paragraphs[0]).await.unwrap(), "Vendido por Loja");
        assert!(session.inner_html(&paragraphs[1]).await.unwrap().contains("<span>R$</span>"));
        assert_eq!(session.attribute(&paragraphs[1], "class").await.unwrap().as_deref(), Some("price"));
    }

    #[tokio::test]
    async fn test_disabled_button_and_unsupported_interaction() {
        let session = StaticPageSession::from_html("https://shop.test/p/1", PAGE);
        let button = session.find_first(&Locator::css("button")).await.unwrap().unwrap();
        assert!(!session.is_enabled(&button).await.unwrap());
        assert!(matches!(session.click(&button).await, Err(SessionError::Unsupported(_))));
        assert!(session.find_elements(&Locator::xpath("//button")).await.is_err());
    }

    #[tokio::test]
    async fn test_navigation_without_client() {
        let session = StaticPageSession::from_html("https://shop.test/p/1", PAGE);
        assert!(session.navigate("https://shop.test/p/1").await.is_ok());
        assert!(session.navigate("https://shop.test/p/2").await.is_err());
        assert_eq!(session.ready_state().await.unwrap(), "complete");
    }

    #[tokio::test]
    async fn test_factory_sessions_fetch_on_navigate() {
        let fetcher = Arc::new(crate::test_utils::ScriptedFetcher::repeating(PAGE));
        let factory = StaticSessionFactory::new(fetcher.clone());
        let session = factory.open().await.unwrap();

        session.navigate("https://shop.test/p/9").await.unwrap();
        assert_eq!(session.current_url().await.unwrap(), "https://shop.test/p/9");
        assert!(session.page_source().await.unwrap().contains("79,90"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_factory_session_does_not_fetch() {
        let fetcher = Arc::new(crate::test_utils::ScriptedFetcher::repeating(PAGE));
        let cancel = CancellationToken::new();
        let factory = StaticSessionFactory::new(fetcher.clone()).with_cancellation(cancel.clone());
        let session = factory.open().await.unwrap();

        cancel.cancel();
        let err = session.navigate("https://shop.test/p/9").await.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert!(session.page_source().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_queries_reuse_handles() {
        let session = StaticPageSession::from_html("https://shop.test/p/1", PAGE);
        let first = session.find_elements(&Locator::css("p")).await.unwrap();
        for _ in 0..5 {
            assert_eq!(session.find_elements(&Locator::css("p")).await.unwrap(), first);
        }
        let aside = session.find_first(&Locator::css("aside")).await.unwrap().unwrap();
        let nested = session.find_within(&aside, &Locator::css("p")).await.unwrap();
        assert_eq!(session.find_within(&aside, &Locator::css("p")).await.unwrap(), nested);
        assert_eq!(session.state().unwrap().elements.len(), 5);
    }

    #[tokio::test]
    async fn test_stale_handle_is_reported() {
        let session = StaticPageSession::from_html("https://shop.test/p/1", PAGE);
        let err = session.text(&ElementId::new("el-42")).await.unwrap_err();
        assert!(matches!(err, SessionError::ElementNotFound(_)));
    }
}
