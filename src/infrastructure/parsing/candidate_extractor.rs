//! Live container candidate extraction
//!
//! Reads the text-bearing descendants of the product content container
//! through a `PageSession` and tags each one with the currency-marker flag.

use serde::Deserialize;
use tracing::debug;

use super::config::ParsingConfig;
use super::price_text::PriceTextParser;
use super::{ParsingError, ParsingResult};
use crate::domain::price::{CandidateSource, PriceCandidate};
use crate::infrastructure::browser::{ElementId, Locator, PageSession};

/// Extracts `live_dom` candidates from a content container
#[derive(Debug, Clone)]
pub struct CandidateExtractor {
    parser: PriceTextParser,
    container_locators: Vec<Locator>,
    node_locator: Locator,
}

#[derive(Debug, Deserialize)]
struct ScriptElement {
    found: bool,
    #[serde(default)]
    text: String,
    #[serde(default)]
    html: String,
}

impl CandidateExtractor {
    pub fn new(config: &ParsingConfig) -> Self {
        Self {
            parser: PriceTextParser::new(config.currency_marker.clone()),
            container_locators: config.container_selectors.iter().map(Locator::css).collect(),
            node_locator: Locator::css(config.candidate_node_selector.clone()),
        }
    }

    pub fn container_locators(&self) -> &[Locator] {
        &self.container_locators
    }

    /// Build one candidate from a node's text and markup.
    pub fn candidate_from(&self, text: &str, inner_html: &str) -> PriceCandidate {
        let raw_text = text.trim();
        let has_marker = self.parser.has_marker(raw_text) || self.parser.has_marker(inner_html);
        let value = self.parser.parse(raw_text);
        PriceCandidate::new(CandidateSource::LiveDom, raw_text, has_marker, value)
    }

    /// Find the content container, trying each configured selector in order.
    pub async fn locate_container(&self, session: &dyn PageSession) -> ParsingResult<ElementId> {
        for locator in &self.container_locators {
            if let Some(container) = session.find_first(locator).await? {
                debug!("Content container located with {}", locator);
                return Ok(container);
            }
        }
        let tried: Vec<String> = self.container_locators.iter().map(|l| l.as_str().to_string()).collect();
        Err(ParsingError::container_not_found(&tried))
    }

    /// Candidates for every text node of `container`, in document order.
    ///
    /// An empty container yields an empty sequence.
    pub async fn extract(&self, session: &dyn PageSession, container: &ElementId) -> ParsingResult<Vec<PriceCandidate>> {
        let nodes = session.find_within(container, &self.node_locator).await?;
        let mut candidates = Vec::with_capacity(nodes.len());

        for node in &nodes {
            let text = session.text(node).await?;
            let inner_html = session.inner_html(node).await?;
            candidates.push(self.candidate_from(&text, &inner_html));
        }

        debug!(
            "Extracted {} candidate(s), {} marked",
            candidates.len(),
            candidates.iter().filter(|c| c.has_marker).count()
        );
        Ok(candidates)
    }

    /// Locate the container and extract from it in one call.
    pub async fn extract_live(&self, session: &dyn PageSession) -> ParsingResult<Vec<PriceCandidate>> {
        let container = self.locate_container(session).await?;
        self.extract(session, &container).await
    }

    /// Single-element variant: evaluate a site-specific expression that
    /// returns the price element, and produce exactly one candidate from it.
    pub async fn extract_via_script(&self, session: &dyn PageSession, element_expression: &str) -> ParsingResult<Vec<PriceCandidate>> {
        let script = element_script(element_expression);
        let value = session.execute_script(&script).await?;

        let element: ScriptElement = serde_json::from_value(value).map_err(|e| ParsingError::ScriptResultMalformed {
            reason: e.to_string(),
        })?;
        if !element.found {
            return Err(ParsingError::ScriptElementNotFound);
        }

        Ok(vec![self.candidate_from(&element.text, element.html.trim())])
    }
}

fn element_script(element_expression: &str) -> String {
    format!(
        "var el = (function() {{ try {{ return {element_expression}; }} catch (e) {{ return null; }} }})();\n\
         if (!el) {{ return {{ found: false }}; }}\n\
         return {{ found: true, text: el.textContent || el.innerText || '', html: el.innerHTML || '' }};"
    )
}
