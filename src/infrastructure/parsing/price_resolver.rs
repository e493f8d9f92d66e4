//! Multi-source price resolution over a static document snapshot
//!
//! Four independent strategies each produce zero or more tagged candidates;
//! the resolver then walks the configured priority list and takes the first
//! source with a selectable value. Strategies are best-effort: a malformed
//! block is skipped, never reported as an error.

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, trace};

use super::config::{DocumentSelectors, ParsingConfig, PlausibilityRange, ResolutionPolicy};
use super::price_text::{PriceTextParser, parse_amount};
use super::{ParsingError, ParsingResult};
use crate::domain::price::{CandidateSource, PriceCandidate, ResolvedPrice, SourceFindings};

/// One extraction strategy over a parsed document
pub trait PriceStrategy: Send + Sync {
    fn source(&self) -> CandidateSource;

    /// Candidates in the order the strategy wants them considered; the
    /// resolver takes the last selectable one.
    fn extract(&self, document: &Html) -> Vec<PriceCandidate>;
}

/// Resolver over a fixed, ordered strategy list
pub struct MultiSourcePriceResolver {
    strategies: Vec<Box<dyn PriceStrategy>>,
    policy: ResolutionPolicy,
}

impl MultiSourcePriceResolver {
    /// Create a resolver with default configuration
    pub fn new() -> ParsingResult<Self> {
        Self::with_config(&ParsingConfig::default())
    }

    /// Create resolver with custom selector configuration
    pub fn with_config(config: &ParsingConfig) -> ParsingResult<Self> {
        let selectors = &config.document;
        let parser = PriceTextParser::new(config.currency_marker.clone());

        let strategies: Vec<Box<dyn PriceStrategy>> = vec![
            Box::new(StructuredDataStrategy::new(&selectors.structured_data)?),
            Box::new(EmbeddedStateStrategy::new(selectors)?),
            Box::new(InlineScriptStrategy::new(selectors)?),
            Box::new(FreeTextStrategy::new(parser, selectors, config.policy.free_text_range)?),
        ];

        Ok(Self::from_strategies(strategies, config.policy.clone()))
    }

    pub fn from_strategies(strategies: Vec<Box<dyn PriceStrategy>>, policy: ResolutionPolicy) -> Self {
        Self { strategies, policy }
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Run every strategy against raw HTML.
    pub fn collect(&self, html: &str) -> SourceFindings {
        let document = Html::parse_document(html);
        self.collect_document(&document)
    }

    pub fn collect_document(&self, document: &Html) -> SourceFindings {
        let mut findings = SourceFindings::new();
        for strategy in &self.strategies {
            let candidates = strategy.extract(document);
            let source = strategy.source();
            debug!("Strategy {source} produced {} candidate(s)", candidates.len());
            findings.insert(source, candidates);
        }
        findings
    }

    /// Pick the final price. One-shot: the findings move into the result and
    /// are kept only for audit.
    pub fn resolve(&self, findings: SourceFindings) -> ResolvedPrice {
        let winner = self.policy.priority.iter().find_map(|source| {
            findings
                .get(*source)
                .and_then(|candidates| candidates.iter().rev().find_map(PriceCandidate::selectable_value))
                .map(|value| (value, *source))
        });

        match winner {
            Some((value, source)) => {
                debug!("Resolved price {value:.2} from {source}");
                ResolvedPrice::resolved(value, source, findings)
            }
            None => {
                debug!("No strategy yielded a price");
                ResolvedPrice::not_found(findings)
            }
        }
    }

    /// Collect and resolve in one step.
    pub fn resolve_html(&self, html: &str) -> ResolvedPrice {
        self.resolve(self.collect(html))
    }
}

fn compile_selector(selector: &str) -> ParsingResult<Selector> {
    Selector::parse(selector).map_err(|e| ParsingError::invalid_selector(selector, e))
}

fn compile_pattern(name: &str, pattern: &str) -> ParsingResult<Regex> {
    Regex::new(pattern).map_err(|e| ParsingError::InvalidPattern {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// One `"key": number` pattern per key, in configured order.
fn key_patterns(name: &str, keys: &[String], quoted: bool) -> ParsingResult<Vec<Regex>> {
    keys.iter()
        .map(|key| {
            let key = regex::escape(key);
            let pattern = if quoted {
                format!(r#""{key}"\s*:\s*(\d+(?:\.\d+)?)"#)
            } else {
                format!(r"\b{key}\s*:\s*(\d+(?:\.\d+)?)")
            };
            compile_pattern(name, &pattern)
        })
        .collect()
}

/// Matches of the first pattern that yields any, in order.
fn first_key_matches(patterns: &[Regex], text: &str, source: CandidateSource) -> Vec<PriceCandidate> {
    patterns
        .iter()
        .map(|pattern| numeric_matches(pattern, text, source))
        .find(|matches| !matches.is_empty())
        .unwrap_or_default()
}

fn key_alternation(keys: &[String]) -> String {
    keys.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|")
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Numeric captures of `pattern` in `text`, positives only, in order.
fn numeric_matches(pattern: &Regex, text: &str, source: CandidateSource) -> Vec<PriceCandidate> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?.as_str();
            let value = caps.get(1)?.as_str().parse::<f64>().ok().and_then(positive)?;
            Some(PriceCandidate::new(source, whole, true, Some(value)))
        })
        .collect()
}

/// `offers.price` in `application/ld+json` blocks; first valid value wins
pub struct StructuredDataStrategy {
    selector: Selector,
}

impl StructuredDataStrategy {
    pub fn new(selector: &str) -> ParsingResult<Self> {
        Ok(Self {
            selector: compile_selector(selector)?,
        })
    }

    fn offer_price(node: &Value) -> Option<(String, f64)> {
        match node {
            Value::Array(items) => items.iter().find_map(Self::offer_price),
            Value::Object(map) => {
                let offered = map.get("offers").and_then(|offers| match offers {
                    Value::Array(list) => list.iter().find_map(|o| o.get("price").and_then(Self::price_value)),
                    other => other.get("price").and_then(Self::price_value),
                });
                if offered.is_some() {
                    return offered;
                }
                map.get("@graph").and_then(Self::offer_price)
            }
            _ => None,
        }
    }

    fn price_value(price: &Value) -> Option<(String, f64)> {
        match price {
            Value::Number(n) => n.as_f64().and_then(positive).map(|v| (n.to_string(), v)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(positive)
                .or_else(|| parse_amount(s))
                .map(|v| (s.clone(), v)),
            _ => None,
        }
    }
}

impl PriceStrategy for StructuredDataStrategy {
    fn source(&self) -> CandidateSource {
        CandidateSource::StructuredData
    }

    fn extract(&self, document: &Html) -> Vec<PriceCandidate> {
        for block in document.select(&self.selector) {
            let content = block.text().collect::<String>();
            let data: Value = match serde_json::from_str(content.trim()) {
                Ok(data) => data,
                Err(e) => {
                    trace!("Skipping malformed structured data block: {e}");
                    continue;
                }
            };
            if let Some((raw, value)) = Self::offer_price(&data) {
                return vec![PriceCandidate::new(self.source(), raw, true, Some(value))];
            }
        }
        Vec::new()
    }
}

/// Price-like keys in the embedded application state. Keys are tried in
/// order; the first key with a match supplies its last match.
pub struct EmbeddedStateStrategy {
    selector: Selector,
    patterns: Vec<Regex>,
}

impl EmbeddedStateStrategy {
    pub fn new(selectors: &DocumentSelectors) -> ParsingResult<Self> {
        Ok(Self {
            selector: compile_selector(&selectors.embedded_state)?,
            patterns: key_patterns("embedded_state", &selectors.embedded_state_keys, true)?,
        })
    }
}

impl PriceStrategy for EmbeddedStateStrategy {
    fn source(&self) -> CandidateSource {
        CandidateSource::EmbeddedState
    }

    fn extract(&self, document: &Html) -> Vec<PriceCandidate> {
        let Some(payload) = document.select(&self.selector).next() else {
            return Vec::new();
        };
        let content = payload.text().collect::<String>();
        first_key_matches(&self.patterns, &content, self.source())
            .pop()
            .into_iter()
            .collect()
    }
}

/// Price-like keys in any script. Quoted keys are tried before bare ones;
/// the first script where some key matches supplies that key's full list.
pub struct InlineScriptStrategy {
    selector: Selector,
    patterns: Vec<Regex>,
}

impl InlineScriptStrategy {
    pub fn new(selectors: &DocumentSelectors) -> ParsingResult<Self> {
        let mut patterns = key_patterns("inline_script", &selectors.inline_script_quoted_keys, true)?;
        patterns.extend(key_patterns("inline_script", &selectors.inline_script_bare_keys, false)?);
        if patterns.is_empty() {
            return Err(ParsingError::InvalidPattern {
                name: "inline_script".to_string(),
                reason: "no key names configured".to_string(),
            });
        }
        Ok(Self {
            selector: compile_selector(&selectors.inline_script)?,
            patterns,
        })
    }
}

impl PriceStrategy for InlineScriptStrategy {
    fn source(&self) -> CandidateSource {
        CandidateSource::InlineScript
    }

    fn extract(&self, document: &Html) -> Vec<PriceCandidate> {
        document
            .select(&self.selector)
            .map(|script| script.text().collect::<String>())
            .filter(|content| !content.trim().is_empty())
            .map(|content| first_key_matches(&self.patterns, &content, self.source()))
            .find(|matches| !matches.is_empty())
            .unwrap_or_default()
    }
}

/// Currency-shaped substrings of the rendered text, filtered by plausibility
pub struct FreeTextStrategy {
    parser: PriceTextParser,
    pattern: Regex,
    range: PlausibilityRange,
}

const FREE_TEXT_AMOUNT: &str = r"\d{1,3}(?:\.\d{3})+(?:,\d{2})?|\d+[.,]\d{2}";
const NON_RENDERED: [&str; 4] = ["script", "style", "noscript", "template"];

impl FreeTextStrategy {
    pub fn new(parser: PriceTextParser, selectors: &DocumentSelectors, range: PlausibilityRange) -> ParsingResult<Self> {
        let mut alternatives = Vec::new();
        if !parser.currency_marker().is_empty() {
            alternatives.push(format!(r"{}\s*(?:{FREE_TEXT_AMOUNT})", regex::escape(parser.currency_marker())));
        }
        if !selectors.free_text_suffix_words.is_empty() {
            alternatives.push(format!(
                r"(?:{FREE_TEXT_AMOUNT})\s*(?:{})\b",
                key_alternation(&selectors.free_text_suffix_words)
            ));
        }
        if alternatives.is_empty() {
            return Err(ParsingError::InvalidPattern {
                name: "free_text".to_string(),
                reason: "neither a currency marker nor suffix words configured".to_string(),
            });
        }
        let pattern = format!("(?i){}", alternatives.join("|"));
        Ok(Self {
            parser,
            pattern: compile_pattern("free_text", &pattern)?,
            range,
        })
    }

    /// Rendered text: every text node outside script-like elements.
    fn rendered_text(document: &Html) -> String {
        document
            .root_element()
            .descendants()
            .filter_map(|node| {
                let text = node.value().as_text()?;
                let parent_name = node.parent().and_then(|p| p.value().as_element().map(|e| e.name()));
                if parent_name.is_some_and(|name| NON_RENDERED.contains(&name)) {
                    return None;
                }
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Accepted candidates in `text`, in order of appearance.
    pub fn scan(&self, text: &str) -> Vec<PriceCandidate> {
        self.pattern
            .find_iter(text)
            .filter_map(|m| {
                let raw = m.as_str();
                let value = self.parser.parse(raw)?;
                if !self.range.contains(value) {
                    trace!("Rejected implausible free-text amount {value} ({raw})");
                    return None;
                }
                Some(PriceCandidate::new(CandidateSource::FreeText, raw, true, Some(value)))
            })
            .collect()
    }
}

impl PriceStrategy for FreeTextStrategy {
    fn source(&self) -> CandidateSource {
        CandidateSource::FreeText
    }

    fn extract(&self, document: &Html) -> Vec<PriceCandidate> {
        self.scan(&Self::rendered_text(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> MultiSourcePriceResolver {
        MultiSourcePriceResolver::new().unwrap()
    }

    const LD_JSON_20: &str = r#"<script type="application/ld+json">{"@type":"Product","offers":{"@type":"Offer","price":"20.00","priceCurrency":"BRL"}}</script>"#;
    const NEXT_DATA_1990: &str = r#"<script id="__NEXT_DATA__" type="application/json">{"props":{"product":{"price":25.5,"offer":{"price":19.90}}}}</script>"#;

    #[test]
    fn test_embedded_state_beats_structured_data() {
        let html = format!("<html><head>{LD_JSON_20}</head><body>{NEXT_DATA_1990}</body></html>");
        let resolved = resolver().resolve_html(&html);
        assert_eq!(resolved.value(), Some(19.90));
        assert_eq!(resolved.source(), Some(CandidateSource::EmbeddedState));
        assert!(resolved.all_candidates_by_source().contains_key(&CandidateSource::StructuredData));
    }

    #[test]
    fn test_embedded_state_takes_last_match() {
        let findings = resolver().collect(&format!("<body>{NEXT_DATA_1990}</body>"));
        let embedded = findings.get(CandidateSource::EmbeddedState).unwrap();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].value, Some(19.90));
    }

    #[test]
    fn test_embedded_state_key_order_beats_later_fields() {
        let html = r#"<script id="__NEXT_DATA__">{"product":{"price":19.90,"rating":{"value":4}}}</script>"#;
        let resolved = resolver().resolve_html(html);
        assert_eq!(resolved.source(), Some(CandidateSource::EmbeddedState));
        assert_eq!(resolved.value(), Some(19.90));
    }

    #[test]
    fn test_embedded_state_uses_later_key_when_earlier_absent() {
        let html = r#"<script id="__NEXT_DATA__">{"rating":{"value":4},"offer":{"lowPrice":15.5,"lowPrice":14.0}}</script>"#;
        let findings = resolver().collect(html);
        assert_eq!(findings.get(CandidateSource::EmbeddedState).unwrap()[0].value, Some(14.0));
    }

    #[test]
    fn test_structured_data_skips_offers_without_valid_price() {
        let html = r#"<script type="application/ld+json">{"offers":[{"price":""},{"price":"99.90"}]}</script>"#;
        let resolved = resolver().resolve_html(html);
        assert_eq!(resolved.source(), Some(CandidateSource::StructuredData));
        assert_eq!(resolved.value(), Some(99.90));
    }

    #[test]
    fn test_structured_data_offer_list_and_graph() {
        let html = r#"<script type="application/ld+json">not json</script>
            <script type="application/ld+json">{"@graph":[{"@type":"WebPage"},{"@type":"Product","offers":[{"price":149.9},{"price":99}]}]}</script>"#;
        let findings = resolver().collect(html);
        let structured = findings.get(CandidateSource::StructuredData).unwrap();
        assert_eq!(structured.len(), 1);
        assert_eq!(structured[0].value, Some(149.9));
    }

    #[test]
    fn test_inline_script_uses_first_matching_script_and_first_matching_key() {
        let html = r#"<script>var tracking = {};</script>
            <script>window.dataLayer = [{"price": 0}, {"price": 35.5}, {"price": 33.9}, {valor: 32.9}];</script>
            <script>var later = {"preco": 12};</script>"#;
        let findings = resolver().collect(html);
        let inline = findings.get(CandidateSource::InlineScript).unwrap();
        let values: Vec<f64> = inline.iter().filter_map(|c| c.value).collect();
        assert_eq!(values, vec![35.5, 33.9]);

        let resolved = resolver().resolve(findings);
        assert_eq!(resolved.source(), Some(CandidateSource::InlineScript));
        assert_eq!(resolved.value(), Some(33.9));
    }

    #[test]
    fn test_inline_script_instalment_value_does_not_override_price() {
        let html = r#"<script>var d = {"price": 35.5, "parcelas": {valor: 3.55}};</script>"#;
        let resolved = resolver().resolve_html(html);
        assert_eq!(resolved.source(), Some(CandidateSource::InlineScript));
        assert_eq!(resolved.value(), Some(35.5));
    }

    #[test]
    fn test_inline_script_falls_back_to_bare_keys() {
        let html = r"<script>var d = {sku: 123, valor: 12.5, valor: 14};</script>";
        let findings = resolver().collect(html);
        let values: Vec<f64> = findings.get(CandidateSource::InlineScript).unwrap().iter().filter_map(|c| c.value).collect();
        assert_eq!(values, vec![12.5, 14.0]);
    }

    #[test]
    fn test_free_text_plausibility_filter() {
        let html = "<body><p>Antes R$ 12345,00</p><p>Agora R$ 99,90</p><script>var x = 'R$ 55,00';</script></body>";
        let findings = resolver().collect(html);
        let free = findings.get(CandidateSource::FreeText).unwrap();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].raw_text, "R$ 99,90");
        assert_eq!(free[0].value, Some(99.90));
    }

    #[test]
    fn test_free_text_suffix_word_and_last_wins() {
        let html = "<body><span>de 150,00 reais</span> <span>por R$ 120,00</span></body>";
        let resolved = resolver().resolve_html(html);
        assert_eq!(resolved.source(), Some(CandidateSource::FreeText));
        assert_eq!(resolved.value(), Some(120.0));
        assert_eq!(resolved.all_candidates_by_source()[&CandidateSource::FreeText].len(), 2);
    }

    #[test]
    fn test_nothing_found_is_not_zero() {
        let resolved = resolver().resolve_html("<html><body><p>Produto indisponível</p></body></html>");
        assert_eq!(resolved.value(), None);
        assert_eq!(resolved.source(), None);
        assert!(resolved.all_candidates_by_source().is_empty());
    }

    #[test]
    fn test_custom_priority_is_honoured() {
        let mut config = ParsingConfig::default();
        config.policy.priority = vec![CandidateSource::StructuredData, CandidateSource::EmbeddedState];
        let resolver = MultiSourcePriceResolver::with_config(&config).unwrap();
        let html = format!("<html><head>{LD_JSON_20}</head><body>{NEXT_DATA_1990}</body></html>");
        let resolved = resolver.resolve_html(&html);
        assert_eq!(resolved.value(), Some(20.0));
        assert_eq!(resolved.source(), Some(CandidateSource::StructuredData));
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let mut config = ParsingConfig::default();
        config.document.embedded_state = "script[".to_string();
        assert!(matches!(
            MultiSourcePriceResolver::with_config(&config),
            Err(ParsingError::InvalidSelector { .. })
        ));
    }
}
