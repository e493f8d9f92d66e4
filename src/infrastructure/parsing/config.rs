//! Parsing configuration for price extraction
//!
//! Centralized selector lists, script key names and resolution policy. Order
//! inside every list is significant: lists are tried front to back and the
//! first hit wins.

use serde::{Deserialize, Serialize};

use crate::domain::price::CandidateSource;
use super::price_text::DEFAULT_CURRENCY_MARKER;

/// Main parsing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    /// Token that marks a fragment as monetary
    pub currency_marker: String,

    /// Live content container selectors - multiple fallbacks
    pub container_selectors: Vec<String>,

    /// Text-bearing descendants of the container
    pub candidate_node_selector: String,

    /// Static document strategy selectors and key names
    pub document: DocumentSelectors,

    /// Resolution order and plausibility bounds
    pub policy: ResolutionPolicy,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            currency_marker: DEFAULT_CURRENCY_MARKER.to_string(),
            container_selectors: vec![
                "aside[data-test='product-details-info']".to_string(),
                "[data-test='product-details-info']".to_string(),
                "aside".to_string(),
            ],
            candidate_node_selector: "p".to_string(),
            document: DocumentSelectors::default(),
            policy: ResolutionPolicy::default(),
        }
    }
}

/// Selectors and key names used by the static document strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSelectors {
    /// Machine-readable structured data blocks
    pub structured_data: String,

    /// The single embedded application-state payload
    pub embedded_state: String,

    /// Every script payload
    pub inline_script: String,

    /// Price-like keys looked up in the embedded state (quoted JSON keys)
    pub embedded_state_keys: Vec<String>,

    /// Price-like keys looked up in any script, quoted form
    pub inline_script_quoted_keys: Vec<String>,

    /// Price-like keys looked up in any script, bare object-literal form
    pub inline_script_bare_keys: Vec<String>,

    /// Words that mark an amount written before the currency name (e.g. "reais")
    pub free_text_suffix_words: Vec<String>,
}

impl Default for DocumentSelectors {
    fn default() -> Self {
        Self {
            structured_data: "script[type='application/ld+json']".to_string(),
            embedded_state: "script#__NEXT_DATA__".to_string(),
            inline_script: "script".to_string(),
            embedded_state_keys: vec![
                "price".to_string(),
                "lowPrice".to_string(),
                "value".to_string(),
                "Price".to_string(),
            ],
            inline_script_quoted_keys: vec![
                "price".to_string(),
                "valor".to_string(),
                "preco".to_string(),
            ],
            inline_script_bare_keys: vec!["price".to_string(), "valor".to_string()],
            free_text_suffix_words: vec!["reais".to_string(), "real".to_string()],
        }
    }
}

/// Half-open plausibility interval `(min_exclusive, max_inclusive]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityRange {
    pub min_exclusive: f64,
    pub max_inclusive: f64,
}

impl Default for PlausibilityRange {
    fn default() -> Self {
        Self {
            min_exclusive: 1.0,
            max_inclusive: 1000.0,
        }
    }
}

impl PlausibilityRange {
    pub fn contains(&self, value: f64) -> bool {
        value > self.min_exclusive && value <= self.max_inclusive
    }

    pub fn is_well_formed(&self) -> bool {
        self.min_exclusive.is_finite() && self.max_inclusive.is_finite() && self.min_exclusive < self.max_inclusive
    }
}

/// Resolution tie-break policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionPolicy {
    /// Sources in priority order; the first one with a selectable candidate wins
    pub priority: Vec<CandidateSource>,

    /// Accepted range for free-text amounts
    pub free_text_range: PlausibilityRange,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            priority: vec![
                CandidateSource::EmbeddedState,
                CandidateSource::InlineScript,
                CandidateSource::StructuredData,
                CandidateSource::FreeText,
            ],
            free_text_range: PlausibilityRange::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_order() {
        let policy = ResolutionPolicy::default();
        assert_eq!(
            policy.priority,
            vec![
                CandidateSource::EmbeddedState,
                CandidateSource::InlineScript,
                CandidateSource::StructuredData,
                CandidateSource::FreeText,
            ]
        );
    }

    #[test]
    fn test_plausibility_bounds() {
        let range = PlausibilityRange::default();
        assert!(!range.contains(1.0));
        assert!(range.contains(1.01));
        assert!(range.contains(1000.0));
        assert!(!range.contains(1000.01));
        assert!(range.is_well_formed());
        assert!(!PlausibilityRange { min_exclusive: 5.0, max_inclusive: 5.0 }.is_well_formed());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ParsingConfig = serde_json::from_str(r#"{"currency_marker": "€"}"#).unwrap();
        assert_eq!(config.currency_marker, "€");
        assert_eq!(config.candidate_node_selector, "p");
        assert_eq!(config.policy, ResolutionPolicy::default());
    }
}
