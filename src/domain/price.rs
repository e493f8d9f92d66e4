//! Price observation entities
//!
//! Candidates, snapshots and results produced by the live and static
//! extraction paths. Both paths emit the same shapes so persistence and
//! reporting never need to know which path ran.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Where a price candidate was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// `application/ld+json` offers block
    StructuredData,
    /// Embedded application-state payload (e.g. `__NEXT_DATA__`)
    EmbeddedState,
    /// Any inline script payload
    InlineScript,
    /// Rendered document text
    FreeText,
    /// Text nodes of the live content container
    LiveDom,
}

impl CandidateSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StructuredData => "structured_data",
            Self::EmbeddedState => "embedded_state",
            Self::InlineScript => "inline_script",
            Self::FreeText => "free_text",
            Self::LiveDom => "live_dom",
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed piece of text that might represent a price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCandidate {
    pub source: CandidateSource,
    pub raw_text: String,
    pub value: Option<f64>,
    pub has_marker: bool,
}

impl PriceCandidate {
    /// Build a candidate. The marker flag is required up front so a value can
    /// never exist without it having been evaluated.
    pub fn new(source: CandidateSource, raw_text: impl Into<String>, has_marker: bool, value: Option<f64>) -> Self {
        Self {
            source,
            raw_text: raw_text.into(),
            value,
            has_marker,
        }
    }

    /// Value usable as a resolved price: marked and parsed.
    pub fn selectable_value(&self) -> Option<f64> {
        if self.has_marker { self.value } else { None }
    }

    /// Projection used for change detection between snapshots.
    pub fn projection(&self) -> (CandidateSource, &str, bool) {
        (self.source, self.raw_text.as_str(), self.has_marker)
    }
}

/// Structural equality over the `(source, raw_text, has_marker)` projection.
///
/// Parsed values are deliberately excluded: they are a pure function of
/// `raw_text`, so two sequences equal under this projection parse equally.
pub fn same_candidates(a: &[PriceCandidate], b: &[PriceCandidate]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|(left, right)| left.projection() == right.projection())
}

/// One point-in-time capture of a container's candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSnapshot {
    /// Offset from the start of monitoring
    #[serde(with = "duration_millis")]
    pub timestamp: Duration,
    /// Tick at which the snapshot was taken (0 = initial capture)
    pub tick: u32,
    pub candidates: Vec<PriceCandidate>,
}

impl ExtractionSnapshot {
    pub fn new(tick: u32, timestamp: Duration, candidates: Vec<PriceCandidate>) -> Self {
        Self {
            timestamp,
            tick,
            candidates,
        }
    }

    pub fn differs_from(&self, other: &Self) -> bool {
        !same_candidates(&self.candidates, &other.candidates)
    }
}

/// Outcome of one page-processing attempt on the live path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    found: bool,
    candidates: Vec<PriceCandidate>,
    history: Vec<ExtractionSnapshot>,
    error: Option<String>,
}

impl ExtractionResult {
    /// Build a result from the latest candidate sequence and retained history.
    ///
    /// `found` is derived, never supplied: it is true iff a marked candidate
    /// exists. When nothing was found and no error was given, a generic
    /// diagnostic is filled in so failed results always explain themselves.
    pub fn from_history(candidates: Vec<PriceCandidate>, history: Vec<ExtractionSnapshot>, error: Option<String>) -> Self {
        let found = candidates.iter().any(|c| c.has_marker);
        let error = if found {
            None
        } else {
            Some(error.unwrap_or_else(|| "no candidate carried a currency marker".to_string()))
        };
        Self {
            found,
            candidates,
            history,
            error,
        }
    }

    /// A result for an attempt that produced no candidates at all.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            found: false,
            candidates: Vec::new(),
            history: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub const fn found(&self) -> bool {
        self.found
    }

    pub fn candidates(&self) -> &[PriceCandidate] {
        &self.candidates
    }

    pub fn history(&self) -> &[ExtractionSnapshot] {
        &self.history
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// First marked candidate in document order.
    pub fn first_marked(&self) -> Option<&PriceCandidate> {
        self.candidates.iter().find(|c| c.has_marker)
    }
}

/// Candidates collected per source from one or more document snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFindings {
    by_source: BTreeMap<CandidateSource, Vec<PriceCandidate>>,
}

impl SourceFindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a strategy's candidates. Empty lists are not recorded.
    pub fn insert(&mut self, source: CandidateSource, candidates: Vec<PriceCandidate>) {
        if candidates.is_empty() {
            return;
        }
        self.by_source.insert(source, candidates);
    }

    pub fn get(&self, source: CandidateSource) -> Option<&[PriceCandidate]> {
        self.by_source.get(&source).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = CandidateSource> + '_ {
        self.by_source.keys().copied()
    }

    /// True when the only thing found is the (often stale) structured price.
    pub fn only_structured_data(&self) -> bool {
        self.by_source.len() == 1 && self.by_source.contains_key(&CandidateSource::StructuredData)
    }

    /// Merge findings from a newer snapshot: a source present in `newer`
    /// replaces the older list; sources only seen before are kept.
    pub fn merge_newer(mut self, newer: Self) -> Self {
        self.by_source.extend(newer.by_source);
        self
    }

    pub fn into_map(self) -> BTreeMap<CandidateSource, Vec<PriceCandidate>> {
        self.by_source
    }
}

/// The single trusted price picked from all findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    value: Option<f64>,
    source: Option<CandidateSource>,
    all_candidates_by_source: BTreeMap<CandidateSource, Vec<PriceCandidate>>,
}

impl ResolvedPrice {
    pub fn resolved(value: f64, source: CandidateSource, findings: SourceFindings) -> Self {
        Self {
            value: Some(value),
            source: Some(source),
            all_candidates_by_source: findings.into_map(),
        }
    }

    pub fn not_found(findings: SourceFindings) -> Self {
        Self {
            value: None,
            source: None,
            all_candidates_by_source: findings.into_map(),
        }
    }

    pub const fn value(&self) -> Option<f64> {
        self.value
    }

    pub const fn source(&self) -> Option<CandidateSource> {
        self.source
    }

    pub const fn all_candidates_by_source(&self) -> &BTreeMap<CandidateSource, Vec<PriceCandidate>> {
        &self.all_candidates_by_source
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(text: &str, marker: bool) -> PriceCandidate {
        PriceCandidate::new(CandidateSource::LiveDom, text, marker, None)
    }

    #[test]
    fn test_projection_ignores_value() {
        let a = vec![PriceCandidate::new(CandidateSource::LiveDom, "R$ 10,00", true, Some(10.0))];
        let b = vec![PriceCandidate::new(CandidateSource::LiveDom, "R$ 10,00", true, None)];
        assert!(same_candidates(&a, &b));
    }

    #[test]
    fn test_projection_detects_marker_and_length_changes() {
        let base = vec![live("Preço", false), live("R$ 10,00", true)];
        let flipped = vec![live("Preço", true), live("R$ 10,00", true)];
        assert!(!same_candidates(&base, &flipped));
        assert!(!same_candidates(&base, &base[..1]));
    }

    #[test]
    fn test_unmarked_candidate_is_never_selectable() {
        let candidate = PriceCandidate::new(CandidateSource::LiveDom, "10,50", false, Some(10.5));
        assert_eq!(candidate.selectable_value(), None);
    }

    #[test]
    fn test_result_found_is_derived_from_markers() {
        let result = ExtractionResult::from_history(vec![live("Frete grátis", false)], Vec::new(), None);
        assert!(!result.found());
        assert!(result.error().is_some());

        let result = ExtractionResult::from_history(vec![live("R$ 5,00", true)], Vec::new(), Some("ignored".into()));
        assert!(result.found());
        assert_eq!(result.error(), None);
    }

    #[test]
    fn test_merge_prefers_newer_per_source() {
        let mut older = SourceFindings::new();
        older.insert(CandidateSource::StructuredData, vec![PriceCandidate::new(CandidateSource::StructuredData, "20.00", true, Some(20.0))]);
        older.insert(CandidateSource::FreeText, vec![PriceCandidate::new(CandidateSource::FreeText, "R$ 9,90", true, Some(9.9))]);

        let mut newer = SourceFindings::new();
        newer.insert(CandidateSource::StructuredData, vec![PriceCandidate::new(CandidateSource::StructuredData, "18.00", true, Some(18.0))]);

        let merged = older.merge_newer(newer);
        assert_eq!(merged.get(CandidateSource::StructuredData).unwrap()[0].value, Some(18.0));
        assert_eq!(merged.get(CandidateSource::FreeText).unwrap()[0].value, Some(9.9));
    }

    #[test]
    fn test_snapshot_timestamp_serializes_as_millis() {
        let snapshot = ExtractionSnapshot::new(3, Duration::from_secs(3), Vec::new());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["timestamp"], 3000);
        assert_eq!(json["tick"], 3);
    }
}
