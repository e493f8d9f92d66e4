//! Page outcomes and batch reports
//!
//! Outcomes are plain serde data so a run can be written as JSON and read
//! back by other tools. The text renderers return strings; printing is left
//! to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::domain::price::{ExtractionResult, ResolvedPrice};
use crate::infrastructure::config::{ExtractionMode, SiteConfig};

/// Everything observed for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    pub site_name: String,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
    pub mode: ExtractionMode,
    /// Live watch result, the winning static candidates, or the failure of
    /// a page that could not be processed
    pub extraction: Option<ExtractionResult>,
    pub resolution: Option<ResolvedPrice>,
    /// Page-fatal error, if the page could not be processed at all
    pub error: Option<String>,
}

impl PageOutcome {
    pub fn new(site: &SiteConfig, mode: ExtractionMode) -> Self {
        Self {
            site_name: site.name.clone(),
            url: site.url.clone(),
            scraped_at: Utc::now(),
            mode,
            extraction: None,
            resolution: None,
            error: None,
        }
    }

    /// Mark the page as fatally failed. The extraction becomes a
    /// `found = false` result carrying the same diagnostic.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.extraction = Some(ExtractionResult::failed(error.clone()));
        self.error = Some(error);
        self
    }

    /// A price was obtained: the live container showed a marked candidate,
    /// or the resolver settled on a value.
    pub fn price_extracted_success(&self) -> bool {
        self.error.is_none()
            && (self.extraction.as_ref().is_some_and(ExtractionResult::found)
                || self.resolution.as_ref().is_some_and(|r| r.value().is_some()))
    }

    /// Best available price: the resolved value, else the first marked live
    /// candidate that parsed.
    pub fn price(&self) -> Option<f64> {
        self.resolution.as_ref().and_then(ResolvedPrice::value).or_else(|| {
            self.extraction
                .as_ref()
                .and_then(|e| e.first_marked())
                .and_then(|c| c.value)
        })
    }

    /// Why the page counts as failed, `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        if self.price_extracted_success() {
            return None;
        }
        let reason = self
            .error
            .clone()
            .or_else(|| self.extraction.as_ref().and_then(|e| e.error().map(str::to_string)))
            .unwrap_or_else(|| "no price identified in the extracted content".to_string());
        Some(reason)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Result of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub summary: BatchSummary,
    pub outcomes: Vec<PageOutcome>,
}

impl BatchReport {
    pub fn new(started_at: DateTime<Utc>, outcomes: Vec<PageOutcome>, cancelled: bool) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.price_extracted_success()).count();
        Self {
            started_at,
            finished_at: Utc::now(),
            cancelled,
            summary: BatchSummary {
                total: outcomes.len(),
                succeeded,
                failed: outcomes.len() - succeeded,
            },
            outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &PageOutcome> {
        self.outcomes.iter().filter(|o| !o.price_extracted_success())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize batch report")
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
        }
        fs::write(path, self.to_json_pretty()?)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {:?}", path);
        Ok(())
    }

    /// One block per page with status and price or reason.
    pub fn render_results(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(80);
        let _ = writeln!(out, "{rule}\nPRICE EXTRACTION RESULTS\n{rule}");

        if self.outcomes.is_empty() {
            let _ = writeln!(out, "No pages processed.");
            return out;
        }

        for (i, outcome) in self.outcomes.iter().enumerate() {
            let status = if outcome.price_extracted_success() { "OK  " } else { "FAIL" };
            let _ = writeln!(out, "{:02}. [{}] {} ({})", i + 1, status, outcome.site_name, outcome.mode);
            let _ = writeln!(out, "    URL: {}", outcome.url);
            match (outcome.price(), outcome.failure_reason()) {
                (_, Some(reason)) => {
                    let _ = writeln!(out, "    Reason: {reason}");
                }
                (Some(price), None) => {
                    let _ = writeln!(out, "    Price: {price:.2}");
                }
                (None, None) => {
                    let text = outcome
                        .extraction
                        .as_ref()
                        .and_then(|e| e.first_marked())
                        .map_or("-", |c| c.raw_text.as_str());
                    let _ = writeln!(out, "    Price: {text}");
                }
            }
        }
        out
    }

    /// Pages without an extracted price, with reasons.
    pub fn render_failed_summary(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(80);
        let _ = writeln!(out, "{rule}\nPAGES WITHOUT AN EXTRACTED PRICE\n{rule}");

        if self.summary.failed == 0 {
            let _ = writeln!(out, "Every page had its price extracted.");
        } else {
            let _ = writeln!(out, "Failed: {} of {}", self.summary.failed, self.summary.total);
            for (i, outcome) in self.failures().enumerate() {
                let reason = outcome.failure_reason().unwrap_or_default();
                let _ = writeln!(out, "{}. {}\n   URL: {}\n   Reason: {}", i + 1, outcome.site_name, outcome.url, reason);
            }
        }
        if self.cancelled {
            let _ = writeln!(out, "Run was cancelled before every page was processed.");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::{CandidateSource, PriceCandidate, SourceFindings};
    use tempfile::TempDir;

    fn site() -> SiteConfig {
        SiteConfig::new("loja", "https://loja.example.com/p/1")
    }

    fn live_outcome(marked: bool) -> PageOutcome {
        let candidate = PriceCandidate::new(CandidateSource::LiveDom, "R$ 59,90", marked, Some(59.9));
        PageOutcome {
            extraction: Some(ExtractionResult::from_history(vec![candidate], Vec::new(), None)),
            ..PageOutcome::new(&site(), ExtractionMode::Live)
        }
    }

    #[test]
    fn test_success_from_live_marker() {
        let outcome = live_outcome(true);
        assert!(outcome.price_extracted_success());
        assert_eq!(outcome.price(), Some(59.9));
        assert_eq!(outcome.failure_reason(), None);
    }

    #[test]
    fn test_success_from_resolution_only() {
        let mut findings = SourceFindings::new();
        findings.insert(
            CandidateSource::StructuredData,
            vec![PriceCandidate::new(CandidateSource::StructuredData, "20.00", true, Some(20.0))],
        );
        let outcome = PageOutcome {
            resolution: Some(ResolvedPrice::resolved(20.0, CandidateSource::StructuredData, findings)),
            ..PageOutcome::new(&site(), ExtractionMode::Static)
        };
        assert!(outcome.price_extracted_success());
        assert_eq!(outcome.price(), Some(20.0));
    }

    #[test]
    fn test_page_error_yields_failed_extraction() {
        let outcome = PageOutcome::new(&site(), ExtractionMode::Live).with_error("Page processing cancelled");
        let extraction = outcome.extraction.as_ref().unwrap();
        assert!(!extraction.found());
        assert!(extraction.candidates().is_empty());
        assert_eq!(extraction.error(), Some("Page processing cancelled"));
    }

    #[test]
    fn test_failure_reason_prefers_page_error() {
        let outcome = live_outcome(false).with_error("Root element did not appear within 30s");
        assert!(!outcome.price_extracted_success());
        assert_eq!(outcome.failure_reason().as_deref(), Some("Root element did not appear within 30s"));

        let outcome = live_outcome(false);
        assert_eq!(outcome.failure_reason().as_deref(), Some("no candidate carried a currency marker"));
    }

    #[tokio::test]
    async fn test_report_summary_and_json_file() {
        let report = BatchReport::new(Utc::now(), vec![live_outcome(true), live_outcome(false)], false);
        assert_eq!(report.summary, BatchSummary { total: 2, succeeded: 1, failed: 1 });
        assert_eq!(report.failures().count(), 1);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("run.json");
        report.write_to(&path).await.unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["summary"]["failed"], 1);
        assert_eq!(json["outcomes"][0]["mode"], "live");
        assert_eq!(json["outcomes"][0]["extraction"]["candidates"][0]["source"], "live_dom");
    }

    #[test]
    fn test_rendered_failed_summary_lists_reasons() {
        let report = BatchReport::new(Utc::now(), vec![live_outcome(false)], true);
        let text = report.render_failed_summary();
        assert!(text.contains("Failed: 1 of 1"));
        assert!(text.contains("currency marker"));
        assert!(text.contains("cancelled"));
        assert!(report.render_results().contains("[FAIL] loja"));
    }
}
