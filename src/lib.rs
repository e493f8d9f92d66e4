//! pricewatch - product price extraction for e-commerce pages
//!
//! Two extraction paths share one data model:
//!
//! - the live path drives a [`PageSession`](infrastructure::PageSession)
//!   through stabilization, watches the product container for late updates
//!   and keeps a history of what changed;
//! - the static path runs a multi-source resolver (structured data, embedded
//!   state, inline scripts, rendered text) over fetched HTML.

pub mod application;
pub mod domain;
pub mod infrastructure;

#[doc(hidden)]
pub mod test_utils;

pub use application::{BatchReport, BatchRunner, PageOutcome, PricePipeline};
pub use domain::{CandidateSource, ExtractionResult, PriceCandidate, ResolvedPrice};
pub use infrastructure::{AppConfig, SiteConfig};
