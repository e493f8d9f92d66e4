//! Application layer: per-page pipeline, batch runner and reporting
//!
//! Orchestrates the infrastructure components; holds no page or network
//! state of its own.

pub mod batch;
pub mod price_pipeline;
pub mod report;

pub use batch::BatchRunner;
pub use price_pipeline::PricePipeline;
pub use report::{BatchReport, BatchSummary, PageOutcome};
