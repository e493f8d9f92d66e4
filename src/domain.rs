//! Domain module - price observation entities
//!
//! Pure data shared by the live and static extraction paths. Nothing in here
//! talks to a page, the network or the clock.

pub mod price;

pub use price::{
    CandidateSource, ExtractionResult, ExtractionSnapshot, PriceCandidate, ResolvedPrice, SourceFindings,
    same_candidates,
};
