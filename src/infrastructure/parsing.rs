//! Price parsing infrastructure
//!
//! Text normalization, live candidate extraction and static multi-source
//! resolution, all driven by a shared `ParsingConfig`.

pub mod error;
pub mod config;
pub mod price_text;
pub mod candidate_extractor;
pub mod price_resolver;

// Re-export public types
pub use error::{ParsingError, ParsingResult};
pub use config::{DocumentSelectors, ParsingConfig, PlausibilityRange, ResolutionPolicy};
pub use price_text::{PriceTextParser, parse_price};
pub use candidate_extractor::CandidateExtractor;
pub use price_resolver::{MultiSourcePriceResolver, PriceStrategy};
