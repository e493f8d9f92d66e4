//! Infrastructure layer: page sessions, parsing and external integrations
//!
//! The live path (`browser`, `page_stabilizer`, `mutation_watcher`,
//! `parsing::candidate_extractor`) and the static path
//! (`http_client`, `parsing::price_resolver`) meet in the application layer.

pub mod browser;
pub mod config;
pub mod http_client;
pub mod logging;
pub mod mutation_watcher;
pub mod page_stabilizer;
pub mod parsing;
pub mod parsing_error;
pub mod static_page;

// Re-export commonly used items
pub use browser::{ElementId, Locator, PageSession, SessionError, SessionFactory, SessionResult, WaitOutcome};
pub use config::{AppConfig, BatchConfig, ConfigManager, ExtractionMode, PipelineConfig, SiteConfig};
pub use http_client::{HttpClient, HttpClientConfig};
pub use logging::{init_logging, init_logging_with_config, get_log_directory};
pub use mutation_watcher::{MutationWatcher, WatcherConfig};
pub use page_stabilizer::{PageStabilizer, StabilizationReport, StabilizerConfig};
pub use parsing::{CandidateExtractor, MultiSourcePriceResolver, ParsingConfig, ParsingError, ParsingResult};
pub use parsing_error::{PageError, PageResult};
pub use static_page::{StaticPageSession, StaticSessionFactory};
