//! Parsing and page-level error types
//!
//! `ParsingError` covers extraction failures that callers absorb or report
//! per page; `PageError` is the small set of failures that end processing of
//! a single page.

use std::time::Duration;
use thiserror::Error;

use crate::infrastructure::browser::SessionError;

#[derive(Error, Debug, Clone)]
pub enum ParsingError {
    #[error("Content container not found (tried: {})", tried_selectors.join(", "))]
    ContainerNotFound { tried_selectors: Vec<String> },

    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("Script result malformed: {reason}")]
    ScriptResultMalformed { reason: String },

    #[error("Price element not found via script expression")]
    ScriptElementNotFound,

    #[error("Session call failed: {0}")]
    Session(#[from] SessionError),
}

impl ParsingError {
    pub fn container_not_found(tried_selectors: &[String]) -> Self {
        Self::ContainerNotFound {
            tried_selectors: tried_selectors.to_vec(),
        }
    }

    pub fn invalid_selector(selector: &str, reason: impl ToString) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether a later attempt on the same page may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ContainerNotFound { .. } => true,
            Self::InvalidSelector { .. } => false,
            Self::InvalidPattern { .. } => false,
            Self::ScriptResultMalformed { .. } => true,
            Self::ScriptElementNotFound => true,
            Self::Session(err) => !matches!(err, SessionError::Cancelled),
        }
    }
}

pub type ParsingResult<T> = Result<T, ParsingError>;

/// Failures that abandon a single page
#[derive(Error, Debug, Clone)]
pub enum PageError {
    #[error("Root element did not appear within {timeout:?}")]
    RootElementTimeout { timeout: Duration },

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("Fetching {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Session could not be opened: {reason}")]
    SessionUnavailable { reason: String },

    #[error("Page processing cancelled")]
    Cancelled,
}

pub type PageResult<T> = Result<T, PageError>;
