//! Global error handling module for the stream scraper
//!
//! This module provides the unified error type and the failure taxonomy
//! reported in diagnostics. Errors local to one candidate, fragment or link
//! are downgraded to diagnostics by the pipeline; only exhaustion of every
//! alternative surfaces as a request-level reason.

use serde::Serialize;
use thiserror::Error;

use crate::gate::GateError;
use crate::hosts::HostError;
use crate::metadata::MetadataError;
use crate::scraper::ScraperError;

/// Reason codes printed in `diag.reason` and per-link failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Identifier could not be parsed
    InvalidIdentifier,
    /// No season/episode given; movies are not supported
    IsMovie,
    /// Metadata lookup failed; the raw id was used as title
    MetadataUnresolved,
    /// The site search endpoint could not be reached or parsed
    SearchRequestFailed,
    /// The site search returned nothing
    NoSearchResults,
    /// Every candidate was rejected on title
    NoTitleMatch,
    /// Candidates matched but no episode row yielded a stream
    NoEpisodeMatch,
    /// Candidates excluded for year mismatch
    YearDriftRejected,
    /// CAPTCHA retries exhausted or OCR unavailable
    GateChallengeFailed,
    /// A provider page did not yield a media URL
    HostExtractionFailed,
    /// Unexpected failure outside the modelled taxonomy
    InternalError,
}

/// Application-wide error type that unifies all error sources
#[derive(Debug, Error)]
pub enum AppError {
    /// Transport errors (network, HTTP status, body)
    #[error("Scraping error: {0}")]
    Scraping(#[from] ScraperError),

    /// Metadata lookup errors
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Anti-bot gate errors
    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    /// Provider extraction errors
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Identifier could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Create an invalid identifier error
    pub fn invalid_identifier(id: impl Into<String>) -> Self {
        AppError::InvalidIdentifier(id.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Reason code reported for this error
    pub fn reason(&self) -> FailureReason {
        match self {
            AppError::Scraping(_) => FailureReason::SearchRequestFailed,
            AppError::Metadata(_) => FailureReason::MetadataUnresolved,
            AppError::Gate(_) => FailureReason::GateChallengeFailed,
            AppError::Host(HostError::Gate(_)) => FailureReason::GateChallengeFailed,
            AppError::Host(_) => FailureReason::HostExtractionFailed,
            AppError::InvalidIdentifier(_) => FailureReason::InvalidIdentifier,
            AppError::Internal(_) => FailureReason::InternalError,
        }
    }
}

/// Result type alias for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
