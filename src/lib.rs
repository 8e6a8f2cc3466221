//! Stream Scraper Library
//!
//! Resolves an external media identifier (IMDb `tt…` or `tmdb:<id>`, plus
//! season and episode) into direct playable stream URLs scraped from an
//! Italian-language streaming index. The work is split into a title
//! matcher, an episode locator, a gate traversal layer (redirects, cookie
//! challenges, digit CAPTCHAs) and per-provider extractors.

pub mod assembler;
pub mod config;
pub mod constants;
pub mod error;
pub mod gate;
pub mod hosts;
pub mod metadata;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod scraper;
pub mod search;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{AppError, AppResult, FailureReason};
pub use models::{ErrorResponse, RequestArgs, StreamResponse};
pub use pipeline::Pipeline;
