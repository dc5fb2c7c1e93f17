//! Sitemap resolution and build errors.

use crate::predicate::PredicateError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("sitemap path is empty")]
    MissingPath,

    #[error("malformed sitemap path `{0}`")]
    MalformedPath(String),

    #[error("invalid exclude pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid hostname `{0}` (expected an absolute http(s) URL)")]
    InvalidHostname(String),

    #[error("invalid lastmod `{0}` (expected YYYY-MM-DD or an RFC 3339 timestamp)")]
    InvalidLastmod(String),

    #[error("priority {0} is out of range 0.0..=1.0")]
    InvalidPriority(f64),

    #[error("filter failed")]
    Predicate(#[from] PredicateError),

    #[error("filter input could not be encoded")]
    FilterInput(#[from] serde_json::Error),

    #[error("path `{0}` is already registered by another sitemap")]
    DuplicatePath(String),

    #[error("IO error when writing `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}
