//! Configuration error types.

use crate::sitemap::SitemapError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors of `sitemap.toml` itself. Errors of a single `[[sitemap]]` table
/// surface when that table is resolved, as a [`SitemapError`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config file parsing error")]
    Toml(#[from] toml::de::Error),

    #[error("[app.base] `{0}` must start with `/`")]
    InvalidBase(String),

    #[error("[app.hostname] is invalid")]
    InvalidHostname(#[source] SitemapError),
}
