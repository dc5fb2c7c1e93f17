//! Sitemap options: the raw form read from `sitemap.toml`, the resolved
//! form every later stage works with, and the resolver between them.
//!
//! # Classification
//!
//! A node is a sitemap index iff its `sitemaps` list is non-empty. The
//! resolver decides this once and returns a tagged [`ResolvedNode`]; the
//! same rule classifies a resolved node read back from the runtime file.
//!
//! # Defaults
//!
//! | Field        | Sitemap          | Index                 |
//! |--------------|------------------|-----------------------|
//! | `path`       | `/sitemap.xml`   | `/sitemapindex.xml`   |
//! | `path_gzip`  | `path + ".gz"`   | `path + ".gz"`        |
//! | `gzip`       | `true`           | `true`                |
//! | `cache_time` | 900 seconds      | 900 seconds           |
//! | `etag`       | `true`           | `true`                |
//! | `hostname`   | `[app].hostname` | `[app].hostname`      |
//! | `base`       | `[app].base`     | `[app].base`          |

use super::SitemapError;
use crate::{
    log,
    predicate::Predicate,
    routes::{ChangeFreq, Exclusions, Route, RouteEntry},
};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

pub const DEFAULT_PATH: &str = "/sitemap.xml";
pub const DEFAULT_INDEX_PATH: &str = "/sitemapindex.xml";
pub const DEFAULT_CACHE_TIME: u64 = 900;
pub const DEFAULT_I18N_SEPARATOR: &str = "___";

/// Application-wide values a resolution depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct AppContext {
    /// Router base path, `/` unless the app is mounted elsewhere.
    pub base: String,
    /// Fallback hostname for sitemaps that set none.
    pub hostname: Option<String>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self { base: "/".into(), hostname: None }
    }
}

/// Values applied to every `<url>` that does not carry its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UrlDefaults {
    pub changefreq: Option<ChangeFreq>,
    pub priority: Option<f64>,
    pub lastmod: Option<String>,
}

/// Alternate-language links between routes named `<page><separator><locale>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct I18nOptions {
    pub locales: Vec<String>,
    #[serde(default)]
    pub default_locale: Option<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    DEFAULT_I18N_SEPARATOR.into()
}

// ============================================================================
// Raw options
// ============================================================================

/// One `[[sitemap]]` table as written. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SitemapOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_gzip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteEntry>,
    /// Seconds a computed route list stays fresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gzip: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_ns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xsl_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_slash: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastmod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i18n: Option<I18nOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<UrlDefaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_on_build: Option<bool>,
    /// Deprecated, accepted and ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sitemaps: Vec<SitemapOptions>,
}

/// A node is an index iff it lists at least one child sitemap.
pub fn is_index(raw: &SitemapOptions) -> bool {
    !raw.sitemaps.is_empty()
}

// ============================================================================
// Resolved options
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedSitemap {
    pub path: String,
    pub path_gzip: String,
    pub hostname: Option<String>,
    pub exclude: Vec<String>,
    pub routes: Vec<Route>,
    pub cache_time: u64,
    pub etag: bool,
    pub filter: Option<Predicate>,
    pub gzip: bool,
    pub xml_ns: Option<String>,
    pub xsl_url: Option<String>,
    pub trailing_slash: Option<bool>,
    pub lastmod: Option<String>,
    pub i18n: Option<I18nOptions>,
    pub defaults: Option<UrlDefaults>,
    pub base: String,
    pub generate_on_build: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedIndex {
    pub path: String,
    pub path_gzip: String,
    pub hostname: Option<String>,
    pub cache_time: u64,
    pub etag: bool,
    pub gzip: bool,
    pub xml_ns: Option<String>,
    pub xsl_url: Option<String>,
    pub lastmod: Option<String>,
    pub base: String,
    pub generate_on_build: bool,
    pub sitemaps: Vec<ResolvedNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResolvedNode {
    Sitemap(ResolvedSitemap),
    Index(ResolvedIndex),
}

macro_rules! node_field {
    ($self:ident . $field:ident) => {
        match $self {
            ResolvedNode::Sitemap(s) => &s.$field,
            ResolvedNode::Index(i) => &i.$field,
        }
    };
}

impl ResolvedNode {
    #[cfg(test)]
    pub const fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    pub fn path(&self) -> &str {
        node_field!(self.path)
    }

    pub fn path_gzip(&self) -> &str {
        node_field!(self.path_gzip)
    }

    pub fn hostname(&self) -> Option<&str> {
        node_field!(self.hostname).as_deref()
    }

    pub fn lastmod(&self) -> Option<&str> {
        node_field!(self.lastmod).as_deref()
    }

    pub fn gzip(&self) -> bool {
        *node_field!(self.gzip)
    }

    pub fn etag(&self) -> bool {
        *node_field!(self.etag)
    }

    pub fn generate_on_build(&self) -> bool {
        *node_field!(self.generate_on_build)
    }
}

/// Classified structurally, like raw options: a non-empty `sitemaps`
/// array makes an index.
impl<'de> Deserialize<'de> for ResolvedNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let index = value
            .get("sitemaps")
            .and_then(Value::as_array)
            .is_some_and(|s| !s.is_empty());

        if index {
            serde_json::from_value(value).map(Self::Index).map_err(de::Error::custom)
        } else {
            serde_json::from_value(value).map(Self::Sitemap).map_err(de::Error::custom)
        }
    }
}

impl From<&ResolvedSitemap> for SitemapOptions {
    fn from(s: &ResolvedSitemap) -> Self {
        Self {
            path: Some(s.path.clone()),
            path_gzip: Some(s.path_gzip.clone()),
            hostname: s.hostname.clone(),
            exclude: s.exclude.clone(),
            routes: s.routes.iter().map(RouteEntry::from).collect(),
            cache_time: Some(s.cache_time),
            etag: Some(s.etag),
            filter: s.filter.clone(),
            gzip: Some(s.gzip),
            xml_ns: s.xml_ns.clone(),
            xsl_url: s.xsl_url.clone(),
            trailing_slash: s.trailing_slash,
            lastmod: s.lastmod.clone(),
            i18n: s.i18n.clone(),
            defaults: s.defaults.clone(),
            base: Some(s.base.clone()),
            generate_on_build: Some(s.generate_on_build),
            generate: None,
            sitemaps: Vec::new(),
        }
    }
}

impl From<&ResolvedIndex> for SitemapOptions {
    fn from(i: &ResolvedIndex) -> Self {
        Self {
            path: Some(i.path.clone()),
            path_gzip: Some(i.path_gzip.clone()),
            hostname: i.hostname.clone(),
            cache_time: Some(i.cache_time),
            etag: Some(i.etag),
            gzip: Some(i.gzip),
            xml_ns: i.xml_ns.clone(),
            xsl_url: i.xsl_url.clone(),
            lastmod: i.lastmod.clone(),
            base: Some(i.base.clone()),
            generate_on_build: Some(i.generate_on_build),
            sitemaps: i.sitemaps.iter().map(SitemapOptions::from).collect(),
            ..Self::default()
        }
    }
}

impl From<&ResolvedNode> for SitemapOptions {
    fn from(node: &ResolvedNode) -> Self {
        match node {
            ResolvedNode::Sitemap(s) => s.into(),
            ResolvedNode::Index(i) => i.into(),
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolve a node of either kind. `nested` is true for children of an index.
pub fn resolve(raw: &SitemapOptions, app: &AppContext, nested: bool) -> Result<ResolvedNode, SitemapError> {
    if is_index(raw) {
        resolve_sitemap_index(raw, app).map(ResolvedNode::Index)
    } else {
        resolve_sitemap(raw, app, nested).map(ResolvedNode::Sitemap)
    }
}

/// Fill the defaults of a leaf sitemap. Explicit values are kept as is.
pub fn resolve_sitemap(
    raw: &SitemapOptions,
    app: &AppContext,
    nested: bool,
) -> Result<ResolvedSitemap, SitemapError> {
    let (path, path_gzip, base) = resolve_paths(raw, app, DEFAULT_PATH)?;
    let hostname = resolve_hostname(raw, app)?;
    warn_deprecated(raw, &path);

    if !nested && raw.lastmod.is_some() {
        log!("warn"; "`lastmod` of {path} is only used when the sitemap is listed in a sitemap index");
    }
    if let Some(lastmod) = &raw.lastmod {
        validate_lastmod(lastmod)?;
    }

    // compile once so a bad pattern fails here, before any I/O
    Exclusions::new(&raw.exclude)?;

    let routes: Vec<Route> = raw.routes.iter().map(RouteEntry::to_route).collect();
    for route in &routes {
        if let Some(lastmod) = &route.lastmod {
            validate_lastmod(lastmod)?;
        }
        if let Some(priority) = route.priority {
            validate_priority(priority)?;
        }
    }

    if let Some(defaults) = &raw.defaults {
        if let Some(lastmod) = &defaults.lastmod {
            validate_lastmod(lastmod)?;
        }
        if let Some(priority) = defaults.priority {
            validate_priority(priority)?;
        }
    }

    Ok(ResolvedSitemap {
        path,
        path_gzip,
        hostname,
        exclude: raw.exclude.clone(),
        routes,
        cache_time: raw.cache_time.unwrap_or(DEFAULT_CACHE_TIME),
        etag: raw.etag.unwrap_or(true),
        filter: raw.filter.clone(),
        gzip: raw.gzip.unwrap_or(true),
        xml_ns: raw.xml_ns.clone(),
        xsl_url: raw.xsl_url.clone(),
        trailing_slash: raw.trailing_slash,
        lastmod: raw.lastmod.clone(),
        i18n: raw.i18n.clone(),
        defaults: raw.defaults.clone(),
        base,
        generate_on_build: raw.generate_on_build.unwrap_or(false),
    })
}

/// Fill the defaults of an index and resolve every child.
///
/// Children inherit unset `base`, `hostname`, `etag`, `cache_time`,
/// `trailing_slash` and `defaults` from the index. The index document
/// lists every child, so one invalid child fails the whole index.
pub fn resolve_sitemap_index(raw: &SitemapOptions, app: &AppContext) -> Result<ResolvedIndex, SitemapError> {
    let (path, path_gzip, base) = resolve_paths(raw, app, DEFAULT_INDEX_PATH)?;
    let hostname = resolve_hostname(raw, app)?;
    warn_deprecated(raw, &path);

    if let Some(lastmod) = &raw.lastmod {
        validate_lastmod(lastmod)?;
    }

    let sitemaps = raw
        .sitemaps
        .iter()
        .map(|child| resolve(&inherit(raw, child), app, true))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResolvedIndex {
        path,
        path_gzip,
        hostname,
        cache_time: raw.cache_time.unwrap_or(DEFAULT_CACHE_TIME),
        etag: raw.etag.unwrap_or(true),
        gzip: raw.gzip.unwrap_or(true),
        xml_ns: raw.xml_ns.clone(),
        xsl_url: raw.xsl_url.clone(),
        lastmod: raw.lastmod.clone(),
        base,
        generate_on_build: raw.generate_on_build.unwrap_or(false),
        sitemaps,
    })
}

fn inherit(parent: &SitemapOptions, child: &SitemapOptions) -> SitemapOptions {
    let mut child = child.clone();
    child.base = child.base.or_else(|| parent.base.clone());
    child.hostname = child.hostname.or_else(|| parent.hostname.clone());
    child.etag = child.etag.or(parent.etag);
    child.cache_time = child.cache_time.or(parent.cache_time);
    child.trailing_slash = child.trailing_slash.or(parent.trailing_slash);
    child.defaults = child.defaults.or_else(|| parent.defaults.clone());
    child
}

fn warn_deprecated(raw: &SitemapOptions, path: &str) {
    if raw.generate.is_some() {
        log!("warn"; "option `generate` of {path} is deprecated and ignored, use `generate_on_build`");
    }
}

/// Returns `(path, path_gzip, base)`.
fn resolve_paths(
    raw: &SitemapOptions,
    app: &AppContext,
    default_path: &str,
) -> Result<(String, String, String), SitemapError> {
    let base = raw.base.clone().unwrap_or_else(|| app.base.clone());
    let path = normalize_path(raw.path.as_deref().unwrap_or(default_path), &base)?;
    let path_gzip = match raw.path_gzip.as_deref() {
        Some(p) => normalize_path(p, &base)?,
        None => format!("{path}.gz"),
    };
    Ok((path, path_gzip, base))
}

/// With base `/` a path gets a leading `/`; under any other base the
/// path is relative to it and left untouched.
pub fn normalize_path(path: &str, base: &str) -> Result<String, SitemapError> {
    if path.is_empty() {
        return Err(SitemapError::MissingPath);
    }
    if path.chars().any(|c| c.is_whitespace() || c == '?' || c == '#' || c == '\\') {
        return Err(SitemapError::MalformedPath(path.to_string()));
    }
    // generated files must stay inside the public directory
    if path.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(SitemapError::MalformedPath(path.to_string()));
    }
    if base == "/" && !path.starts_with('/') {
        Ok(format!("/{path}"))
    } else {
        Ok(path.to_string())
    }
}

fn resolve_hostname(raw: &SitemapOptions, app: &AppContext) -> Result<Option<String>, SitemapError> {
    let hostname = raw.hostname.clone().or_else(|| app.hostname.clone());
    if let Some(h) = &hostname {
        validate_hostname(h)?;
    }
    Ok(hostname)
}

pub fn validate_hostname(hostname: &str) -> Result<(), SitemapError> {
    let url = url::Url::parse(hostname).map_err(|_| SitemapError::InvalidHostname(hostname.into()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(SitemapError::InvalidHostname(hostname.into()));
    }
    Ok(())
}

/// W3C date (`2025-01-31`) or RFC 3339 timestamp.
pub fn validate_lastmod(lastmod: &str) -> Result<(), SitemapError> {
    let date = NaiveDate::parse_from_str(lastmod, "%Y-%m-%d").is_ok();
    if date || DateTime::parse_from_rfc3339(lastmod).is_ok() {
        Ok(())
    } else {
        Err(SitemapError::InvalidLastmod(lastmod.into()))
    }
}

fn validate_priority(priority: f64) -> Result<(), SitemapError> {
    if (0.0..=1.0).contains(&priority) {
        Ok(())
    } else {
        Err(SitemapError::InvalidPriority(priority))
    }
}
