//! Routes: page discovery, prerendered routes, exclusion and the snapshot.
//!
//! A [`Route`] is unique by `url`. Static routes come from the pages
//! directory, prerendered routes from the rendered output, and explicit
//! routes from a sitemap's `routes` option.

use crate::sitemap::SitemapError;
use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// File extensions recognised as pages.
const PAGE_EXTENSIONS: &[&str] = &["vue", "html", "htm", "md"];

/// Prerendered pages that never appear in a sitemap.
const SPECIAL_PAGES: &[&str] = &["200.html", "404.html"];

/// Prerendered urls ending in one of these are assets, not pages.
const ASSET_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "map", "css", "json", "xml", "txt", "gz", "wasm", "ico", "png", "jpg",
    "jpeg", "gif", "svg", "webp", "avif", "woff", "woff2", "ttf", "pdf",
];

/// `<changefreq>` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFreq {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl fmt::Display for ChangeFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "always",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Never => "never",
        })
    }
}

/// A known route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub url: String,
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastmod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changefreq: Option<ChangeFreq>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
}

impl Route {
    /// Route whose path equals its url; the name is the url with `/` → `-`.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            path: url.clone(),
            name: url.replace('/', "-"),
            url,
            lastmod: None,
            changefreq: None,
            priority: None,
        }
    }

    fn named(url: String, name: String) -> Self {
        Self { name, ..Self::new(url) }
    }
}

/// One `routes` entry: a bare url or a table with per-url values.
///
/// ```toml
/// routes = ["/extra", { url = "/news", changefreq = "daily", priority = 0.8 }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteEntry {
    Url(String),
    Detailed {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lastmod: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        changefreq: Option<ChangeFreq>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<f64>,
    },
}

impl RouteEntry {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::Detailed { url, .. } => url,
        }
    }

    pub fn to_route(&self) -> Route {
        match self {
            Self::Url(url) => Route::new(url.as_str()),
            Self::Detailed { url, lastmod, changefreq, priority } => Route {
                lastmod: lastmod.clone(),
                changefreq: *changefreq,
                priority: *priority,
                ..Route::new(url.as_str())
            },
        }
    }
}

impl From<&Route> for RouteEntry {
    fn from(route: &Route) -> Self {
        if route.lastmod.is_none() && route.changefreq.is_none() && route.priority.is_none() {
            return Self::Url(route.url.clone());
        }
        Self::Detailed {
            url: route.url.clone(),
            lastmod: route.lastmod.clone(),
            changefreq: route.changefreq,
            priority: route.priority,
        }
    }
}

// ============================================================================
// Static discovery
// ============================================================================

/// Collect the static routes of a pages directory.
///
/// Dynamic pages (`[id].vue`, `:id`, `*`) have no fixed url and are
/// skipped, as are files starting with `_` or `.`. An `index` page maps
/// to its directory. Order follows the sorted directory walk.
pub fn get_static_routes(pages_dir: &Path) -> Result<Vec<Route>> {
    if !pages_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut routes = Vec::new();
    for entry in WalkDir::new(pages_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", pages_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(pages_dir).unwrap_or(entry.path());
        if let Some(route) = page_route(rel) {
            routes.push(route);
        }
    }
    Ok(routes)
}

fn page_route(rel: &Path) -> Option<Route> {
    let ext = rel.extension()?.to_str()?;
    if !PAGE_EXTENSIONS.contains(&ext) {
        return None;
    }

    let mut segments: Vec<String> = rel
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let hidden = |s: &String| s.starts_with('_') || s.starts_with('.');
    let dynamic = |s: &String| s.contains('[') || s.contains(':') || s.contains('*');
    if segments.iter().any(|s| hidden(s) || dynamic(s)) {
        return None;
    }

    if segments.last().is_some_and(|s| s == "index") {
        segments.pop();
    }

    let url = format!("/{}", segments.join("/"));
    let name = if segments.is_empty() { "index".to_string() } else { segments.join("-") };
    Some(Route::named(url, name))
}

// ============================================================================
// Prerendered routes
// ============================================================================

/// Route for a prerendered url, or `None` when the url points at a
/// non-page asset such as `/_app/entry.js`.
pub fn prerender_route(url: &str) -> Option<Route> {
    let last = url.rsplit('/').next().unwrap_or_default();
    if let Some((_, ext)) = last.rsplit_once('.')
        && ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    {
        return None;
    }
    Some(Route::new(url))
}

/// Urls of every prerendered `.html` page under `public_dir`, sorted.
///
/// `about/index.html` and `about.html` both yield `/about`; the fallback
/// pages `200.html` and `404.html` are skipped.
pub fn prerendered_urls(public_dir: &Path) -> Result<Vec<String>> {
    if !public_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut urls = Vec::new();
    for entry in WalkDir::new(public_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", public_dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|e| e != "html") {
            continue;
        }
        let rel = path.strip_prefix(public_dir).unwrap_or(path);
        if SPECIAL_PAGES.iter().any(|p| rel == Path::new(p)) {
            continue;
        }

        let mut segments: Vec<String> = rel
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if segments.last().is_some_and(|s| s == "index") {
            segments.pop();
        }
        let url = format!("/{}", segments.join("/"));
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}

// ============================================================================
// Exclusion
// ============================================================================

/// Compiled `exclude` patterns.
///
/// Glob matching is case-sensitive and `*` does not cross `/`, so
/// `/admin*` drops `/admin` and `/administrator` but not `/admin/users`.
#[derive(Debug, Clone)]
pub struct Exclusions {
    set: GlobSet,
}

impl Exclusions {
    pub fn new(patterns: &[String]) -> Result<Self, SitemapError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| SitemapError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|source| SitemapError::InvalidPattern {
            pattern: patterns.join(", "),
            source,
        })?;
        Ok(Self { set })
    }

    /// A route is excluded when its `url` or its `path` matches.
    pub fn is_excluded(&self, route: &Route) -> bool {
        !self.set.is_empty() && (self.set.is_match(&route.url) || self.set.is_match(&route.path))
    }
}

pub fn exclude_routes(exclusions: &Exclusions, routes: &[Route]) -> Vec<Route> {
    routes.iter().filter(|r| !exclusions.is_excluded(r)).cloned().collect()
}

/// Static routes minus exclusions, then explicit routes. An explicit
/// route replaces a static route with the same url in place; the rest
/// are appended in their configured order.
pub fn join_routes(static_routes: &[Route], exclusions: &Exclusions, explicit: &[Route]) -> Vec<Route> {
    let mut routes = exclude_routes(exclusions, static_routes);
    for route in explicit {
        match routes.iter_mut().find(|r| r.url == route.url) {
            Some(slot) => *slot = route.clone(),
            None => routes.push(route.clone()),
        }
    }
    routes
}

// ============================================================================
// Snapshot
// ============================================================================

/// Where the route snapshot lives inside the build directory.
pub fn snapshot_path(build_dir: &Path) -> PathBuf {
    build_dir.join("dist").join("sitemap-routes.json")
}

/// Read a snapshot. A missing or unreadable file is simply no snapshot.
pub fn read_snapshot(path: &Path) -> Option<Vec<Route>> {
    let content = fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

pub fn write_snapshot(path: &Path, routes: &[Route]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(routes)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
