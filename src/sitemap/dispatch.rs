//! Depth-aware dispatch over sitemap configuration trees.
//!
//! ```text
//! run([config, ...])                      top-level configs in parallel
//!  └─ resolve ── process(node, depth 0)
//!                 ├─ sink.emit(node)      write files / register handlers
//!                 └─ index? children in parallel at depth + 1
//! ```
//!
//! Every node settles on its own: a failing node is recorded in the
//! [`Report`] and never stops its siblings or its children.

use super::{
    AppContext, ResolvedNode, SitemapError, SitemapOptions,
    builder::{create_sitemap, create_sitemap_index, gzip},
    options::{DEFAULT_INDEX_PATH, DEFAULT_PATH, is_index, resolve},
};
use crate::{cache::GlobalCache, cache::RoutesCache, log};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Where a node goes once resolved.
pub trait Sink: Sync {
    /// Emit one node and return the paths it produced.
    fn emit(&self, node: &Arc<ResolvedNode>) -> Result<Vec<String>, SitemapError>;
}

#[derive(Debug)]
pub struct NodeFailure {
    pub path: String,
    pub error: SitemapError,
}

/// Outcome of a pass once every node has settled.
#[derive(Debug, Default)]
pub struct Report {
    pub outputs: Vec<String>,
    pub warnings: usize,
    pub failures: Vec<NodeFailure>,
}

impl Report {
    fn failure(path: String, error: SitemapError) -> Self {
        Self { failures: vec![NodeFailure { path, error }], ..Self::default() }
    }

    fn merged(mut self, other: Self) -> Self {
        self.outputs.extend(other.outputs);
        self.warnings += other.warnings;
        self.failures.extend(other.failures);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolve and process every top-level configuration.
pub fn run(configs: &[SitemapOptions], app: &AppContext, sink: &dyn Sink) -> Report {
    configs
        .par_iter()
        .map(|raw| match resolve(raw, app, false) {
            Ok(node) => process(&Arc::new(node), sink, 0),
            Err(error) => Report::failure(display_path(raw), error),
        })
        .reduce(Report::default, Report::merged)
}

/// Emit `node`, then every child of an index, concurrently.
pub fn process(node: &Arc<ResolvedNode>, sink: &dyn Sink, depth: usize) -> Report {
    let mut report = Report::default();

    if depth > 1 {
        log!("warn"; "{}: a sitemap index can't list other sitemap indexes, only sitemaps", node.path());
        report.warnings += 1;
    }

    match sink.emit(node) {
        Ok(outputs) => report.outputs.extend(outputs),
        Err(error) => report.failures.push(NodeFailure { path: node.path().to_string(), error }),
    }

    if let ResolvedNode::Index(index) = node.as_ref() {
        let children = index
            .sitemaps
            .par_iter()
            .map(|child| process(&Arc::new(child.clone()), sink, depth + 1))
            .reduce(Report::default, Report::merged);
        report = report.merged(children);
    }

    report
}

fn display_path(raw: &SitemapOptions) -> String {
    match &raw.path {
        Some(path) => path.clone(),
        None if is_index(raw) => DEFAULT_INDEX_PATH.into(),
        None => DEFAULT_PATH.into(),
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Writes `<dir>/<path>` and, with gzip on, `<dir>/<path_gzip>`.
pub struct GenerateSink {
    global: Arc<GlobalCache>,
    dir: PathBuf,
}

impl GenerateSink {
    /// `dir` is the public directory of the output.
    pub fn new(global: Arc<GlobalCache>, dir: PathBuf) -> Self {
        Self { global, dir }
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<String, SitemapError> {
        let file = self.dir.join(path.trim_start_matches('/'));
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| SitemapError::Io(parent.to_path_buf(), e))?;
        }
        fs::write(&file, content).map_err(|e| SitemapError::Io(file.clone(), e))?;

        let shown = pathname(&self.dir, &file);
        log!("sitemap"; "generated {shown}");
        Ok(shown)
    }

    fn write_pair(&self, node: &ResolvedNode, xml: &str) -> Result<Vec<String>, SitemapError> {
        let mut written = vec![self.write(node.path(), xml.as_bytes())?];
        if node.gzip() {
            let compressed = gzip(xml.as_bytes())
                .map_err(|e| SitemapError::Io(PathBuf::from(node.path_gzip()), e))?;
            written.push(self.write(node.path_gzip(), &compressed)?);
        }
        Ok(written)
    }
}

impl Sink for GenerateSink {
    fn emit(&self, node: &Arc<ResolvedNode>) -> Result<Vec<String>, SitemapError> {
        match node.as_ref() {
            ResolvedNode::Sitemap(options) => {
                // a fresh cache per node; nothing is shared between nodes
                let cache = RoutesCache::for_sitemap(Arc::clone(&self.global), options)?;
                let routes = cache.get()?;
                let doc = create_sitemap(options, &routes, &options.base, None)?;
                self.write_pair(node, doc.to_xml())
            }
            ResolvedNode::Index(options) => {
                let xml = create_sitemap_index(options, &options.base, None);
                self.write_pair(node, &xml)
            }
        }
    }
}

/// `/`-separated pathname of `file` relative to `dir`.
fn pathname(dir: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(dir).unwrap_or(file);
    let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    format!("/{}", parts.join("/"))
}

// ============================================================================
// Registration
// ============================================================================

/// Stores each node's options under its `path` (and `path_gzip`) for the
/// request handlers.
pub struct RegisterSink {
    global: Arc<GlobalCache>,
}

impl RegisterSink {
    pub fn new(global: Arc<GlobalCache>) -> Self {
        Self { global }
    }
}

impl Sink for RegisterSink {
    fn emit(&self, node: &Arc<ResolvedNode>) -> Result<Vec<String>, SitemapError> {
        let mut routes = vec![node.path()];
        if node.gzip() {
            routes.push(node.path_gzip());
        }
        self.global.register(&routes, node)?;
        Ok(routes.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::Route;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn app() -> AppContext {
        AppContext { base: "/".into(), hostname: Some("https://example.com".into()) }
    }

    fn configs(toml_src: &str) -> Vec<SitemapOptions> {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            sitemap: Vec<SitemapOptions>,
        }
        toml::from_str::<Wrapper>(toml_src).unwrap().sitemap
    }

    fn generate(dir: &Path, routes: &[&str], toml_src: &str) -> Report {
        let global = Arc::new(GlobalCache::new(routes.iter().map(|u| Route::new(*u)).collect()));
        let sink = GenerateSink::new(global, dir.to_path_buf());
        run(&configs(toml_src), &app(), &sink)
    }

    #[test]
    fn test_exclusion_scenario() {
        let dir = TempDir::new().unwrap();
        let report = generate(dir.path(), &["/", "/admin"], r#"
            [[sitemap]]
            path = "/sitemap.xml"
            gzip = true
            exclude = ["/admin*"]
        "#);
        assert!(report.is_ok(), "{:?}", report.failures);

        let xml = fs::read_to_string(dir.path().join("sitemap.xml")).unwrap();
        assert_eq!(xml.matches("<url>").count(), 1);
        assert!(xml.contains("<loc>https://example.com/</loc>"));
        assert!(!xml.contains("admin"));

        let compressed = fs::read(dir.path().join("sitemap.xml.gz")).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, xml);
    }

    #[test]
    fn test_index_scenario() {
        let dir = TempDir::new().unwrap();
        let report = generate(dir.path(), &["/", "/a", "/b"], r#"
            [[sitemap]]
            path = "/sitemap.xml"

            [[sitemap.sitemaps]]
            path = "/a.xml"
            exclude = ["/b"]

            [[sitemap.sitemaps]]
            path = "/b.xml"
            gzip = false
        "#);
        assert!(report.is_ok(), "{:?}", report.failures);
        assert_eq!(report.warnings, 0);

        let index = fs::read_to_string(dir.path().join("sitemap.xml")).unwrap();
        assert!(index.contains("<sitemapindex"));
        assert!(index.contains("<loc>https://example.com/a.xml</loc>"));
        assert!(index.contains("<loc>https://example.com/b.xml</loc>"));

        // children keep their own route caches
        let a = fs::read_to_string(dir.path().join("a.xml")).unwrap();
        assert!(!a.contains("https://example.com/b</loc>"));
        let b = fs::read_to_string(dir.path().join("b.xml")).unwrap();
        assert!(b.contains("https://example.com/b</loc>"));

        assert!(dir.path().join("sitemap.xml.gz").is_file());
        assert!(dir.path().join("a.xml.gz").is_file());
        assert!(!dir.path().join("b.xml.gz").exists());

        let mut outputs = report.outputs.clone();
        outputs.sort();
        assert_eq!(outputs, vec!["/a.xml", "/a.xml.gz", "/b.xml", "/sitemap.xml", "/sitemap.xml.gz"]);
    }

    #[test]
    fn test_nested_index_warns_and_continues() {
        let dir = TempDir::new().unwrap();
        let report = generate(dir.path(), &["/"], r#"
            [[sitemap]]
            path = "/root.xml"

            [[sitemap.sitemaps]]
            path = "/middle.xml"

            [[sitemap.sitemaps.sitemaps]]
            path = "/leaf.xml"
        "#);
        assert!(report.is_ok());
        assert_eq!(report.warnings, 1);
        assert!(dir.path().join("leaf.xml").is_file());
    }

    #[test]
    fn test_config_error_does_not_abort_siblings() {
        let dir = TempDir::new().unwrap();
        let report = generate(dir.path(), &["/"], r#"
            [[sitemap]]
            path = "/bad path.xml"

            [[sitemap]]
            path = "/good.xml"
        "#);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "/bad path.xml");
        assert!(matches!(report.failures[0].error, SitemapError::MalformedPath(_)));
        assert!(dir.path().join("good.xml").is_file());
    }

    #[test]
    fn test_io_error_does_not_abort_siblings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("blocked"), "a file, not a directory").unwrap();
        let report = generate(dir.path(), &["/"], r#"
            [[sitemap]]
            path = "/sitemap.xml"

            [[sitemap.sitemaps]]
            path = "/blocked/a.xml"

            [[sitemap.sitemaps]]
            path = "/b.xml"
        "#);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "/blocked/a.xml");
        assert!(matches!(report.failures[0].error, SitemapError::Io(..)));
        assert!(dir.path().join("sitemap.xml").is_file());
        assert!(dir.path().join("b.xml").is_file());
    }

    #[test]
    fn test_register_sink() {
        let global = Arc::new(GlobalCache::default());
        let sink = RegisterSink::new(Arc::clone(&global));
        let report = run(
            &configs(r#"
                [[sitemap]]
                path = "/sitemap.xml"
                [[sitemap.sitemaps]]
                path = "/a.xml"
                gzip = false
            "#),
            &app(),
            &sink,
        );
        assert!(report.is_ok());

        let registered = global.registered();
        let paths: Vec<&str> = registered.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["/a.xml", "/sitemap.xml", "/sitemap.xml.gz"]);
        assert!(registered["/sitemap.xml.gz"].is_index());
    }

    #[test]
    fn test_register_duplicate_path() {
        let global = Arc::new(GlobalCache::default());
        let sink = RegisterSink::new(Arc::clone(&global));
        let report = run(
            &configs(r#"
                [[sitemap]]
                path = "/same.xml"
                [[sitemap]]
                path = "/same.xml"
            "#),
            &app(),
            &sink,
        );
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, SitemapError::DuplicatePath(_)));
    }

    #[test]
    fn test_register_gzip_clash_leaves_nothing() {
        let global = Arc::new(GlobalCache::default());
        let sink = RegisterSink::new(Arc::clone(&global));
        let report = run(
            &configs(r#"
                [[sitemap]]
                path = "/a.xml"
                path_gzip = "/a.xml"

                [[sitemap]]
                path = "/b.xml"
            "#),
            &app(),
            &sink,
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "/a.xml");

        let registered = global.registered();
        let paths: Vec<&str> = registered.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["/b.xml", "/b.xml.gz"]);
    }

    #[test]
    fn test_pathname() {
        let dir = Path::new("/out/public");
        assert_eq!(pathname(dir, &dir.join("a/b.xml")), "/a/b.xml");
    }
}
