//! Build lifecycle: the hooks a build calls, in order.
//!
//! ```text
//! setup()                  register every top-level tree
//! routes_discovered()      static routes (+ snapshot outside dev)
//! before_server_build()    registry + routes → runtime config
//! prerender_route()*       per prerendered page; new routes set the flag
//! server_build_closed()    generate if prerendered or generate_on_build
//! ```

use crate::{
    cache::GlobalCache,
    config::SiteConfig,
    log,
    routes::{
        Route, get_static_routes, prerender_route, read_snapshot, snapshot_path, write_snapshot,
    },
    runtime::{RuntimeConfig, serialize_registry},
    sitemap::{
        AppContext, SitemapOptions,
        dispatch::{GenerateSink, RegisterSink, Report, run},
    },
};
use anyhow::{Result, bail};
use parking_lot::Mutex;
use std::{
    error::Error,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

pub struct Sitemaps {
    configs: Vec<SitemapOptions>,
    app: AppContext,
    public_dir: PathBuf,
    build_dir: PathBuf,
    dev: bool,
    global: Arc<GlobalCache>,
    runtime: Mutex<RuntimeConfig>,
    prerendered: AtomicBool,
    /// nodes that failed to register; the rest are served and generated
    failed: usize,
}

impl Sitemaps {
    /// Seed the caches and register a handler path for every node.
    /// Nodes that fail are logged and left out. `Ok(None)` when the module
    /// is disabled.
    pub fn setup(config: &SiteConfig) -> Result<Option<Self>> {
        if !config.enable {
            log!("sitemap"; "Sitemap disabled");
            return Ok(None);
        }

        let build_dir = config.build.build_dir().to_path_buf();
        let global = Arc::new(GlobalCache::default());
        if !config.build.dev
            && let Some(routes) = read_snapshot(&snapshot_path(&build_dir))
        {
            global.set_static_routes(routes);
        }

        let mut sitemaps = Self {
            configs: config.sitemap.clone(),
            app: config.app_context(),
            public_dir: config.build.public_dir(),
            build_dir,
            dev: config.build.dev,
            global,
            runtime: Mutex::default(),
            prerendered: AtomicBool::new(false),
            failed: 0,
        };

        let report = run(&sitemaps.configs, &sitemaps.app, &RegisterSink::new(Arc::clone(&sitemaps.global)));
        log_failures(&report);
        sitemaps.failed = report.failures.len();
        Ok(Some(sitemaps))
    }

    #[cfg(test)]
    pub fn global(&self) -> &Arc<GlobalCache> {
        &self.global
    }

    /// Static routes found by page discovery replace the seeded ones.
    pub fn routes_discovered(&self, routes: Vec<Route>) -> Result<()> {
        if !self.dev {
            write_snapshot(&snapshot_path(&self.build_dir), &routes)?;
        }
        self.global.set_static_routes(routes);

        let discovered = self.global.static_routes();
        if discovered.is_empty() {
            log!("warn"; "no static routes discovered");
        } else {
            log!("sitemap"; "{} static route(s)", discovered.len());
        }
        Ok(())
    }

    /// Serialize the registry for the serving process. Written to the
    /// build directory outside dev mode.
    pub fn before_server_build(&self) -> Result<RuntimeConfig> {
        let (options, errors) = serialize_registry(&self.global.registered());
        for error in &errors {
            log!("error"; "{error}");
        }

        let runtime = RuntimeConfig {
            options,
            static_routes: self.global.static_routes().routes().to_vec(),
        };
        if !self.dev {
            runtime.write(&self.build_dir)?;
        }
        *self.runtime.lock() = runtime.clone();

        if !errors.is_empty() {
            bail!("{} option(s) could not be serialized", errors.len());
        }
        Ok(runtime)
    }

    /// A page was prerendered at `url`. Returns whether it was a new route.
    pub fn prerender_route(&self, url: &str) -> Result<bool> {
        let Some(route) = prerender_route(url) else {
            return Ok(false);
        };
        if !self.global.append_route(route) {
            return Ok(false);
        }

        self.prerendered.store(true, Ordering::Release);

        let mut runtime = self.runtime.lock();
        runtime.static_routes = self.global.static_routes().routes().to_vec();
        if !self.dev {
            runtime.write(&self.build_dir)?;
        }
        Ok(true)
    }

    /// Generate when a prerender added routes or a top-level tree asks for
    /// it. `None` when nothing was generated.
    pub fn server_build_closed(&self) -> Option<Report> {
        let requested = self.configs.iter().any(|c| c.generate_on_build == Some(true));
        (self.prerendered.load(Ordering::Acquire) || requested).then(|| self.generate())
    }

    /// Write every sitemap to the public directory.
    pub fn generate(&self) -> Report {
        log!("sitemap"; "generate before");
        log!("sitemap"; "Generating sitemaps");

        let sink = GenerateSink::new(Arc::clone(&self.global), self.public_dir.clone());
        let report = run(&self.configs, &self.app, &sink);

        log!("sitemap"; "generate done: {} file(s)", report.outputs.len());
        report
    }

    /// Exit status of a command once everything ran: the generation report
    /// when there was one, otherwise the registration outcome.
    pub fn finish(&self, generated: Option<Report>) -> Result<()> {
        match generated {
            Some(report) => settle(report, "generate").map(|_| ()),
            None if self.failed > 0 => bail!("register: {} sitemap(s) failed", self.failed),
            None => Ok(()),
        }
    }
}

/// Setup, page discovery and serialization in one go, for a server that
/// has no build output to read. `Ok(None)` when disabled.
pub fn runtime_in_process(config: &SiteConfig) -> Result<Option<RuntimeConfig>> {
    let Some(sitemaps) = Sitemaps::setup(config)? else {
        return Ok(None);
    };
    sitemaps.routes_discovered(get_static_routes(&config.build.pages)?)?;
    sitemaps.before_server_build().map(Some)
}

/// Log every failure of a settled pass, then fail if there was any.
pub fn settle(report: Report, pass: &str) -> Result<Report> {
    log_failures(&report);
    if !report.is_ok() {
        bail!("{pass}: {} sitemap(s) failed", report.failures.len());
    }
    Ok(report)
}

fn log_failures(report: &Report) {
    for failure in &report.failures {
        log!("error"; "{}: {}", failure.path, describe(&failure.error));
    }
}

/// `error: cause: cause`
fn describe(error: &dyn Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sitemap::SitemapError;
    use std::{fs, path::Path};
    use tempfile::TempDir;

    fn site(root: &Path, toml_src: &str) -> SiteConfig {
        let mut config = SiteConfig::from_str(toml_src).unwrap();
        config.build.output = root.join(".output");
        config.build.pages = root.join("pages");
        config.build.build_dir = root.join(".build");
        config
    }

    fn routes(urls: &[&str]) -> Vec<Route> {
        urls.iter().map(|u| Route::new(*u)).collect()
    }

    #[test]
    fn test_disabled() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), "enable = false");
        assert!(Sitemaps::setup(&config).unwrap().is_none());
    }

    #[test]
    fn test_setup_registers_paths() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), r#"
            [[sitemap]]
            path = "/sitemap.xml"
            [[sitemap.sitemaps]]
            path = "/a.xml"
        "#);
        let sitemaps = Sitemaps::setup(&config).unwrap().unwrap();
        let registered = sitemaps.global().registered();
        assert!(registered.contains_key("/sitemap.xml"));
        assert!(registered.contains_key("/sitemap.xml.gz"));
        assert!(registered.contains_key("/a.xml"));
    }

    #[test]
    fn test_bad_sitemap_does_not_block_siblings() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), r#"
            [[sitemap]]
            path = "/bad path.xml"
            [[sitemap]]
            path = "/good.xml"
            generate_on_build = true
        "#);
        let sitemaps = Sitemaps::setup(&config).unwrap().unwrap();
        assert_eq!(sitemaps.failed, 1);
        assert!(sitemaps.global().registered().contains_key("/good.xml"));

        sitemaps.routes_discovered(routes(&["/"])).unwrap();
        let runtime = sitemaps.before_server_build().unwrap();
        assert!(runtime.options.contains("/good.xml"));

        let report = sitemaps.server_build_closed().unwrap();
        assert!(config.build.public_dir().join("good.xml").is_file());
        assert!(config.build.public_dir().join("good.xml.gz").is_file());

        // the command still fails, after generation ran
        let err = sitemaps.finish(Some(report)).unwrap_err();
        assert!(err.to_string().contains("1 sitemap(s) failed"));
    }

    #[test]
    fn test_finish_without_generation() {
        let dir = TempDir::new().unwrap();
        let good = Sitemaps::setup(&site(dir.path(), "")).unwrap().unwrap();
        assert!(good.finish(None).is_ok());

        let bad = Sitemaps::setup(&site(dir.path(), "[[sitemap]]\npath = \"/a b.xml\"")).unwrap().unwrap();
        let err = bad.finish(None).unwrap_err();
        assert!(err.to_string().contains("register: 1 sitemap(s) failed"));
    }

    #[test]
    fn test_runtime_in_process_skips_bad_sitemap() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), r#"
            [build]
            dev = true

            [[sitemap]]
            path = "/../escaped.xml"
            [[sitemap]]
            path = "/good.xml"
        "#);
        let runtime = runtime_in_process(&config).unwrap().unwrap();
        let registry = runtime.registry().unwrap();
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["/good.xml", "/good.xml.gz"]);
    }

    #[test]
    fn test_snapshot_written_and_seeded() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), "");

        let first = Sitemaps::setup(&config).unwrap().unwrap();
        first.routes_discovered(routes(&["/", "/about"])).unwrap();
        assert!(snapshot_path(&config.build.build_dir).is_file());

        let second = Sitemaps::setup(&config).unwrap().unwrap();
        assert_eq!(second.global().static_routes().len(), 2);
    }

    #[test]
    fn test_dev_mode_skips_snapshot_and_runtime_file() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), "[build]\ndev = true");

        let sitemaps = Sitemaps::setup(&config).unwrap().unwrap();
        sitemaps.routes_discovered(routes(&["/"])).unwrap();
        let runtime = sitemaps.before_server_build().unwrap();

        assert!(!snapshot_path(&config.build.build_dir).exists());
        assert!(!RuntimeConfig::path(&config.build.build_dir).exists());
        assert_eq!(runtime.static_routes.len(), 1);
        assert!(runtime.registry().unwrap().contains_key("/sitemap.xml"));
    }

    #[test]
    fn test_before_server_build_writes_runtime_config() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), r#"
            [[sitemap]]
            filter = "|route| route.url != '/admin'"
        "#);
        let sitemaps = Sitemaps::setup(&config).unwrap().unwrap();
        sitemaps.routes_discovered(routes(&["/", "/admin"])).unwrap();
        let runtime = sitemaps.before_server_build().unwrap();

        let read = RuntimeConfig::read(&config.build.build_dir).unwrap().unwrap();
        assert_eq!(read, runtime);
        assert!(read.options.contains("|route|route.url!='/admin'"));
    }

    #[test]
    fn test_prerender_route() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), "");
        let sitemaps = Sitemaps::setup(&config).unwrap().unwrap();
        sitemaps.routes_discovered(routes(&["/"])).unwrap();
        sitemaps.before_server_build().unwrap();

        assert!(!sitemaps.prerender_route("/_nuxt/entry.js").unwrap());
        assert!(!sitemaps.prerender_route("/").unwrap());
        assert!(sitemaps.server_build_closed().is_none());

        assert!(sitemaps.prerender_route("/blog/post").unwrap());
        assert!(!sitemaps.prerender_route("/blog/post").unwrap());

        let static_routes = sitemaps.global().static_routes();
        let added = &static_routes.routes()[1];
        assert_eq!(added.url, "/blog/post");
        assert_eq!(added.name, "-blog-post");

        let read = RuntimeConfig::read(&config.build.build_dir).unwrap().unwrap();
        assert_eq!(read.static_routes.len(), 2);
    }

    #[test]
    fn test_prerender_triggers_generation() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), "[app]\nhostname = \"https://example.com\"");
        let sitemaps = Sitemaps::setup(&config).unwrap().unwrap();
        sitemaps.routes_discovered(routes(&["/"])).unwrap();
        sitemaps.before_server_build().unwrap();
        sitemaps.prerender_route("/news").unwrap();

        let report = sitemaps.server_build_closed().unwrap();
        assert!(report.is_ok());

        let xml = fs::read_to_string(config.build.public_dir().join("sitemap.xml")).unwrap();
        assert!(xml.contains("<loc>https://example.com/news</loc>"));
        assert!(config.build.public_dir().join("sitemap.xml.gz").is_file());
    }

    #[test]
    fn test_generate_on_build_triggers_generation() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), "[[sitemap]]\ngenerate_on_build = true");
        let sitemaps = Sitemaps::setup(&config).unwrap().unwrap();
        sitemaps.routes_discovered(routes(&["/"])).unwrap();

        let report = sitemaps.server_build_closed().unwrap();
        assert_eq!(report.outputs, vec!["/sitemap.xml", "/sitemap.xml.gz"]);
    }

    #[test]
    fn test_runtime_in_process() {
        let dir = TempDir::new().unwrap();
        let config = site(dir.path(), "[build]\ndev = true");
        fs::create_dir_all(&config.build.pages).unwrap();
        fs::write(config.build.pages.join("index.vue"), "").unwrap();
        fs::write(config.build.pages.join("about.vue"), "").unwrap();

        let runtime = runtime_in_process(&config).unwrap().unwrap();
        let urls: Vec<&str> = runtime.static_routes.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["/about", "/"]);

        let disabled = site(dir.path(), "enable = false");
        assert!(runtime_in_process(&disabled).unwrap().is_none());
    }

    #[test]
    fn test_settle() {
        assert!(settle(Report::default(), "generate").is_ok());

        let mut report = Report::default();
        report.failures.push(crate::sitemap::dispatch::NodeFailure {
            path: "/a.xml".into(),
            error: SitemapError::MissingPath,
        });
        let err = settle(report, "generate").unwrap_err();
        assert!(err.to_string().contains("1 sitemap(s) failed"));
    }
}
