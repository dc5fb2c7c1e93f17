//! Sitemap server.
//!
//! Built on `tiny_http`: one handler per registered sitemap path (and its
//! gzip path), answered from the runtime config rather than from files.
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Main Thread   │     │  Watcher Thread  │
//! │  (HTTP Server)  │     │  (File Monitor)  │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//!    router.load()           router.store()
//!          └──── ArcSwap<Router> ──┘
//! ```
//!
//! Every leaf handler owns a route cache shared by its `.xml` and `.xml.gz`
//! paths; a request renders the sitemap from the cached routes.

use crate::{
    cache::{GlobalCache, RoutesCache},
    config::{SiteConfig, cfg},
    lifecycle::runtime_in_process,
    log,
    runtime::RuntimeConfig,
    sitemap::{
        ResolvedIndex, ResolvedNode, ResolvedSitemap, SitemapError,
        builder::{create_sitemap, create_sitemap_index, gzip},
    },
    watch::watch_for_changes_blocking,
};
use anyhow::{Context, Result, anyhow};
use arc_swap::ArcSwap;
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

const XML_CONTENT_TYPE: &str = "application/xml";
const GZIP_CONTENT_TYPE: &str = "application/gzip";

// ============================================================================
// Router
// ============================================================================

enum Kind {
    Sitemap {
        options: ResolvedSitemap,
        cache: Arc<RoutesCache>,
    },
    Index(ResolvedIndex),
}

struct Handler {
    kind: Kind,
    /// Serves the gzip variant.
    gzip: bool,
    etag: bool,
    /// For error messages.
    path: String,
}

/// A rendered response, independent of the HTTP library.
#[derive(Debug, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub etag: Option<String>,
    pub body: Vec<u8>,
}

impl Reply {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            etag: None,
            body: body.as_bytes().to_vec(),
        }
    }
}

/// Request path → handler, built from a runtime config.
pub struct Router {
    base: String,
    handlers: HashMap<String, Handler>,
}

impl Router {
    /// `base` is the application base the sitemap paths are relative to.
    pub fn new(runtime: &RuntimeConfig, base: &str) -> Result<Self> {
        let registry = runtime.registry()?;
        let global = Arc::new(GlobalCache::new(runtime.static_routes.clone()));

        // one cache per sitemap, shared by its plain and gzip paths
        let mut caches: HashMap<String, Arc<RoutesCache>> = HashMap::new();
        let mut handlers = HashMap::with_capacity(registry.len());

        for (path, node) in registry {
            let gzip = path != node.path();
            let etag = node.etag();
            let kind = match node {
                ResolvedNode::Sitemap(options) => {
                    let cache = match caches.get(&options.path) {
                        Some(cache) => Arc::clone(cache),
                        None => {
                            let cache = Arc::new(RoutesCache::for_sitemap(Arc::clone(&global), &options)?);
                            caches.insert(options.path.clone(), Arc::clone(&cache));
                            cache
                        }
                    };
                    Kind::Sitemap { options, cache }
                }
                ResolvedNode::Index(options) => Kind::Index(options),
            };
            handlers.insert(route_key(&path).to_string(), Handler { kind, gzip, etag, path });
        }

        Ok(Self { base: base.to_string(), handlers })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    fn lookup(&self, url: &str) -> Option<&Handler> {
        let path = url.split('?').next().unwrap_or(url);
        let rel = path.strip_prefix(self.base.trim_end_matches('/'))?;
        // `/docs` must not match `/docssitemap.xml`
        if !rel.is_empty() && !rel.starts_with('/') {
            return None;
        }
        self.handlers.get(route_key(rel))
    }

    /// Answer a request for `url`. `host` is the `Host` header, used when
    /// a sitemap has no hostname.
    pub fn respond(&self, url: &str, host: Option<&str>, if_none_match: Option<&str>) -> Reply {
        let Some(handler) = self.lookup(url) else {
            return Reply::text(404, "404 Not Found");
        };

        let body = match render(handler, host) {
            Ok(body) => body,
            Err(e) => {
                log!("error"; "{}: {e}", handler.path);
                return Reply::text(500, "500 Internal Server Error");
            }
        };

        let content_type = if handler.gzip { GZIP_CONTENT_TYPE } else { XML_CONTENT_TYPE };
        let etag = handler.etag.then(|| format!("\"{}\"", blake3::hash(&body).to_hex()));

        if let (Some(tag), Some(candidates)) = (&etag, if_none_match)
            && etag_matches(tag, candidates)
        {
            return Reply { status: 304, content_type, etag, body: Vec::new() };
        }

        Reply { status: 200, content_type, etag, body }
    }
}

fn route_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn etag_matches(tag: &str, if_none_match: &str) -> bool {
    if_none_match
        .split(',')
        .map(|candidate| candidate.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == "*" || candidate == tag)
}

fn render(handler: &Handler, host: Option<&str>) -> Result<Vec<u8>, SitemapError> {
    let req_host = host.map(|h| format!("http://{h}"));

    let xml = match &handler.kind {
        Kind::Sitemap { options, cache } => {
            let routes = cache.get()?;
            create_sitemap(options, &routes, &options.base, req_host.as_deref())?
                .to_xml()
                .to_string()
        }
        Kind::Index(options) => create_sitemap_index(options, &options.base, req_host.as_deref()),
    };

    if handler.gzip {
        gzip(xml.as_bytes()).map_err(|e| SitemapError::Io(PathBuf::from(&handler.path), e))
    } else {
        Ok(xml.into_bytes())
    }
}

// ============================================================================
// Server Entry Point
// ============================================================================

/// The runtime config a server starts from: the build's file outside dev
/// mode, otherwise resolved in-process. `Ok(None)` when disabled.
pub fn load_runtime(config: &SiteConfig) -> Result<Option<RuntimeConfig>> {
    if !config.enable {
        log!("sitemap"; "Sitemap disabled");
        return Ok(None);
    }
    if !config.build.dev
        && let Some(runtime) = RuntimeConfig::read(config.build.build_dir())?
    {
        return Ok(Some(runtime));
    }
    runtime_in_process(config)
}

/// Start the sitemap server with optional watching.
///
/// Blocks until Ctrl+C is received.
pub fn serve_sitemaps(runtime: RuntimeConfig) -> Result<()> {
    let c = cfg();
    let router = Arc::new(ArcSwap::from_pointee(Router::new(&runtime, &c.app.base)?));

    let interface: std::net::IpAddr = c.serve.interface.parse()?;
    let (server, addr) = try_bind_port(interface, c.serve.port, MAX_PORT_RETRIES)?;
    let server = Arc::new(server);

    // Set up Ctrl+C handler for graceful shutdown
    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        server_for_signal.unblock();
    })
    .context("Failed to set Ctrl+C handler")?;

    log!("serve"; "http://{} ({} sitemap routes)", addr, router.load().len());

    if c.serve.watch {
        let router = Arc::clone(&router);
        std::thread::spawn(move || {
            if let Err(err) = watch_for_changes_blocking(&router) {
                log!("watch"; "{err}");
            }
        });
    }

    // Handle requests in main thread (blocks until Ctrl+C)
    for request in server.incoming_requests() {
        if let Err(e) = handle_request(request, &router.load()) {
            log!("serve"; "request error: {e}");
        }
    }

    Ok(())
}

/// Try to bind to a port, retrying with incremented port numbers if in use.
fn try_bind_port(
    interface: std::net::IpAddr,
    base_port: u16,
    max_retries: u16,
) -> Result<(Server, SocketAddr)> {
    let mut last_error = None;
    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        max_retries,
        base_port,
        base_port.saturating_add(max_retries.saturating_sub(1)),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

// ============================================================================
// Request Handling
// ============================================================================

fn handle_request(request: Request, router: &Router) -> Result<()> {
    // Decode URL-encoded characters (e.g., %20 → space)
    let url = urlencoding::decode(request.url())
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();

    let header_value = |name: &'static str| {
        request
            .headers()
            .iter()
            .find(|h| h.field.equiv(name))
            .map(|h| h.value.as_str().to_string())
    };
    let host = header_value("Host");
    let if_none_match = header_value("If-None-Match");

    let reply = router.respond(&url, host.as_deref(), if_none_match.as_deref());

    let mut response = Response::from_data(reply.body)
        .with_status_code(StatusCode(reply.status))
        .with_header(header("Content-Type", reply.content_type)?);
    if let Some(etag) = &reply.etag {
        response = response.with_header(header("ETag", etag)?);
    }

    request.respond(response)?;
    Ok(())
}

fn header(name: &str, value: &str) -> Result<Header> {
    Header::from_bytes(name, value).map_err(|()| anyhow!("invalid header {name}: {value}"))
}
