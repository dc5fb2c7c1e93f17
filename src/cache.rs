//! Process-wide route and options cache, plus the per-sitemap route cache.
//!
//! # Thread Safety
//!
//! `GlobalCache` is shared by every node of a generation or registration
//! pass and by every request handler while serving:
//!
//! - `static_routes` is an `Arc` snapshot behind a `RwLock`. Readers clone
//!   the `Arc` and keep a consistent view; an append copies the set and
//!   swaps it in under the write lock.
//! - `options` is written once per path during registration and read by
//!   request handlers afterwards.

use crate::{
    routes::{Exclusions, Route, join_routes},
    sitemap::{ResolvedNode, ResolvedSitemap, SitemapError},
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

/// Routes unique by url, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RouteSet {
    routes: Vec<Route>,
    urls: HashSet<String>,
}

impl RouteSet {
    /// Keeps the first route of each url.
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut set = Self::default();
        for route in routes {
            set.insert(route);
        }
        set
    }

    fn insert(&mut self, route: Route) -> bool {
        if !self.urls.insert(route.url.clone()) {
            return false;
        }
        self.routes.push(route);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct GlobalCache {
    static_routes: RwLock<Arc<RouteSet>>,
    options: RwLock<BTreeMap<String, Arc<ResolvedNode>>>,
}

impl GlobalCache {
    pub fn new(static_routes: Vec<Route>) -> Self {
        Self {
            static_routes: RwLock::new(Arc::new(RouteSet::from_routes(static_routes))),
            options: RwLock::default(),
        }
    }

    /// Replace the static routes, as after page discovery.
    pub fn set_static_routes(&self, routes: Vec<Route>) {
        *self.static_routes.write() = Arc::new(RouteSet::from_routes(routes));
    }

    /// Snapshot of the static routes at call time.
    pub fn static_routes(&self) -> Arc<RouteSet> {
        self.static_routes.read().clone()
    }

    /// Append a route unless its url is already known. Returns whether it
    /// was added.
    pub fn append_route(&self, route: Route) -> bool {
        // fast path: read lock only
        if self.static_routes.read().contains(&route.url) {
            return false;
        }

        let mut guard = self.static_routes.write();
        // double-check after acquiring the write lock
        if guard.contains(&route.url) {
            return false;
        }
        let mut next: RouteSet = (**guard).clone();
        next.insert(route);
        *guard = Arc::new(next);
        true
    }

    /// Store the options served at every one of `paths`. Each path is
    /// registered once; on a clash none of `paths` is stored.
    pub fn register(&self, paths: &[&str], node: &Arc<ResolvedNode>) -> Result<(), SitemapError> {
        let mut options = self.options.write();
        for (i, path) in paths.iter().enumerate() {
            if options.contains_key(*path) || paths[..i].contains(path) {
                return Err(SitemapError::DuplicatePath(path.to_string()));
            }
        }
        for path in paths {
            options.insert(path.to_string(), Arc::clone(node));
        }
        Ok(())
    }

    /// Every registered path with its options, ordered by path.
    pub fn registered(&self) -> BTreeMap<String, Arc<ResolvedNode>> {
        self.options.read().clone()
    }
}

// ============================================================================
// Routes cache
// ============================================================================

/// Computes a fresh route list.
pub type RouteSource = Box<dyn Fn() -> Result<Vec<Route>, SitemapError> + Send + Sync>;

/// Memoized route list for one sitemap, fresh for `ttl`.
///
/// The lock is held while recomputing, so concurrent misses wait for
/// one computation instead of running their own. A failed computation
/// is returned to the caller and nothing is cached.
pub struct RoutesCache {
    ttl: Duration,
    source: RouteSource,
    entry: Mutex<Option<(Instant, Arc<Vec<Route>>)>>,
}

impl RoutesCache {
    pub fn new(ttl: Duration, source: RouteSource) -> Self {
        Self { ttl, source, entry: Mutex::new(None) }
    }

    /// Cache for a leaf sitemap: static routes minus its exclusions, joined
    /// with its explicit routes, kept `cache_time` seconds.
    pub fn for_sitemap(global: Arc<GlobalCache>, options: &ResolvedSitemap) -> Result<Self, SitemapError> {
        let exclusions = Exclusions::new(&options.exclude)?;
        let explicit = options.routes.clone();
        let source: RouteSource = Box::new(move || {
            let statics = global.static_routes();
            Ok(join_routes(statics.routes(), &exclusions, &explicit))
        });
        Ok(Self::new(Duration::from_secs(options.cache_time), source))
    }

    /// The routes under the cache's single key.
    pub fn get(&self) -> Result<Arc<Vec<Route>>, SitemapError> {
        let mut entry = self.entry.lock();
        if let Some((at, routes)) = entry.as_ref()
            && at.elapsed() < self.ttl
        {
            return Ok(Arc::clone(routes));
        }

        let routes = Arc::new((self.source)()?);
        *entry = Some((Instant::now(), Arc::clone(&routes)));
        Ok(routes)
    }
}

impl std::fmt::Debug for RoutesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutesCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}
