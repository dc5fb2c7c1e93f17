//! File system watcher that hot-swaps the serving router.
//!
//! Outside dev mode the server follows the build: it watches the runtime
//! config file and reloads when a build rewrites it. In dev mode it watches
//! `sitemap.toml` and the pages directory and resolves everything again.
//!
//! ```text
//! notify events ──▶ Debouncer (300ms) ──▶ reload() ──▶ router.store()
//! ```

use crate::{
    config::{SiteConfig, cfg, reload_config},
    lifecycle::runtime_in_process,
    log,
    runtime::{RUNTIME_FILE, RuntimeConfig},
    serve::Router,
};
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

const DEBOUNCE_MS: u64 = 300;
const RELOAD_COOLDOWN_MS: u64 = 800;

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

// =============================================================================
// Debounce State
// =============================================================================

/// Batches rapid file events with debouncing and reload cooldown.
struct Debouncer {
    pending: HashSet<PathBuf>,
    last_event: Option<Instant>,
    last_reload: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: HashSet::new(),
            last_event: None,
            last_reload: None,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_reload
            .is_some_and(|t| t.elapsed() < Duration::from_millis(RELOAD_COOLDOWN_MS))
    }

    fn add(&mut self, event: Event) {
        for path in event.paths {
            if !is_temp_file(&path) {
                self.pending.insert(path);
            }
        }
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        self.pending.drain().collect()
    }

    fn mark_reload(&mut self) {
        self.last_reload = Some(Instant::now());
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

// =============================================================================
// Reload
// =============================================================================

/// Whether a changed path can affect the served sitemaps.
fn is_watched(path: &Path, config: &SiteConfig) -> bool {
    if config.build.dev {
        path == config.config_path || path.starts_with(&config.build.pages)
    } else {
        path.file_name().is_some_and(|n| n == RUNTIME_FILE)
    }
}

/// Build a fresh router for `config`. `Ok(None)` when there is nothing to
/// serve yet (no runtime file, or the module was disabled).
fn reload(config: &SiteConfig) -> Result<Option<Router>> {
    let runtime = if config.build.dev {
        runtime_in_process(config)?
    } else {
        RuntimeConfig::read(config.build.build_dir())?
    };
    runtime
        .map(|runtime| Router::new(&runtime, &config.app.base))
        .transpose()
}

/// Process file changes. Returns true if the router was replaced.
fn handle_changes(paths: &[PathBuf], router: &ArcSwap<Router>) -> bool {
    let before = cfg();
    let relevant: Vec<_> = paths.iter().filter(|p| is_watched(p, &before)).collect();
    let Some(first) = relevant.first() else {
        return false;
    };

    if before.build.dev && relevant.iter().any(|p| **p == before.config_path) {
        match reload_config() {
            Ok(true) => log!("watch"; "config changed"),
            Ok(false) => {}
            Err(e) => {
                log!("watch"; "config reload failed: {e:#}");
                return false;
            }
        }
    }

    let rel = first.strip_prefix(before.get_root()).unwrap_or(first);
    log!("watch"; "{} changed, reloading sitemaps", rel.display());

    match reload(&cfg()) {
        Ok(Some(next)) => {
            log!("watch"; "{} sitemap routes", next.len());
            router.store(next.into());
            true
        }
        Ok(None) => false,
        Err(e) => {
            // keep serving the previous router
            log!("watch"; "reload failed: {e:#}");
            false
        }
    }
}

// =============================================================================
// Watcher Setup
// =============================================================================

fn setup_watchers(watcher: &mut impl Watcher, config: &SiteConfig) -> Result<()> {
    if config.build.dev {
        for (path, mode) in [
            (&config.config_path, RecursiveMode::NonRecursive),
            (&config.build.pages, RecursiveMode::Recursive),
        ] {
            if path.exists() {
                watcher
                    .watch(path, mode)
                    .with_context(|| format!("Failed to watch {}", path.display()))?;
                log!("watch"; "{}", path.display());
            }
        }
    } else {
        let runtime = RuntimeConfig::path(config.build.build_dir());
        let dir = runtime.parent().unwrap_or(config.build.build_dir());
        // the directory exists before any build wrote the file
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        log!("watch"; "{}", runtime.display());
    }
    Ok(())
}

const fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

// =============================================================================
// Public API
// =============================================================================

/// Start blocking file watcher with debouncing; swaps `router` on change.
pub fn watch_for_changes_blocking(router: &ArcSwap<Router>) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
    setup_watchers(&mut watcher, &cfg())?;

    let mut debouncer = Debouncer::new();

    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) && !debouncer.in_cooldown() => {
                debouncer.add(event);
            }
            Ok(Err(e)) => log!("watch"; "error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) if debouncer.ready() => {
                if handle_changes(&debouncer.take(), router) {
                    debouncer.mark_reload();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            // Other cases: irrelevant events, timeout without ready, etc.
            _ => {}
        }
    }

    Ok(())
}
