//! Global config with atomic reload support.
//!
//! Uses `arc-swap` for lock-free reads and atomic config replacement.
//! This enables hot-reloading of `sitemap.toml` while serving in dev mode.
//!
//! ```text
//!   request threads ── cfg() ──────────┐
//!                     (lock-free)      ▼
//!                               CONFIG (ArcSwap)
//!                                      ▲
//!   watcher ───────── reload_config() ─┘
//!                     (atomic replace)
//! ```

use super::SiteConfig;
use anyhow::Context;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::{
    fs,
    sync::{Arc, LazyLock},
};

/// Global config storage with atomic replacement support.
///
/// Initialized with default config, then replaced with loaded config in main.
pub static CONFIG: LazyLock<ArcSwap<SiteConfig>> =
    LazyLock::new(|| ArcSwap::from_pointee(SiteConfig::default()));

/// Hash of the config file content last loaded.
static CONFIG_HASH: Mutex<Option<blake3::Hash>> = Mutex::new(None);

/// Get current config as `Arc<SiteConfig>`.
///
/// Lock-free read via atomic load. The old config stays valid for readers
/// that loaded it before a reload.
#[inline]
pub fn cfg() -> Arc<SiteConfig> {
    CONFIG.load_full()
}

/// Replace config atomically (called when sitemap.toml changes).
///
/// Returns `true` if config was actually updated, `false` if content matches
/// last load.
pub fn reload_config() -> anyhow::Result<bool> {
    let c = cfg();
    let cli = c.cli.context("config was not initialized from the command line")?;

    // file might be deleted temporarily by an editor; bubble up
    let content = fs::read(&c.config_path)
        .with_context(|| format!("failed to read {}", c.config_path.display()))?;
    let new_hash = blake3::hash(&content);

    let mut last = CONFIG_HASH.lock();
    if *last == Some(new_hash) {
        return Ok(false);
    }

    let new_config = SiteConfig::load(cli)?;
    CONFIG.store(Arc::new(new_config));
    *last = Some(new_hash);

    Ok(true)
}

/// Initialize global config (called once at startup).
#[inline]
pub fn init_config(config: SiteConfig) {
    if let Ok(content) = fs::read(&config.config_path) {
        *CONFIG_HASH.lock() = Some(blake3::hash(&content));
    }

    CONFIG.store(Arc::new(config));
}
