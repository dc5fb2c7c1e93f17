//! sitemap-kit - Sitemap generation and serving for file-routed sites.

mod cache;
mod cli;
mod config;
mod lifecycle;
mod logger;
mod predicate;
mod routes;
mod runtime;
mod serve;
mod sitemap;
mod watch;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::{SiteConfig, cfg, init_config};
use lifecycle::Sitemaps;
use routes::{get_static_routes, prerendered_urls};
use serve::{load_runtime, serve_sitemaps};

fn main() -> Result<()> {
    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));
    init_config(SiteConfig::load(cli)?);

    match &cli.command {
        Commands::Build => build(),
        Commands::Generate => generate(),
        Commands::Serve { .. } => match load_runtime(&cfg())? {
            Some(runtime) => serve_sitemaps(runtime),
            None => Ok(()),
        },
    }
}

/// Run the build hooks in order. Sitemaps are only written when a
/// prerendered page adds routes or a tree sets `generate_on_build`.
fn build() -> Result<()> {
    let config = cfg();
    let Some(sitemaps) = Sitemaps::setup(&config)? else {
        return Ok(());
    };

    sitemaps.routes_discovered(get_static_routes(&config.build.pages)?)?;
    sitemaps.before_server_build()?;

    for url in prerendered_urls(&config.build.public_dir())? {
        sitemaps.prerender_route(&url)?;
    }

    sitemaps.finish(sitemaps.server_build_closed())
}

/// Write every sitemap regardless of prerendering.
fn generate() -> Result<()> {
    let config = cfg();
    let Some(sitemaps) = Sitemaps::setup(&config)? else {
        return Ok(());
    };

    sitemaps.routes_discovered(get_static_routes(&config.build.pages)?)?;
    for url in prerendered_urls(&config.build.public_dir())? {
        sitemaps.prerender_route(&url)?;
    }

    sitemaps.finish(Some(sitemaps.generate()))
}
