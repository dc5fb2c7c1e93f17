//! Configuration management for `sitemap.toml`.
//!
//! # Sections
//!
//! | Section       | Purpose                                         |
//! |---------------|-------------------------------------------------|
//! | `enable`      | Turn the whole module off                       |
//! | `[app]`       | Router base path and fallback hostname          |
//! | `[build]`     | Output, pages and build directories, dev mode   |
//! | `[serve]`     | Sitemap server (port, interface, watch)         |
//! | `[[sitemap]]` | One table per top-level sitemap or index        |
//!
//! # Example
//!
//! ```toml
//! [app]
//! hostname = "https://example.com"
//!
//! [[sitemap]]
//! path = "/sitemap.xml"
//! exclude = ["/admin/**"]
//! filter = "|route| !route.path.starts_with('/draft')"
//!
//! [[sitemap]]
//! path = "/sitemapindex.xml"
//!
//! [[sitemap.sitemaps]]
//! path = "/blog.xml"
//! ```

mod app;
mod build;
pub mod defaults;
mod error;
mod handle;
mod serve;

pub use error::ConfigError;
pub use handle::{cfg, init_config, reload_config};

use app::AppConfig;
use build::BuildConfig;
use serve::ServeConfig;

use crate::{
    cli::{Cli, Commands},
    sitemap::{AppContext, SitemapOptions, options::validate_hostname},
};
use anyhow::{Context, Result};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Root configuration structure representing sitemap.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// CLI arguments reference
    #[serde(skip)]
    pub cli: Option<&'static Cli>,

    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// `false` turns every hook into a no-op.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub enable: bool,

    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub serve: ServeConfig,

    /// Top-level sitemap configurations, each an independent tree.
    #[serde(default = "defaults::sitemap")]
    #[educe(Default = defaults::sitemap())]
    pub sitemap: Vec<SitemapOptions>,
}

impl SiteConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: SiteConfig = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Read, apply CLI overrides and validate. A missing config file
    /// yields the defaults.
    pub fn load(cli: &'static Cli) -> Result<Self> {
        let root = cli.root.as_deref().unwrap_or(Path::new("./"));
        let config_path = root.join(&cli.config);

        let mut config = if config_path.exists() {
            Self::from_path(&config_path)?
        } else {
            Self::default()
        };
        config.update_with_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf())
    }

    /// Values the option resolver needs from the application.
    pub fn app_context(&self) -> AppContext {
        AppContext {
            base: self.app.base.clone(),
            hostname: self.app.hostname.clone(),
        }
    }

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &'static Cli) {
        self.cli = Some(cli);

        let root = cli
            .root
            .as_ref()
            .cloned()
            .unwrap_or_else(|| self.get_root().to_owned());

        self.update_path_with_root(cli, &root);
        Self::update_option(&mut self.build.dev, cli.dev.as_ref());

        if let Commands::Serve {
            interface,
            port,
            watch,
        } = &cli.command
        {
            Self::update_option(&mut self.serve.interface, interface.as_ref());
            Self::update_option(&mut self.serve.port, port.as_ref());
            Self::update_option(&mut self.serve.watch, watch.as_ref());
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Update all paths relative to root directory and normalize to absolute paths
    fn update_path_with_root(&mut self, cli: &Cli, root: &Path) {
        Self::update_option(&mut self.build.output, cli.output.as_ref());

        let root = Self::normalize_path(root);
        self.set_root(&root);

        self.config_path = Self::normalize_path(&root.join(&cli.config));
        self.build.output = Self::normalize_path(&root.join(&self.build.output));
        self.build.pages = Self::normalize_path(&root.join(&self.build.pages));
        self.build.build_dir = Self::normalize_path(&root.join(&self.build.build_dir));
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            // For non-existent paths, manually make them absolute
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    /// Validate the application section. Sitemap tables are validated per
    /// node when resolved, so one bad table doesn't block the others.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.app.base.starts_with('/') {
            return Err(ConfigError::InvalidBase(self.app.base.clone()));
        }
        if let Some(hostname) = &self.app.hostname {
            validate_hostname(hostname).map_err(ConfigError::InvalidHostname)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sitemap::SitemapError;
    use clap::Parser;
    use tempfile::TempDir;

    fn leak_cli(args: &[&str]) -> &'static Cli {
        Box::leak(Box::new(Cli::parse_from(args)))
    }

    #[test]
    fn test_from_str() {
        let config = SiteConfig::from_str(r#"
            enable = true

            [app]
            hostname = "https://example.com"

            [[sitemap]]
            path = "/a.xml"

            [[sitemap]]
            path = "/b.xml"
            exclude = ["/admin*"]
        "#).unwrap();

        assert_eq!(config.sitemap.len(), 2);
        assert_eq!(config.sitemap[1].exclude, vec!["/admin*"]);
    }

    #[test]
    fn test_default_sitemap_when_none_configured() {
        let config = SiteConfig::from_str("").unwrap();
        assert!(config.enable);
        assert_eq!(config.sitemap, vec![SitemapOptions::default()]);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result = SiteConfig::from_str("[app\nbase = '/'");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_top_level_field_rejection() {
        let result = SiteConfig::from_str("[unknown_section]\nfield = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_get_root_default() {
        let config = SiteConfig::default();
        assert_eq!(config.get_root(), Path::new("./"));
    }

    #[test]
    fn test_validate() {
        let mut config = SiteConfig::default();
        assert!(config.validate().is_ok());

        config.app.base = "docs/".into();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBase(b)) if b == "docs/"));

        config.app.base = "/docs/".into();
        config.app.hostname = Some("example.com".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHostname(SitemapError::InvalidHostname(h))) if h == "example.com"
        ));

        config.app.hostname = Some("https://example.com".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_context() {
        let config = SiteConfig::from_str(r#"
            [app]
            base = "/docs/"
            hostname = "https://example.com"
        "#).unwrap();
        let app = config.app_context();
        assert_eq!(app.base, "/docs/");
        assert_eq!(app.hostname.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_update_with_cli() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let cli = leak_cli(&["sitemap-kit", "--root", root, "--dev=true", "serve", "--port", "9000"]);

        let mut config = SiteConfig::default();
        config.update_with_cli(cli);

        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.get_root(), root);
        assert_eq!(config.config_path, root.join("sitemap.toml"));
        assert_eq!(config.build.pages, root.join("pages"));
        assert_eq!(config.build.public_dir(), root.join(".output").join("public"));
        assert!(config.build.dev);
        assert_eq!(config.serve.port, 9000);
        assert_eq!(config.serve.interface, "127.0.0.1");
    }

    #[test]
    fn test_load_from_root() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sitemap.toml"),
            "[build]\noutput = \"dist\"\n[[sitemap]]\npath = \"/s.xml\"\n",
        )
        .unwrap();
        let cli = leak_cli(&["sitemap-kit", "--root", dir.path().to_str().unwrap(), "generate"]);

        let config = SiteConfig::load(cli).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.build.output, root.join("dist"));
        assert_eq!(config.sitemap[0].path.as_deref(), Some("/s.xml"));
    }

    #[test]
    fn test_load_rejects_invalid_app() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("sitemap.toml"), "[app]\nbase = \"docs\"\n").unwrap();
        let cli = leak_cli(&["sitemap-kit", "--root", dir.path().to_str().unwrap(), "build"]);
        assert!(SiteConfig::load(cli).is_err());
    }
}
