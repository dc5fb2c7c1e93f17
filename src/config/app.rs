//! `[app]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};

/// `[app]` section in sitemap.toml - the application the sitemaps describe.
///
/// # Example
/// ```toml
/// [app]
/// base = "/docs/"
/// hostname = "https://example.com"
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Router base path the application is mounted under.
    #[serde(default = "defaults::app::base")]
    #[educe(Default = defaults::app::base())]
    pub base: String,

    /// Hostname for sitemaps that don't set their own.
    #[serde(default)]
    pub hostname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::super::SiteConfig;

    #[test]
    fn test_app_config() {
        let config: SiteConfig = toml::from_str(r#"
            [app]
            base = "/docs/"
            hostname = "https://example.com"
        "#).unwrap();

        assert_eq!(config.app.base, "/docs/");
        assert_eq!(config.app.hostname.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_app_config_defaults() {
        let config: SiteConfig = toml::from_str("").unwrap();
        assert_eq!(config.app.base, "/");
        assert!(config.app.hostname.is_none());
    }
}
