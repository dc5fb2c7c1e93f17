//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

pub fn r#true() -> bool {
    true
}

// ============================================================================
// [app] Section Defaults
// ============================================================================

pub mod app {
    pub fn base() -> String {
        "/".into()
    }
}

// ============================================================================
// [build] Section Defaults
// ============================================================================

pub mod build {
    use std::path::PathBuf;

    pub fn root() -> Option<PathBuf> {
        None
    }

    pub fn output() -> PathBuf {
        ".output".into()
    }

    pub fn public() -> PathBuf {
        "public".into()
    }

    pub fn pages() -> PathBuf {
        "pages".into()
    }

    pub fn build_dir() -> PathBuf {
        ".build".into()
    }
}

// ============================================================================
// [serve] Section Defaults
// ============================================================================

pub mod serve {
    pub fn interface() -> String {
        "127.0.0.1".into()
    }

    pub fn port() -> u16 {
        5278
    }
}

// ============================================================================
// [[sitemap]] Defaults
// ============================================================================

/// Without any `[[sitemap]]` table a single default sitemap is served.
pub fn sitemap() -> Vec<crate::sitemap::SitemapOptions> {
    vec![crate::sitemap::SitemapOptions::default()]
}
