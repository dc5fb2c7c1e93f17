//! `[build]` section configuration.
//!
//! Contains the directories the sitemap pipeline reads from and writes to.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `[build]` section in sitemap.toml - build directories.
///
/// # Example
/// ```toml
/// [build]
/// output = ".output"       # Output directory
/// public = "public"        # Generated files go to <output>/<public>
/// pages = "pages"          # Scanned for static routes
/// build_dir = ".build"     # Route snapshot and runtime config
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root directory (usually set via CLI `--root`).
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Build output directory.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,

    /// Public directory inside `output`, where sitemap files are written.
    #[serde(default = "defaults::build::public")]
    #[educe(Default = defaults::build::public())]
    pub public: PathBuf,

    /// Page directory scanned for static routes.
    #[serde(default = "defaults::build::pages")]
    #[educe(Default = defaults::build::pages())]
    pub pages: PathBuf,

    /// Intermediate build state; the route snapshot lives in `<build_dir>/dist`.
    #[serde(default = "defaults::build::build_dir")]
    #[educe(Default = defaults::build::build_dir())]
    pub build_dir: PathBuf,

    /// Dev mode: no route snapshot is read or written and the server
    /// resolves options in-process.
    #[serde(default)]
    pub dev: bool,
}

impl BuildConfig {
    /// `<output>/<public>`.
    pub fn public_dir(&self) -> PathBuf {
        self.output.join(&self.public)
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }
}
