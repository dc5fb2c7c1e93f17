//! Sitemap options, rendering and the recursive dispatcher.

pub mod builder;
pub mod dispatch;
mod error;
pub mod options;

pub use error::SitemapError;
pub use options::{AppContext, ResolvedIndex, ResolvedNode, ResolvedSitemap, SitemapOptions};
