//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sitemap generator and server
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root directory
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Output directory path (relative to project root)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file name (default: sitemap.toml)
    #[arg(short = 'C', long, default_value = "sitemap.toml")]
    pub config: PathBuf,

    /// Dev mode: skip the route snapshot and resolve options in-process
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub dev: Option<bool>,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Discover routes, register handlers, pick up prerendered pages and
    /// generate sitemaps when the build asks for it
    Build,

    /// Discover routes and write every sitemap to the output directory
    Generate,

    /// Serve sitemaps on request
    Serve {
        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// The port you should provide
        #[arg(short, long)]
        port: Option<u16>,

        /// enable watch
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::parse_from(["sitemap-kit", "-C", "site.toml", "serve", "-p", "8080", "--watch=false"]);
        assert_eq!(cli.config, PathBuf::from("site.toml"));
        assert!(matches!(
            cli.command,
            Commands::Serve { port: Some(8080), watch: Some(false), interface: None }
        ));
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::parse_from(["sitemap-kit", "generate"]);
        assert_eq!(cli.config, PathBuf::from("sitemap.toml"));
        assert!(cli.dev.is_none());
        assert!(cli.root.is_none());
        assert!(matches!(cli.command, Commands::Generate));
    }
}
