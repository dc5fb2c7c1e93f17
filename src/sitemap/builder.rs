//! Sitemap and sitemap index rendering.
//!
//! # Sitemap Format
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
//!   <url>
//!     <loc>https://example.com/</loc>
//!     <lastmod>2025-01-01</lastmod>
//!   </url>
//! </urlset>
//! ```
//!
//! Output is deterministic for a fixed route order, and the gzip
//! encoding carries no timestamp, so both are reproducible.

use super::{ResolvedIndex, ResolvedSitemap, SitemapError, options::I18nOptions};
use crate::routes::{ChangeFreq, Route};
use flate2::{Compression, write::GzEncoder};
use quick_xml::escape::escape;
use std::{collections::HashMap, io::Write};

// ============================================================================
// Constants
// ============================================================================

/// XML namespace for sitemap
const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// XML namespace for alternate-language links
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

// ============================================================================
// Public API
// ============================================================================

/// A rendered `<urlset>` document.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapDocument {
    xml: String,
}

impl SitemapDocument {
    pub fn to_xml(&self) -> &str {
        &self.xml
    }
}

/// Gzip-encode without a timestamp or file name in the header.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Render one `<url>` per route that passes the filter.
///
/// `req_host` is the hostname to use when the options carry none, such as
/// `http://<Host header>` while serving. Without either, locations are
/// relative to the base path.
pub fn create_sitemap(
    options: &ResolvedSitemap,
    routes: &[Route],
    base: &str,
    req_host: Option<&str>,
) -> Result<SitemapDocument, SitemapError> {
    let routes = apply_filter(options, routes)?;
    let hostname = options.hostname.as_deref().or(req_host).unwrap_or_default();
    let defaults = options.defaults.clone().unwrap_or_default();

    let mut entries: Vec<UrlEntry> = routes
        .iter()
        .map(|route| UrlEntry {
            loc: join_url(hostname, base, &apply_trailing_slash(&route.url, options.trailing_slash)),
            lastmod: route.lastmod.clone().or_else(|| defaults.lastmod.clone()),
            changefreq: route.changefreq.or(defaults.changefreq),
            priority: route.priority.or(defaults.priority),
            links: Vec::new(),
        })
        .collect();

    if let Some(i18n) = &options.i18n {
        link_alternates(&mut entries, &routes, i18n);
    }

    Ok(SitemapDocument { xml: render_urlset(options, &entries) })
}

/// Render a `<sitemapindex>` listing every child's `path`.
pub fn create_sitemap_index(options: &ResolvedIndex, base: &str, req_host: Option<&str>) -> String {
    let mut xml = String::with_capacity(256 + options.sitemaps.len() * 128);
    write_prolog(&mut xml, options.xsl_url.as_deref());
    write_root_open(&mut xml, "sitemapindex", options.xml_ns.as_deref(), false);

    for child in &options.sitemaps {
        let hostname = child
            .hostname()
            .or(options.hostname.as_deref())
            .or(req_host)
            .unwrap_or_default();
        xml.push_str("  <sitemap>\n");
        xml.push_str(&format!("    <loc>{}</loc>\n", escape(&join_url(hostname, base, child.path()))));
        if let Some(lastmod) = child.lastmod() {
            xml.push_str(&format!("    <lastmod>{}</lastmod>\n", escape(lastmod)));
        }
        xml.push_str("  </sitemap>\n");
    }

    xml.push_str("</sitemapindex>\n");
    xml
}

// ============================================================================
// Entries
// ============================================================================

/// Single URL entry in the sitemap
struct UrlEntry {
    loc: String,
    lastmod: Option<String>,
    changefreq: Option<ChangeFreq>,
    priority: Option<f64>,
    /// `(hreflang, href)` pairs
    links: Vec<(String, String)>,
}

/// Keep the routes whose filter returns true, in order.
fn apply_filter(options: &ResolvedSitemap, routes: &[Route]) -> Result<Vec<Route>, SitemapError> {
    let Some(filter) = &options.filter else {
        return Ok(routes.to_vec());
    };

    let options_value = serde_json::to_value(options)?;
    let routes_value = serde_json::to_value(routes)?;

    let mut kept = Vec::with_capacity(routes.len());
    for route in routes {
        let route_value = serde_json::to_value(route)?;
        if filter.test(&route_value, &options_value, &routes_value)? {
            kept.push(route.clone());
        }
    }
    Ok(kept)
}

/// Group routes named `<page><separator><locale>` by page and give each
/// entry a link to every variant of its page.
fn link_alternates(entries: &mut [UrlEntry], routes: &[Route], i18n: &I18nOptions) {
    let variant = |route: &Route| -> Option<(String, String)> {
        let (page, locale) = route.name.rsplit_once(i18n.separator.as_str())?;
        i18n.locales
            .iter()
            .any(|l| l == locale)
            .then(|| (page.to_string(), locale.to_string()))
    };

    let variants: Vec<Option<(String, String)>> = routes.iter().map(variant).collect();

    let mut groups: HashMap<&str, Vec<(String, String)>> = HashMap::new();
    for (entry, v) in entries.iter().zip(&variants) {
        if let Some((page, locale)) = v {
            let links = groups.entry(page.as_str()).or_default();
            links.push((locale.clone(), entry.loc.clone()));
            if i18n.default_locale.as_deref() == Some(locale.as_str()) {
                links.push(("x-default".into(), entry.loc.clone()));
            }
        }
    }

    for (entry, v) in entries.iter_mut().zip(&variants) {
        if let Some((page, _)) = v
            && let Some(links) = groups.get(page.as_str())
        {
            entry.links = links.clone();
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn render_urlset(options: &ResolvedSitemap, entries: &[UrlEntry]) -> String {
    let mut xml = String::with_capacity(256 + entries.len() * 96);
    write_prolog(&mut xml, options.xsl_url.as_deref());
    write_root_open(&mut xml, "urlset", options.xml_ns.as_deref(), options.i18n.is_some());

    for entry in entries {
        xml.push_str("  <url>\n");
        xml.push_str(&format!("    <loc>{}</loc>\n", escape(&entry.loc)));
        if let Some(lastmod) = &entry.lastmod {
            xml.push_str(&format!("    <lastmod>{}</lastmod>\n", escape(lastmod)));
        }
        if let Some(changefreq) = entry.changefreq {
            xml.push_str(&format!("    <changefreq>{changefreq}</changefreq>\n"));
        }
        if let Some(priority) = entry.priority {
            xml.push_str(&format!("    <priority>{}</priority>\n", format_priority(priority)));
        }
        for (hreflang, href) in &entry.links {
            xml.push_str(&format!(
                "    <xhtml:link rel=\"alternate\" hreflang=\"{}\" href=\"{}\"/>\n",
                escape(hreflang),
                escape(href)
            ));
        }
        xml.push_str("  </url>\n");
    }

    xml.push_str("</urlset>\n");
    xml
}

fn write_prolog(xml: &mut String, xsl_url: Option<&str>) {
    xml.push_str(XML_DECL);
    xml.push('\n');
    if let Some(href) = xsl_url {
        xml.push_str(&format!(
            "<?xml-stylesheet type=\"text/xsl\" href=\"{}\"?>\n",
            escape(href)
        ));
    }
}

/// `xml_ns` replaces the namespace attributes verbatim.
fn write_root_open(xml: &mut String, tag: &str, xml_ns: Option<&str>, xhtml: bool) {
    match xml_ns {
        Some(ns) => xml.push_str(&format!("<{tag} {ns}>\n")),
        None if xhtml => xml.push_str(&format!(
            "<{tag} xmlns=\"{SITEMAP_NS}\" xmlns:xhtml=\"{XHTML_NS}\">\n"
        )),
        None => xml.push_str(&format!("<{tag} xmlns=\"{SITEMAP_NS}\">\n")),
    }
}

fn format_priority(priority: f64) -> String {
    if priority.fract() == 0.0 {
        format!("{priority:.1}")
    } else {
        format!("{priority}")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `true` appends a trailing slash, `false` strips it (the root stays `/`).
fn apply_trailing_slash(url: &str, policy: Option<bool>) -> String {
    match policy {
        Some(true) if !url.ends_with('/') => format!("{url}/"),
        Some(false) if url != "/" => {
            let trimmed = url.trim_end_matches('/');
            if trimmed.is_empty() { "/".into() } else { trimmed.into() }
        }
        _ => url.into(),
    }
}

/// `hostname + base + path` without doubled slashes.
pub fn join_url(hostname: &str, base: &str, path: &str) -> String {
    let mut tail = String::from("/");
    for part in [base, path] {
        let part = part.trim_start_matches('/');
        if part.is_empty() {
            continue;
        }
        if !tail.ends_with('/') {
            tail.push('/');
        }
        tail.push_str(part);
    }
    format!("{}{tail}", hostname.trim_end_matches('/'))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sitemap::{
        ResolvedNode,
        options::{AppContext, SitemapOptions, resolve_sitemap, resolve_sitemap_index},
    };
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn options(toml_src: &str) -> ResolvedSitemap {
        let raw: SitemapOptions = toml::from_str(toml_src).unwrap();
        let app = AppContext { base: "/".into(), hostname: Some("https://example.com".into()) };
        resolve_sitemap(&raw, &app, true).unwrap()
    }

    fn routes(urls: &[&str]) -> Vec<Route> {
        urls.iter().map(|u| Route::new(*u)).collect()
    }

    #[test]
    fn test_sitemap_empty() {
        let doc = create_sitemap(&options(""), &[], "/", None).unwrap();
        let xml = doc.to_xml();
        assert!(xml.starts_with(XML_DECL));
        assert!(xml.contains(&format!(r#"<urlset xmlns="{SITEMAP_NS}">"#)));
        assert!(xml.ends_with("</urlset>\n"));
        assert!(!xml.contains("<url>"));
    }

    #[test]
    fn test_sitemap_locations() {
        let doc = create_sitemap(&options(""), &routes(&["/", "/about"]), "/", None).unwrap();
        let xml = doc.to_xml();
        assert!(xml.contains("<loc>https://example.com/</loc>"));
        assert!(xml.contains("<loc>https://example.com/about</loc>"));
        assert_eq!(xml.matches("<url>").count(), 2);
        // cache order is kept
        assert!(xml.find("example.com/</loc>").unwrap() < xml.find("/about</loc>").unwrap());
    }

    #[test]
    fn test_sitemap_base_path() {
        let doc = create_sitemap(&options(""), &routes(&["/about"]), "/app/", None).unwrap();
        assert!(doc.to_xml().contains("<loc>https://example.com/app/about</loc>"));
    }

    #[test]
    fn test_request_host_fallback() {
        let mut opts = options("");
        opts.hostname = None;
        let doc = create_sitemap(&opts, &routes(&["/a"]), "/", Some("http://localhost:5278")).unwrap();
        assert!(doc.to_xml().contains("<loc>http://localhost:5278/a</loc>"));

        let doc = create_sitemap(&opts, &routes(&["/a"]), "/", None).unwrap();
        assert!(doc.to_xml().contains("<loc>/a</loc>"));
    }

    #[test]
    fn test_sitemap_escapes_special_chars() {
        let doc = create_sitemap(&options(""), &routes(&["/search?q=a&b=c"]), "/", None).unwrap();
        assert!(doc.to_xml().contains("<loc>https://example.com/search?q=a&amp;b=c</loc>"));
    }

    #[test]
    fn test_trailing_slash_policy() {
        let urls = routes(&["/", "/a", "/b/"]);

        let xml = create_sitemap(&options("trailing_slash = true"), &urls, "/", None).unwrap();
        assert!(xml.to_xml().contains("<loc>https://example.com/a/</loc>"));
        assert!(xml.to_xml().contains("<loc>https://example.com/b/</loc>"));

        let xml = create_sitemap(&options("trailing_slash = false"), &urls, "/", None).unwrap();
        assert!(xml.to_xml().contains("<loc>https://example.com/</loc>"));
        assert!(xml.to_xml().contains("<loc>https://example.com/b</loc>"));
    }

    #[test]
    fn test_url_defaults() {
        let opts = options(r#"defaults = { changefreq = "weekly", priority = 0.5, lastmod = "2025-01-01" }"#);
        let mut own = Route::new("/own");
        own.priority = Some(1.0);
        let doc = create_sitemap(&opts, &[Route::new("/"), own], "/", None).unwrap();
        let xml = doc.to_xml();

        assert_eq!(xml.matches("<changefreq>weekly</changefreq>").count(), 2);
        assert_eq!(xml.matches("<lastmod>2025-01-01</lastmod>").count(), 2);
        assert!(xml.contains("<priority>0.5</priority>"));
        assert!(xml.contains("<priority>1.0</priority>"));
    }

    #[test]
    fn test_filter_per_route() {
        let opts = options(r#"filter = "|route| !route.url.starts_with('/private')""#);
        let doc = create_sitemap(&opts, &routes(&["/", "/private/a", "/public"]), "/", None).unwrap();
        let xml = doc.to_xml();
        assert_eq!(xml.matches("<url>").count(), 2);
        assert!(!xml.contains("/private"));
    }

    #[test]
    fn test_filter_sees_options_and_routes() {
        let opts = options(r#"filter = "|options, routes| options.gzip && routes.len() > 1""#);
        let doc = create_sitemap(&opts, &routes(&["/", "/a"]), "/", None).unwrap();
        assert_eq!(doc.to_xml().matches("<url>").count(), 2);

        let doc = create_sitemap(&opts, &routes(&["/"]), "/", None).unwrap();
        assert_eq!(doc.to_xml().matches("<url>").count(), 0);
    }

    #[test]
    fn test_filter_error_surfaces() {
        let opts = options(r#"filter = "|route| route.url""#);
        let err = create_sitemap(&opts, &routes(&["/"]), "/", None).unwrap_err();
        assert!(matches!(err, SitemapError::Predicate(_)));
    }

    #[test]
    fn test_xsl_and_xml_ns() {
        let opts = options(r#"
            xsl_url = "/sitemap.xsl"
            xml_ns = 'xmlns="http://www.sitemaps.org/schemas/sitemap/0.9" xmlns:news="http://www.google.com/schemas/sitemap-news/0.9"'
        "#);
        let doc = create_sitemap(&opts, &[], "/", None).unwrap();
        let lines: Vec<&str> = doc.to_xml().lines().collect();
        assert_eq!(lines[0], XML_DECL);
        assert_eq!(lines[1], r#"<?xml-stylesheet type="text/xsl" href="/sitemap.xsl"?>"#);
        assert!(lines[2].contains("xmlns:news="));
    }

    #[test]
    fn test_i18n_alternates() {
        let opts = options(r#"i18n = { locales = ["en", "fr"], default_locale = "en" }"#);
        let mut en = Route::new("/about");
        en.name = "about___en".into();
        let mut fr = Route::new("/fr/about");
        fr.name = "about___fr".into();
        let plain = Route::new("/contact");

        let doc = create_sitemap(&opts, &[en, fr, plain], "/", None).unwrap();
        let xml = doc.to_xml();

        assert!(xml.contains(&format!(r#"xmlns:xhtml="{XHTML_NS}""#)));
        // each variant links to both languages plus the default
        assert_eq!(
            xml.matches(r#"<xhtml:link rel="alternate" hreflang="fr" href="https://example.com/fr/about"/>"#).count(),
            2
        );
        assert_eq!(xml.matches(r#"hreflang="x-default" href="https://example.com/about""#).count(), 2);
        assert_eq!(xml.matches("<xhtml:link").count(), 6);
    }

    #[test]
    fn test_gzip_roundtrip() {
        let doc = create_sitemap(&options(""), &routes(&["/", "/a", "/b"]), "/", None).unwrap();
        let compressed = gzip(doc.to_xml().as_bytes()).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, doc.to_xml());

        // reproducible
        assert_eq!(gzip(doc.to_xml().as_bytes()).unwrap(), compressed);
    }

    #[test]
    fn test_sitemap_deterministic() {
        let opts = options("");
        let urls = routes(&["/", "/x", "/y"]);
        let a = create_sitemap(&opts, &urls, "/", None).unwrap();
        let b = create_sitemap(&opts, &urls, "/", None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sitemap_index() {
        let raw: SitemapOptions = toml::from_str(r#"
            path = "/sitemap.xml"
            [[sitemaps]]
            path = "/a.xml"
            lastmod = "2025-02-01"
            [[sitemaps]]
            path = "/b.xml"
            hostname = "https://b.example.com"
        "#)
        .unwrap();
        let app = AppContext { base: "/".into(), hostname: Some("https://example.com".into()) };
        let index = resolve_sitemap_index(&raw, &app).unwrap();
        let xml = create_sitemap_index(&index, "/", None);

        assert!(xml.contains(&format!(r#"<sitemapindex xmlns="{SITEMAP_NS}">"#)));
        assert_eq!(xml.matches("<sitemap>").count(), 2);
        assert!(xml.contains("<loc>https://example.com/a.xml</loc>"));
        assert!(xml.contains("<lastmod>2025-02-01</lastmod>"));
        assert!(xml.contains("<loc>https://b.example.com/b.xml</loc>"));
        // children are referenced by their xml path, not the gzip one
        assert!(!xml.contains(".gz"));
        assert!(matches!(index.sitemaps[0], ResolvedNode::Sitemap(_)));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.com", "/", "/"), "https://a.com/");
        assert_eq!(join_url("https://a.com/", "/", "/x"), "https://a.com/x");
        assert_eq!(join_url("https://a.com", "/app/", "x.xml"), "https://a.com/app/x.xml");
        assert_eq!(join_url("https://a.com", "/app", "/x/"), "https://a.com/app/x/");
        assert_eq!(join_url("", "/", "/x"), "/x");
    }

    #[test]
    fn test_format_priority() {
        assert_eq!(format_priority(1.0), "1.0");
        assert_eq!(format_priority(0.0), "0.0");
        assert_eq!(format_priority(0.75), "0.75");
    }
}
