//! Title and outbound-link extraction from rendered HTML.

use crate::error::{Result, ScanError};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScanError::ParseError(format!("selector {css}: {e}")))
}

/// Text of the document `<title>`, trimmed. Empty when the page has none.
pub fn extract_title(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let title_selector = selector("title")?;

    Ok(document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default())
}

/// Every `a[href]` target on the page that resolves to an absolute http(s) URL,
/// in document order.
pub fn extract_anchor_links(html: &str, base_url: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let link_selector = selector("a[href]")?;
    let mut links = Vec::new();

    for element in document.select(&link_selector) {
        if let Some(href) = element.value().attr("href")
            && let Some(absolute_url) = resolve_url(base_url, href)
        {
            debug!("Found link: {}", absolute_url);
            links.push(absolute_url);
        }
    }

    Ok(links)
}

/// Resolve `href` against `base` the way a browser computes `a.href`: the
/// fragment is kept, and an empty or fragment-only href points back at the
/// base document. Returns `None` unless the result is http or https.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let base_url = Url::parse(base).ok()?;
    let resolved = base_url.join(href.trim()).ok()?;

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title_trims_whitespace() {
        let html = "<html><head><title>\n  Login | Acme  \n</title></head></html>";
        assert_eq!(extract_title(html).unwrap(), "Login | Acme");
    }

    #[test]
    fn test_extract_title_missing() {
        assert_eq!(extract_title("<html><body>hi</body></html>").unwrap(), "");
    }

    #[test]
    fn test_extract_anchor_links_resolves_relative() {
        let html = r#"<a href="/about">About</a>
            <a href="https://other.test/x#frag">X</a>
            <a href="mailto:sec@acme.test">Mail</a>
            <a href="javascript:void(0)">JS</a>
            <a href="ftp://files.acme.test/">FTP</a>"#;

        let links = extract_anchor_links(html, "https://acme.test/index.html").unwrap();

        assert_eq!(
            links,
            vec![
                "https://acme.test/about".to_string(),
                "https://other.test/x#frag".to_string()
            ]
        );
    }

    #[test]
    fn test_resolve_url_fragment_only_points_at_base() {
        assert_eq!(
            resolve_url("https://acme.test/docs/page?x=1", "#top"),
            Some("https://acme.test/docs/page?x=1#top".to_string())
        );
    }

    #[test]
    fn test_resolve_url_keeps_fragment() {
        assert_eq!(
            resolve_url("https://acme.test/", "/guide#install"),
            Some("https://acme.test/guide#install".to_string())
        );
    }

    #[test]
    fn test_resolve_url_drops_non_http_schemes() {
        assert_eq!(resolve_url("https://acme.test/", "mailto:sec@acme.test"), None);
        assert_eq!(resolve_url("https://acme.test/", "javascript:void(0)"), None);
        assert_eq!(resolve_url("https://acme.test/", "tel:+15550100"), None);
    }

    #[test]
    fn test_resolve_url_invalid_base() {
        assert_eq!(resolve_url("not a url", "/path"), None);
    }
}
