//! Fragment asset discovery via `Link` headers.
//!
//! Fragments announce their stylesheets and scripts through an [RFC 5988]
//! `Link` response header (or `X-AMZ-Meta-Link` when an intermediary strips
//! `Link`). This module parses those headers into typed [`AssetEntry`]
//! values and formats the outer response's preload header.
//!
//! # Header Format
//!
//! ```text
//! Link: <http://assets/f.css>; rel="stylesheet", <http://assets/f.js>; rel="fragment-script"
//! ```
//!
//! Recognized rels: `stylesheet` and `fragment-script`. Entries beyond the
//! per-rel cap are dropped. An asset is same-origin iff its `host[:port]`
//! equals the incoming request's `Host` value.
//!
//! [RFC 5988]: https://datatracker.ietf.org/doc/html/rfc5988

use crate::types::{AssetEntry, AssetRel};
use http::HeaderMap;
use url::Url;

/// Header consulted for asset discovery, in priority order.
const LINK_HEADERS: [&str; 2] = ["link", "x-amz-meta-link"];

/// Parse a fragment response's asset links, capped per rel.
///
/// The first present header of `Link` / `X-AMZ-Meta-Link` wins; the other is
/// ignored even if both are set.
pub fn fragment_assets(
    headers: &HeaderMap,
    request_host: Option<&str>,
    max_asset_links: usize,
) -> Vec<AssetEntry> {
    let Some(value) = LINK_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
    else {
        return Vec::new();
    };

    let cap = max_asset_links.max(1);
    let mut stylesheets = 0usize;
    let mut scripts = 0usize;
    let mut assets = Vec::new();

    for (href, rel) in parse_link_value(value) {
        let rel = match rel.as_str() {
            "stylesheet" => AssetRel::Stylesheet,
            "fragment-script" => AssetRel::FragmentScript,
            _ => continue,
        };
        let counter = match rel {
            AssetRel::Stylesheet => &mut stylesheets,
            AssetRel::FragmentScript => &mut scripts,
        };
        if *counter >= cap {
            continue;
        }
        *counter += 1;
        assets.push(AssetEntry {
            crossorigin: !is_same_origin(&href, request_host),
            href,
            rel,
        });
    }

    assets
}

/// Split a `Link` header value into `(href, rel)` pairs.
///
/// Entries are comma-separated; commas inside `<…>` or quoted parameter
/// values do not split. Entries without a `rel` parameter are skipped.
fn parse_link_value(value: &str) -> Vec<(String, String)> {
    split_entries(value)
        .into_iter()
        .filter_map(|entry| parse_entry(&entry))
        .collect()
}

fn split_entries(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_target = false;
    let mut in_quotes = false;
    for c in value.chars() {
        match c {
            '<' if !in_quotes => in_target = true,
            '>' if !in_quotes => in_target = false,
            '"' if !in_target => in_quotes = !in_quotes,
            ',' if !in_target && !in_quotes => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        entries.push(current);
    }
    entries
}

fn parse_entry(entry: &str) -> Option<(String, String)> {
    let entry = entry.trim();
    let close = entry.find('>')?;
    let href = entry.get(1..close)?.trim();
    if !entry.starts_with('<') || href.is_empty() {
        return None;
    }
    let rel = entry[close + 1..].split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("rel") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })?;
    Some((href.to_string(), rel))
}

/// Whether a URL's `host[:port]` matches the incoming request's `Host` value.
pub fn is_same_origin(href: &str, request_host: Option<&str>) -> bool {
    let Some(request_host) = request_host else {
        return false;
    };
    let Ok(url) = Url::parse(href) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    authority == request_host
}

/// Format the outer response's `Link` preload header: the runtime loader
/// first, then the primary fragment's assets (already capped).
pub fn format_preload_header(
    amd_loader_url: &str,
    client_host: Option<&str>,
    primary_assets: &[AssetEntry],
) -> String {
    let mut parts = Vec::with_capacity(1 + primary_assets.len());
    parts.push(preload_entry(
        amd_loader_url,
        "script",
        !is_same_origin(amd_loader_url, client_host),
    ));
    // Stylesheets before scripts, preserving header order within each rel.
    for asset in primary_assets.iter().filter(|a| a.rel == AssetRel::Stylesheet) {
        parts.push(preload_entry(&asset.href, "style", asset.crossorigin));
    }
    for asset in primary_assets
        .iter()
        .filter(|a| a.rel == AssetRel::FragmentScript)
    {
        parts.push(preload_entry(&asset.href, "script", asset.crossorigin));
    }
    parts.join(", ")
}

fn preload_entry(href: &str, as_kind: &str, crossorigin: bool) -> String {
    let mut entry = format!("<{href}>; rel=\"preload\"; as=\"{as_kind}\"; nopush");
    if crossorigin {
        entry.push_str("; crossorigin");
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_parses_stylesheet_and_script() {
        let headers = headers_with(
            "link",
            "<http://assets/f.css>; rel=\"stylesheet\", <http://assets/f.js>; rel=\"fragment-script\"",
        );
        let assets = fragment_assets(&headers, None, 1);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].rel, AssetRel::Stylesheet);
        assert_eq!(assets[0].href, "http://assets/f.css");
        assert_eq!(assets[1].rel, AssetRel::FragmentScript);
    }

    #[test]
    fn test_amz_meta_link_fallback() {
        let headers = headers_with(
            "x-amz-meta-link",
            "<http://assets/f.js>; rel=\"fragment-script\"",
        );
        let assets = fragment_assets(&headers, None, 1);
        assert_eq!(assets.len(), 1);
    }

    #[test]
    fn test_link_wins_over_amz_meta() {
        let mut headers = headers_with("link", "<http://a/1.js>; rel=\"fragment-script\"");
        headers.insert(
            "x-amz-meta-link",
            HeaderValue::from_static("<http://b/2.js>; rel=\"fragment-script\""),
        );
        let assets = fragment_assets(&headers, None, 1);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].href, "http://a/1.js");
    }

    #[test]
    fn test_cap_applies_per_rel() {
        let headers = headers_with(
            "link",
            "<http://a/1.js>; rel=\"fragment-script\", \
             <http://a/2.js>; rel=\"fragment-script\", \
             <http://a/1.css>; rel=\"stylesheet\"",
        );
        let assets = fragment_assets(&headers, None, 1);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].href, "http://a/1.js");
        assert_eq!(assets[1].href, "http://a/1.css");

        let assets = fragment_assets(&headers, None, 3);
        assert_eq!(assets.len(), 3);
    }

    #[test]
    fn test_unknown_rel_skipped() {
        let headers = headers_with("link", "<http://a/x>; rel=\"prefetch\"");
        assert!(fragment_assets(&headers, None, 1).is_empty());
    }

    #[test]
    fn test_same_origin_detection() {
        assert!(is_same_origin("http://shop.local/a.css", Some("shop.local")));
        assert!(is_same_origin(
            "http://shop.local:8080/a.css",
            Some("shop.local:8080")
        ));
        assert!(!is_same_origin("http://cdn.other/a.css", Some("shop.local")));
        assert!(!is_same_origin("http://shop.local/a.css", None));
        assert!(!is_same_origin("not a url", Some("shop.local")));
    }

    #[test]
    fn test_crossorigin_flag() {
        let headers = headers_with("link", "<http://cdn.other/f.css>; rel=\"stylesheet\"");
        let assets = fragment_assets(&headers, Some("shop.local"), 1);
        assert!(assets[0].crossorigin);

        let headers = headers_with("link", "<http://shop.local/f.css>; rel=\"stylesheet\"");
        let assets = fragment_assets(&headers, Some("shop.local"), 1);
        assert!(!assets[0].crossorigin);
    }

    #[test]
    fn test_preload_header_format() {
        let assets = vec![
            AssetEntry {
                href: "http://cdn/f.css".to_string(),
                rel: AssetRel::Stylesheet,
                crossorigin: true,
            },
            AssetEntry {
                href: "http://shop.local/f.js".to_string(),
                rel: AssetRel::FragmentScript,
                crossorigin: false,
            },
        ];
        let header = format_preload_header("http://cdn/loader.js", Some("shop.local"), &assets);
        assert_eq!(
            header,
            "<http://cdn/loader.js>; rel=\"preload\"; as=\"script\"; nopush; crossorigin, \
             <http://cdn/f.css>; rel=\"preload\"; as=\"style\"; nopush; crossorigin, \
             <http://shop.local/f.js>; rel=\"preload\"; as=\"script\"; nopush"
        );
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let headers = headers_with("link", "garbage, <>; rel=\"stylesheet\", <http://a/ok.css>; rel=\"stylesheet\"");
        let assets = fragment_assets(&headers, None, 2);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].href, "http://a/ok.css");
    }
}
