//! URL helpers for manifest references.

use tracing::warn;
use url::Url;

/// Resolves `relative` against `base` the way a browser would.
///
/// Fully-qualified URLs come back as-is, `/path` is resolved against the
/// base origin, and bare names or `./`/`../` paths against the base's
/// directory. When either side cannot be parsed the trimmed input is
/// returned unchanged, so a single bad line never aborts a whole manifest.
pub fn resolve(base: &str, relative: &str) -> String {
    let relative = relative.trim();
    if relative.is_empty() {
        return String::new();
    }

    if let Ok(absolute) = Url::parse(relative) {
        return absolute.to_string();
    }

    match Url::parse(base).and_then(|b| b.join(relative)) {
        Ok(joined) => joined.to_string(),
        Err(e) => {
            warn!(base = %base, relative = %relative, error = %e, "Failed to resolve URI");
            relative.to_string()
        }
    }
}

/// Returns `scheme://host[:port]` for an absolute http(s) URL.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    parsed.host_str()?;
    Some(parsed.origin().ascii_serialization())
}

/// True when `url` is an absolute http(s) URL.
pub fn is_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Path component of `url` without query or fragment.
///
/// Falls back to manual stripping for strings that do not parse.
pub fn path_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => {
            let end = url.find(['?', '#']).unwrap_or(url.len());
            url[..end].to_string()
        }
    }
}

/// True when the URL's path names an `.m3u8` playlist.
pub fn is_playlist_url(url: &str) -> bool {
    path_of(url).to_ascii_lowercase().ends_with(".m3u8")
}
