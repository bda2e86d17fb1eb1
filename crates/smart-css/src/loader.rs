//! Decide whether a reference denotes a stylesheet or an opaque asset.

use reqwest::header::{CONTENT_TYPE, HeaderMap};

/// How a fetched or local resource is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    /// Parsed and bundled.
    Css,
    /// Copied as-is.
    File,
}

/// Classify a path or URL, preferring the response's `Content-Type` when one exists.
///
/// A `text/css` content type wins over the extension; the extension (after
/// dropping query and fragment) is the fallback for things never fetched.
pub fn classify(path_or_url: &str, headers: Option<&HeaderMap>) -> Loader {
    if headers.is_some_and(is_css_content_type) {
        return Loader::Css;
    }

    let path = path_or_url
        .split(['?', '#'])
        .next()
        .unwrap_or(path_or_url);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((_, ext)) if ext.eq_ignore_ascii_case("css") => Loader::Css,
        _ => Loader::File,
    }
}

fn is_css_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/css"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        map
    }

    #[test]
    fn test_header_wins_over_extension() {
        let h = headers("text/css; charset=utf-8");
        assert_eq!(classify("https://cdn.example.com/logo.png", Some(&h)), Loader::Css);
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(classify("styles/main.css", None), Loader::Css);
        assert_eq!(classify("https://cdn.example.com/a.CSS?v=2", None), Loader::Css);
        assert_eq!(classify("https://cdn.example.com/bg.png", None), Loader::File);
        assert_eq!(classify("https://cdn.example.com/css2?family=Inter", None), Loader::File);
        assert_eq!(classify("https://cdn.example.com/x.png#a.css", None), Loader::File);
    }

    #[test]
    fn test_non_css_header_falls_back_to_extension() {
        let h = headers("text/plain");
        assert_eq!(classify("https://cdn.example.com/a.css", Some(&h)), Loader::Css);
        assert_eq!(classify("https://cdn.example.com/a.txt", Some(&h)), Loader::File);
    }

    #[test]
    fn test_directory_with_dot_is_not_an_extension() {
        assert_eq!(classify("https://cdn.example.com/v1.css/logo", None), Loader::File);
    }
}
