use url::Url;

/// Reference schemes that must never be routed through the gateway.
const SKIPPED_SCHEMES: &[&str] = &[
    "javascript:",
    "mailto:",
    "data:",
    "blob:",
    "about:",
    "tel:",
];

/// Resolve a possibly-relative reference against a base URL.
///
/// Returns `None` for fragment-only references, non-proxyable schemes, and
/// malformed input. Absolute `http(s)` references come back as-is,
/// protocol-relative ones inherit the base scheme, and everything else goes
/// through standard relative-URL resolution.
pub fn resolve(reference: &str, base: &Url) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }

    let lower = reference.to_ascii_lowercase();
    if SKIPPED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return None;
    }

    if lower.starts_with("http://") || lower.starts_with("https://") {
        // Validate but hand back the original text untouched.
        return Url::parse(reference).ok().map(|_| reference.to_string());
    }

    if let Some(rest) = reference.strip_prefix("//") {
        return Url::parse(&format!("{}://{}", base.scheme(), rest))
            .ok()
            .map(|u| u.to_string());
    }

    base.join(reference).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/dir/page.html").unwrap()
    }

    #[test]
    fn skips_non_proxyable_references() {
        let b = base();
        assert_eq!(resolve("#section", &b), None);
        assert_eq!(resolve("javascript:void(0)", &b), None);
        assert_eq!(resolve("mailto:user@example.com", &b), None);
        assert_eq!(resolve("data:image/png;base64,AAAA", &b), None);
        assert_eq!(resolve("blob:https://example.com/uuid", &b), None);
        assert_eq!(resolve("", &b), None);
    }

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            resolve("https://other.org/x", &base()).as_deref(),
            Some("https://other.org/x")
        );
    }

    #[test]
    fn protocol_relative_inherits_scheme() {
        assert_eq!(
            resolve("//cdn.example.net/app.js", &base()).as_deref(),
            Some("https://cdn.example.net/app.js")
        );
        let http_base = Url::parse("http://example.com/").unwrap();
        assert_eq!(
            resolve("//cdn.example.net/app.js", &http_base).as_deref(),
            Some("http://cdn.example.net/app.js")
        );
    }

    #[test]
    fn root_relative_uses_base_origin() {
        assert_eq!(
            resolve("/about", &base()).as_deref(),
            Some("https://example.com/about")
        );
    }

    #[test]
    fn relative_resolves_against_base_directory() {
        assert_eq!(
            resolve("img.png", &base()).as_deref(),
            Some("https://example.com/dir/img.png")
        );
        assert_eq!(
            resolve("../up.css", &base()).as_deref(),
            Some("https://example.com/up.css")
        );
    }
}
