use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

use super::proxy_target;

static CSS_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(\s*(['"]?)([^'")\s]+)['"]?\s*\)"#).unwrap());

static CSS_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"@import\s+(['"])([^'"]+)['"]"#).unwrap());

/// Rewrite every `url(...)` and string-form `@import` through the gateway.
///
/// Malformed or unresolvable references are left exactly as found; a partially
/// rewritten stylesheet beats a corrupted one.
pub fn rewrite_css(css: &str, base: &Url) -> String {
    let pass1 = CSS_URL_RE.replace_all(css, |caps: &Captures| {
        let quote = &caps[1];
        match proxy_target(&caps[2], base) {
            Some(proxied) => format!("url({quote}{proxied}{quote})"),
            None => caps[0].to_string(),
        }
    });

    CSS_IMPORT_RE
        .replace_all(&pass1, |caps: &Captures| {
            let quote = &caps[1];
            match proxy_target(&caps[2], base) {
                Some(proxied) => format!("@import {quote}{proxied}{quote}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    fn base() -> Url {
        Url::parse("https://example.com/assets/").unwrap()
    }

    #[test]
    fn rewrites_relative_url_against_base() {
        let out = rewrite_css("body{background:url(img.png)}", &base());
        let expected = format!(
            "body{{background:url(/proxy/{})}}",
            codec::encode("https://example.com/assets/img.png")
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn preserves_quote_style() {
        let out = rewrite_css(r#"div{background:url("/bg.jpg")}"#, &base());
        let token = codec::encode("https://example.com/bg.jpg");
        assert_eq!(out, format!(r#"div{{background:url("/proxy/{token}")}}"#));

        let out = rewrite_css("div{background:url('/bg.jpg')}", &base());
        assert_eq!(out, format!("div{{background:url('/proxy/{token}')}}"));
    }

    #[test]
    fn rewrites_string_imports() {
        let out = rewrite_css(r#"@import "theme.css";"#, &base());
        let token = codec::encode("https://example.com/assets/theme.css");
        assert_eq!(out, format!(r#"@import "/proxy/{token}";"#));
    }

    #[test]
    fn leaves_data_uris_untouched() {
        let css = "div{background:url(data:image/png;base64,AAAA)}";
        assert_eq!(rewrite_css(css, &base()), css);
    }

    #[test]
    fn leaves_already_proxied_untouched() {
        let css = format!("div{{background:url(/proxy/{})}}", codec::encode("https://x.test/a.png"));
        assert_eq!(rewrite_css(&css, &base()), css);
    }

    #[test]
    fn malformed_css_survives() {
        let css = "div{background:url(}";
        assert_eq!(rewrite_css(css, &base()), css);
    }
}
