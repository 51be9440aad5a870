use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Cyclic key mixed into the URL bytes before transport encoding.
///
/// This is obfuscation, not encryption. The only purpose of the XOR pass is
/// to keep literal URLs out of proxy paths so that intermediate caches, log
/// scrapers, and content filters don't treat them as meaningful. The key is
/// deliberately public and must never be relied on as a trust boundary.
const XOR_KEY: &[u8] = b"ubg-rotor-17";

/// Encode an absolute URL into an opaque, path-safe token.
pub fn encode(url: &str) -> String {
    let mixed: Vec<u8> = url
        .bytes()
        .zip(XOR_KEY.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect();
    URL_SAFE_NO_PAD.encode(mixed)
}

/// Decode a token back into the URL it was produced from.
///
/// Returns `None` for anything that is not a well-formed token: bad base64,
/// or bytes that do not reassemble into UTF-8. Decoding never panics.
pub fn decode(token: &str) -> Option<String> {
    let mixed = URL_SAFE_NO_PAD.decode(token.as_bytes()).ok()?;
    let plain: Vec<u8> = mixed
        .iter()
        .zip(XOR_KEY.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect();
    String::from_utf8(plain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_url() {
        let urls = [
            "https://example.com/",
            "http://example.com/a/b?q=1&r=2#frag",
            "https://sub.domain.example.org:8443/path/to/asset.png",
            "https://example.com/unicode/\u{00e9}t\u{00e9}",
        ];
        for url in urls {
            assert_eq!(decode(&encode(url)).as_deref(), Some(url));
        }
    }

    #[test]
    fn token_is_path_safe() {
        let token = encode("https://example.com/some/very/long/path?with=query");
        assert!(!token.contains('/'));
        assert!(!token.contains('+'));
        assert!(!token.contains('='));
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        assert_eq!(decode(""), Some(String::new()));
        assert_eq!(decode("!!!not base64!!!"), None);
        assert_eq!(decode("%%%"), None);
    }

    #[test]
    fn tampered_token_never_panics() {
        let mut token = encode("https://example.com/page");
        token.push('x');
        // Tampering may or may not decode to bytes, but it never crashes and
        // never yields the original URL.
        if let Some(decoded) = decode(&token) {
            assert_ne!(decoded, "https://example.com/page");
        }
    }
}
