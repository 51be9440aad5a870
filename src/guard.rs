use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use tracing::debug;
use url::{Host, Url};

/// Dynamic block list owned by the admin subsystem.
///
/// The gateway only ever consults this as a read-only predicate; list
/// maintenance lives entirely outside the proxy core.
pub trait BlockList: Send + Sync {
    fn is_blocked(&self, host: &str) -> bool;
}

/// Config-backed block list standing in for the external admin store.
pub struct ConfigBlockList {
    hosts: Vec<String>,
}

impl ConfigBlockList {
    pub fn new(hosts: &[String]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }
}

impl BlockList for ConfigBlockList {
    fn is_blocked(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts
            .iter()
            .any(|b| host == *b || host.ends_with(&format!(".{b}")))
    }
}

/// Hostname literals that always denote internal or metadata targets.
const DENIED_HOST_LITERALS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "169.254.169.254",
    "metadata.google.internal",
];

/// Validates outbound targets before every fetch, including redirect hops.
///
/// Rejection is numeric where it matters: the `url` crate normalizes WHATWG
/// IPv4 host notations (octal, hex, single-integer) before we see them, so
/// obfuscated spellings of private ranges land in the same octet checks.
pub struct SsrfGuard {
    block_list: Arc<dyn BlockList>,
}

impl SsrfGuard {
    pub fn new(block_list: Arc<dyn BlockList>) -> Self {
        Self { block_list }
    }

    pub fn is_allowed(&self, raw: &str) -> bool {
        let url = match Url::parse(raw) {
            Ok(u) => u,
            Err(_) => return false,
        };

        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }

        let host = match url.host() {
            Some(h) => h,
            None => return false,
        };

        let allowed = match host {
            Host::Ipv4(ip) => !is_denied_v4(ip) && !self.block_list.is_blocked(&ip.to_string()),
            Host::Ipv6(ip) => !is_denied_v6(&ip) && !self.block_list.is_blocked(&ip.to_string()),
            Host::Domain(domain) => {
                let domain = domain.to_ascii_lowercase();
                !is_denied_hostname(&domain) && !self.block_list.is_blocked(&domain)
            }
        };

        if !allowed {
            debug!(target: "ssrf", url = raw, "rejected outbound target");
        }
        allowed
    }
}

fn is_denied_hostname(domain: &str) -> bool {
    if domain == "localhost" || domain.ends_with(".localhost") {
        return true;
    }
    if DENIED_HOST_LITERALS
        .iter()
        .any(|d| domain == *d || domain.starts_with(&format!("{d}.")))
    {
        return true;
    }
    has_private_range_prefix(domain)
}

/// Hostnames spelled to start like a private range are treated as internal
/// even when they are registrable names rather than IP literals.
fn has_private_range_prefix(domain: &str) -> bool {
    if domain.starts_with("10.") || domain.starts_with("192.168.") {
        return true;
    }
    (16..=31).any(|n| domain.starts_with(&format!("172.{n}.")))
}

fn is_denied_v4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 0 // 0.0.0.0/8
        || o[0] == 127 // loopback
        || o[0] == 10 // RFC1918
        || (o[0] == 172 && (16..=31).contains(&o[1])) // RFC1918
        || (o[0] == 192 && o[1] == 168) // RFC1918
        || (o[0] == 169 && o[1] == 254) // link-local / cloud metadata
}

fn is_denied_v6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_denied_v4(mapped);
    }
    let first = ip.segments()[0];
    // fc00::/7 unique-local, fe80::/10 link-local
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyBlockList;
    impl BlockList for EmptyBlockList {
        fn is_blocked(&self, _host: &str) -> bool {
            false
        }
    }

    fn guard() -> SsrfGuard {
        SsrfGuard::new(Arc::new(EmptyBlockList))
    }

    #[test]
    fn rejects_internal_hosts_on_both_schemes() {
        let g = guard();
        let hosts = [
            "localhost",
            "127.0.0.1",
            "10.0.0.5",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
        ];
        for host in hosts {
            for scheme in ["http", "https"] {
                let url = format!("{scheme}://{host}/anything");
                assert!(!g.is_allowed(&url), "{url} should be rejected");
            }
        }
    }

    #[test]
    fn rejects_numeric_obfuscations() {
        let g = guard();
        // The url crate normalizes these to 127.0.0.1 / 192.168.1.1.
        assert!(!g.is_allowed("http://0x7f.0.0.1/"));
        assert!(!g.is_allowed("http://2130706433/"));
        assert!(!g.is_allowed("http://0300.0250.1.1/"));
        assert!(!g.is_allowed("http://[::1]/"));
        assert!(!g.is_allowed("http://[::ffff:10.0.0.1]/"));
    }

    #[test]
    fn rejects_private_range_boundaries() {
        let g = guard();
        assert!(!g.is_allowed("http://172.16.0.1/"));
        assert!(!g.is_allowed("http://172.31.255.254/"));
        assert!(g.is_allowed("http://172.15.0.1/"));
        assert!(g.is_allowed("http://172.32.0.1/"));
    }

    #[test]
    fn rejects_non_http_schemes() {
        let g = guard();
        assert!(!g.is_allowed("ftp://example.com/file"));
        assert!(!g.is_allowed("file:///etc/passwd"));
        assert!(!g.is_allowed("gopher://example.com/"));
    }

    #[test]
    fn allows_public_targets() {
        let g = guard();
        assert!(g.is_allowed("https://example.com/"));
        assert!(g.is_allowed("http://93.184.216.34/"));
        assert!(g.is_allowed("https://sub.example.org:8443/path?q=1"));
    }

    #[test]
    fn consults_injected_block_list() {
        let g = SsrfGuard::new(Arc::new(ConfigBlockList::new(&[
            "badsite.example".to_string()
        ])));
        assert!(!g.is_allowed("https://badsite.example/"));
        assert!(!g.is_allowed("https://www.badsite.example/page"));
        assert!(g.is_allowed("https://goodsite.example/"));
    }

    #[test]
    fn block_list_applies_to_ip_literal_hosts() {
        let g = SsrfGuard::new(Arc::new(ConfigBlockList::new(&[
            "93.184.216.34".to_string(),
            "2001:db8::2".to_string(),
        ])));
        assert!(!g.is_allowed("http://93.184.216.34/"));
        assert!(!g.is_allowed("http://[2001:db8::2]/"));
        assert!(g.is_allowed("http://93.184.216.35/"));
    }

    #[test]
    fn rejects_private_range_shaped_domains() {
        let g = guard();
        assert!(!g.is_allowed("http://10.evil.com/"));
        assert!(!g.is_allowed("http://192.168.evil.com/"));
        assert!(!g.is_allowed("http://172.31.lan.example/"));
        assert!(g.is_allowed("http://100.evil.com/"));
        assert!(g.is_allowed("http://172.15.example.org/"));
    }

    #[test]
    fn malformed_urls_are_rejected_not_panicked() {
        let g = guard();
        assert!(!g.is_allowed("not a url"));
        assert!(!g.is_allowed("http://"));
        assert!(!g.is_allowed(""));
    }
}
