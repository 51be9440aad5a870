use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};
use url::Url;

use crate::config::CacheConfig;

/// Path extensions that mark a GET response as a static asset.
const CACHEABLE_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot", "png", "jpg", "jpeg", "gif",
    "webp", "svg", "ico", "avif", "bmp", "mp3", "ogg", "wav", "mp4", "webm", "wasm",
];

/// A cache hit handed back to the orchestrator.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug)]
struct CacheEntry {
    body: Bytes,
    content_type: String,
    inserted: Instant,
    // Monotonic insertion order; eviction removes the smallest first.
    sequence: u64,
}

/// In-memory static-asset cache, TTL- and count-bounded.
///
/// Reads and writes go through a concurrent map so requests never serialize
/// on the cache. Eviction is entirely the sweeper's job; the request path
/// only ever observes entries, it never blocks to clean them.
pub struct AssetCache {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    sequence: AtomicU64,
}

impl AssetCache {
    pub fn new(config: &CacheConfig) -> Self {
        if config.enabled {
            info!(
                high_water = config.high_water,
                low_water = config.low_water,
                ttl = ?config.ttl,
                "asset cache enabled"
            );
        }
        Self {
            config: config.clone(),
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Whether this URL's path names a static asset worth caching.
    pub fn is_cacheable_url(url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let path = parsed.path();
        let Some(last_segment) = path.rsplit('/').next() else {
            return false;
        };
        match last_segment.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                CACHEABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
            }
            _ => false,
        }
    }

    pub fn get(&self, url: &str) -> Option<CachedAsset> {
        if !self.config.enabled {
            return None;
        }
        let entry = self.entries.get(url)?;
        if entry.inserted.elapsed() > self.config.ttl {
            // Stale; leave removal to the sweeper.
            return None;
        }
        debug!(url, "cache hit");
        Some(CachedAsset {
            body: entry.body.clone(),
            content_type: entry.content_type.clone(),
        })
    }

    /// Store a fetched asset. Oversized payloads are silently skipped; the
    /// response is still served, just not retained.
    pub fn put(&self, url: &str, body: Bytes, content_type: &str) {
        if !self.config.enabled {
            return;
        }
        let ceiling = if content_type.contains("css") {
            self.config.css_max_bytes
        } else {
            self.config.asset_max_bytes
        };
        if body.len() > ceiling {
            debug!(url, size = body.len(), ceiling, "asset over ceiling, not cached");
            return;
        }

        self.entries.insert(
            url.to_string(),
            CacheEntry {
                body,
                content_type: content_type.to_string(),
                inserted: Instant::now(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    /// TTL pass first, then oldest-first eviction down to the low-water mark
    /// if the entry count is still above the high-water mark.
    pub fn sweep_at(&self, now: Instant) {
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted) <= ttl);
        let expired = before - self.entries.len();

        let mut evicted = 0;
        if self.entries.len() > self.config.high_water {
            let mut by_age: Vec<(String, u64)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().sequence))
                .collect();
            by_age.sort_by_key(|(_, seq)| *seq);

            let excess = self.entries.len() - self.config.low_water;
            for (key, _) in by_age.into_iter().take(excess) {
                self.entries.remove(&key);
                evicted += 1;
            }
        }

        if expired > 0 || evicted > 0 {
            debug!(expired, evicted, remaining = self.entries.len(), "cache sweep");
        }
    }

    /// Periodic sweep task; runs for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let cache = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.sweep();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(high: usize, low: usize) -> CacheConfig {
        CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
            high_water: high,
            low_water: low,
            css_max_bytes: 1024,
            asset_max_bytes: 4096,
        }
    }

    #[test]
    fn cacheable_extensions_only() {
        assert!(AssetCache::is_cacheable_url("https://x.test/app.js"));
        assert!(AssetCache::is_cacheable_url("https://x.test/a/b/style.CSS?v=2"));
        assert!(AssetCache::is_cacheable_url("https://x.test/font.woff2"));
        assert!(!AssetCache::is_cacheable_url("https://x.test/index.html"));
        assert!(!AssetCache::is_cacheable_url("https://x.test/api/data"));
        assert!(!AssetCache::is_cacheable_url("https://x.test/"));
        assert!(!AssetCache::is_cacheable_url("not a url"));
    }

    #[test]
    fn get_returns_stored_asset() {
        let cache = AssetCache::new(&config(10, 5));
        cache.put("https://x.test/a.js", Bytes::from_static(b"js"), "text/javascript");
        let hit = cache.get("https://x.test/a.js").unwrap();
        assert_eq!(hit.body.as_ref(), b"js");
        assert_eq!(hit.content_type, "text/javascript");
        assert!(cache.get("https://x.test/other.js").is_none());
    }

    #[test]
    fn oversized_assets_are_not_stored() {
        let cache = AssetCache::new(&config(10, 5));
        let big_css = Bytes::from(vec![b'x'; 2048]);
        cache.put("https://x.test/big.css", big_css, "text/css");
        assert!(cache.get("https://x.test/big.css").is_none());

        // Same size is fine for the larger non-CSS ceiling.
        let big_img = Bytes::from(vec![b'x'; 2048]);
        cache.put("https://x.test/big.png", big_img, "image/png");
        assert!(cache.get("https://x.test/big.png").is_some());
    }

    #[test]
    fn sweep_evicts_oldest_down_to_low_water() {
        let cache = AssetCache::new(&config(10, 6));
        for i in 0..14 {
            cache.put(
                &format!("https://x.test/{i}.js"),
                Bytes::from_static(b"x"),
                "text/javascript",
            );
        }
        cache.sweep();
        assert_eq!(cache.len(), 6);
        // The most recently inserted entries survive.
        for i in 8..14 {
            assert!(cache.get(&format!("https://x.test/{i}.js")).is_some(), "entry {i} missing");
        }
        for i in 0..8 {
            assert!(cache.get(&format!("https://x.test/{i}.js")).is_none(), "entry {i} kept");
        }
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = AssetCache::new(&config(10, 5));
        cache.put("https://x.test/a.js", Bytes::from_static(b"x"), "text/javascript");
        assert_eq!(cache.len(), 1);

        // Simulated clock: pretend the TTL has fully elapsed.
        cache.sweep_at(Instant::now() + Duration::from_secs(61));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn expired_entry_is_a_miss_before_sweep() {
        let mut cfg = config(10, 5);
        cfg.ttl = Duration::from_millis(0);
        let cache = AssetCache::new(&cfg);
        cache.put("https://x.test/a.js", Bytes::from_static(b"x"), "text/javascript");
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("https://x.test/a.js").is_none());
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let mut cfg = config(10, 5);
        cfg.enabled = false;
        let cache = AssetCache::new(&cfg);
        cache.put("https://x.test/a.js", Bytes::from_static(b"x"), "text/javascript");
        assert!(cache.get("https://x.test/a.js").is_none());
    }
}
