use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Everything the proxy core needs. The stealth-site list and the blocked
/// host list are deployment data, not logic; they live here so updates never
/// require a rebuild.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub stealth_hosts: Vec<String>,
    pub blocked_hosts: Vec<String>,
    pub fetch: FetchConfig,
    pub stealth: StealthConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub max_response_bytes: usize,
    pub user_agents: Vec<String>,
    pub retry: RetryConfig,
}

/// Block-page retry heuristic. The body-size threshold and marker strings are
/// sniffing, not validated behavior, so they stay tunable rather than baked
/// into code.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_body_bytes: usize,
    pub markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StealthConfig {
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    #[serde(with = "duration_serde")]
    pub settle_delay: Duration,
    #[serde(with = "duration_serde")]
    pub launch_poll_interval: Duration,
    pub window_width: u32,
    pub window_height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(with = "duration_serde")]
    pub ttl: Duration,
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,
    pub high_water: usize,
    pub low_water: usize,
    pub css_max_bytes: usize,
    pub asset_max_bytes: usize,
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be zero");
        }

        let fetch = &self.gateway.fetch;
        if fetch.timeout.is_zero() {
            anyhow::bail!("Fetch timeout cannot be zero");
        }
        if fetch.max_response_bytes == 0 {
            anyhow::bail!("max_response_bytes cannot be zero");
        }
        if fetch.user_agents.is_empty() {
            anyhow::bail!("At least one user agent is required");
        }

        let cache = &self.gateway.cache;
        if cache.enabled {
            if cache.low_water >= cache.high_water {
                anyhow::bail!(
                    "Cache low_water ({}) must be below high_water ({})",
                    cache.low_water,
                    cache.high_water
                );
            }
            if cache.sweep_interval.is_zero() {
                anyhow::bail!("Cache sweep_interval cannot be zero");
            }
        }

        if self.gateway.stealth.launch_poll_interval.is_zero() {
            anyhow::bail!("Stealth launch_poll_interval cannot be zero");
        }

        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() > 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(
        s: &str,
    ) -> std::result::Result<Duration, Box<dyn std::error::Error + Send + Sync>> {
        if s.ends_with("ms") {
            let num: u64 = s.trim_end_matches("ms").parse()?;
            Ok(Duration::from_millis(num))
        } else if s.ends_with('s') {
            let num: u64 = s.trim_end_matches('s').parse()?;
            Ok(Duration::from_secs(num))
        } else if s.ends_with('m') {
            let num: u64 = s.trim_end_matches('m').parse()?;
            Ok(Duration::from_secs(num * 60))
        } else if s.ends_with('h') {
            let num: u64 = s.trim_end_matches('h').parse()?;
            Ok(Duration::from_secs(num * 3600))
        } else {
            let num: u64 = s.parse()?;
            Ok(Duration::from_secs(num))
        }
    }
}
