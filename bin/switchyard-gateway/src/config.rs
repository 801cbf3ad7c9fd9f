//! Gateway configuration file

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use hyper::header::HeaderName;
use serde::{Deserialize, Serialize};
use switchyard_api::{Instance, RouteConfig};
use switchyard_core::{CacheConfig, Locality};
use switchyard_proxy::{MatchPolicy, RetryPolicy, TimeoutPolicy, TrafficPolicy, TransportOptions};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    /// Version of this gateway; requests without a version header prefer it
    pub version: String,
    pub version_header: String,
    /// Set to prefer instances in the same zone, then region
    pub locality: Option<Locality>,
    pub prefix_match_policy: MatchPolicy,
    pub cache_ttl_secs: u64,
    pub watch_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry: RetryConfig,
    /// Body sent when a matched route cannot be served
    pub error_body: String,
    /// Static service registry: service name to instances
    pub registry: BTreeMap<String, Vec<Instance>>,
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            version: String::new(),
            version_header: "x-version".to_string(),
            locality: None,
            prefix_match_policy: MatchPolicy::Longest,
            cache_ttl_secs: 10,
            watch_interval_secs: 15,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            retry: RetryConfig::default(),
            error_body: switchyard_proxy::service::DEFAULT_ERROR_BODY.to_string(),
            registry: BTreeMap::new(),
            routes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retryable_status_codes: Vec<u16>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            retryable_status_codes: policy.retryable_status_codes,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl GatewayConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config file: {}", path.display())),
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config file: {}", path.display())),
            _ => Err(anyhow::anyhow!(
                "Unsupported config file format. Supported formats: .yaml, .yml, .json"
            )),
        }
    }

    pub fn traffic_policy(&self) -> TrafficPolicy {
        TrafficPolicy {
            timeout: TimeoutPolicy {
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            },
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                retryable_status_codes: self.retry.retryable_status_codes.clone(),
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }

    pub fn transport_options(&self) -> Result<TransportOptions> {
        let version_header = HeaderName::from_bytes(self.version_header.as_bytes())
            .with_context(|| format!("Invalid versionHeader: {:?}", self.version_header))?;
        Ok(TransportOptions {
            version_header,
            local_version: self.version.clone(),
            locality: self.locality.clone(),
            traffic: self.traffic_policy(),
            cache: CacheConfig {
                ttl: Duration::from_secs(self.cache_ttl_secs),
            },
            stream_header_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
listen: "127.0.0.1:9000"
version: v1
prefixMatchPolicy: shortest
cacheTtlSecs: 5
retry:
  maxRetries: 2
registry:
  users:
    - address: 10.0.0.1
      port: 8080
    - address: 10.0.0.2
      port: 8080
      version: v2
      weight: 3
routes:
  - matchType: prefixMatch
    path: /users
    targetType: discovery
    serviceName: users
  - matchType: fullMatch
    path: /mock1
    targetType: mock
    mockContent:
      contentType: json
      respStr: '{"code":2001}'
"#;

    #[test]
    fn test_yaml_config() {
        let config: GatewayConfig = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.version, "v1");
        assert_eq!(config.prefix_match_policy, MatchPolicy::Shortest);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.registry["users"][1].weight, 3);
        assert_eq!(config.registry["users"][0].weight, 1);

        // unspecified values keep their defaults
        assert_eq!(config.version_header, "x-version");
        assert_eq!(config.watch_interval(), Duration::from_secs(15));
        let policy = config.traffic_policy();
        assert_eq!(policy.retry.max_retries, 2);
        assert_eq!(policy.retry.retryable_status_codes, vec![502, 503, 504]);
        assert_eq!(policy.retry.initial_backoff, Duration::from_millis(50));

        let options = config.transport_options().unwrap();
        assert_eq!(options.cache.ttl, Duration::from_secs(5));
        assert_eq!(options.local_version, "v1");
    }

    #[test]
    fn test_json_and_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.error_body, "upstream unavailable");
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_bad_version_header() {
        let config = GatewayConfig {
            version_header: "bad header".to_string(),
            ..Default::default()
        };
        assert!(config.transport_options().is_err());
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let path = std::env::temp_dir().join(format!("switchyard-{}.toml", std::process::id()));
        std::fs::write(&path, "listen = 1").unwrap();
        let result = GatewayConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
