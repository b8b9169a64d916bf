use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WhepError};

/// Default delay between signaling attempts, also used as the ICE gathering bound
pub const DEFAULT_TIME_REQUEST_MS: u64 = 3000;

/// Negotiation configuration
///
/// Immutable for the lifetime of a session. Sessions hold it behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// WHEP/WHIP endpoint the offer is POSTed to
    pub endpoint_url: String,
    /// Delay between signaling attempts (ms)
    pub poll_interval_ms: u64,
    /// Upper bound on the ICE gathering wait (ms)
    pub ice_gather_timeout_ms: u64,
    /// TURN/STUN servers handed to the media capability
    pub relay_servers: Vec<RelayServer>,
    /// Only use relayed candidates
    pub relay_only: bool,
    /// Bearer token sent in the `Authorization` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Issue `DELETE <resource>` when the session closes
    pub teardown_on_close: bool,
    /// Per-request HTTP timeout (ms)
    pub request_timeout_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            poll_interval_ms: DEFAULT_TIME_REQUEST_MS,
            ice_gather_timeout_ms: DEFAULT_TIME_REQUEST_MS,
            relay_servers: vec![],
            relay_only: true,
            bearer_token: None,
            teardown_on_close: true,
            request_timeout_ms: 10_000,
        }
    }
}

impl NegotiationConfig {
    /// Create a config for an endpoint with default timings
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ice_gather_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gather_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check the config before any session is built from it
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.endpoint_url).map_err(|e| {
            WhepError::InvalidConfig(format!("endpoint_url '{}': {}", self.endpoint_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WhepError::InvalidConfig(format!(
                "endpoint_url must be http(s), got '{}'",
                url.scheme()
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(WhepError::InvalidConfig(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.ice_gather_timeout_ms == 0 {
            return Err(WhepError::InvalidConfig(
                "ice_gather_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(WhepError::InvalidConfig(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.relay_only && self.relay_servers.is_empty() {
            tracing::warn!("relay_only is set but no relay servers are configured; ICE gathering will produce no candidates");
        }
        for server in &self.relay_servers {
            if server.urls.is_empty() {
                return Err(WhepError::InvalidConfig(
                    "relay server entry without urls".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Load a config from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!("Loaded negotiation config from {}", path.display());
        Ok(config)
    }
}

/// TURN/STUN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServer {
    /// Server URLs, e.g. `turn:turn.example.com:3478?transport=udp`
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl RelayServer {
    /// Create a relay entry with a single URL
    pub fn new(url: impl Into<String>, username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_follow_time_request() {
        let config = NegotiationConfig::new("https://example/whep");
        assert_eq!(config.poll_interval(), Duration::from_millis(3000));
        assert_eq!(config.ice_gather_timeout(), Duration::from_millis(3000));
        assert!(config.relay_only);
        assert!(config.teardown_on_close);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = NegotiationConfig::new("not a url");
        assert!(matches!(config.validate(), Err(WhepError::InvalidConfig(_))));

        let config = NegotiationConfig::new("ftp://example/whep");
        assert!(matches!(config.validate(), Err(WhepError::InvalidConfig(_))));

        let mut config = NegotiationConfig::new("https://example/whep");
        config.ice_gather_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(WhepError::InvalidConfig(_))));

        let mut config = NegotiationConfig::new("https://example/whep");
        config.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(WhepError::InvalidConfig(_))));

        let mut config = NegotiationConfig::new("https://example/whep");
        config.relay_servers.push(RelayServer {
            urls: vec![],
            username: String::new(),
            credential: String::new(),
        });
        assert!(matches!(config.validate(), Err(WhepError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("whep.json");
        std::fs::write(
            &path,
            r#"{
                "endpoint_url": "https://example/whep",
                "poll_interval_ms": 1000,
                "relay_servers": [
                    { "urls": ["turn:turn.example:3478"], "username": "u", "credential": "c" }
                ]
            }"#,
        )
        .unwrap();

        let config = NegotiationConfig::load(&path).unwrap();
        assert_eq!(config.endpoint_url, "https://example/whep");
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.ice_gather_timeout_ms, DEFAULT_TIME_REQUEST_MS);
        assert_eq!(
            config.relay_servers,
            vec![RelayServer::new("turn:turn.example:3478", "u", "c")]
        );
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = tokio_test::assert_err!(NegotiationConfig::load(&dir.path().join("absent.json")));
        assert!(matches!(err, WhepError::Io(_)));
    }
}
