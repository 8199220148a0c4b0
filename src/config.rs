//! Configuration file parser for ~/.config/deckfeed/config.toml.
//!
//! The config file is optional. A missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use crate::feed::{FeedOptions, DEFAULT_PAGE_SIZE};
use crate::reaction::{ReactionGate, ReactionKind};
use crate::remote::HttpOptions;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the API token. Takes precedence over the
/// config file.
pub const API_TOKEN_ENV: &str = "DECKFEED_API_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The Debug impl masks `api_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the platform's JSON API.
    pub base_url: String,

    /// Entries per feed page.
    pub page_size: u32,

    /// Minutes a cached page stays fresh.
    pub cache_ttl_minutes: u64,

    /// Delay between a confirmed reaction and the count read.
    pub reconcile_delay_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Bearer token (alternative to the DECKFEED_API_TOKEN env var).
    pub api_token: Option<String>,

    pub reactions: ReactionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactionsConfig {
    /// Kinds a signed-out user may attempt.
    pub guest_kinds: Vec<ReactionKind>,
}

impl Default for ReactionsConfig {
    fn default() -> Self {
        Self {
            guest_kinds: vec![ReactionKind::Like],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            cache_ttl_minutes: 30,
            reconcile_delay_ms: 100,
            request_timeout_secs: 30,
            api_token: None,
            reactions: ReactionsConfig::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .field("cache_ttl_minutes", &self.cache_ttl_minutes)
            .field("reconcile_delay_ms", &self.reconcile_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("reactions", &self.reactions)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "base_url",
        "page_size",
        "cache_ttl_minutes",
        "reconcile_delay_ms",
        "request_timeout_secs",
        "api_token",
        "reactions",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            base_url = %config.base_url,
            page_size = config.page_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML content.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
            if let Some(toml::Value::Table(reactions)) = raw.get("reactions") {
                for key in reactions.keys().filter(|k| k.as_str() != "guest_kinds") {
                    tracing::warn!(key = %format!("reactions.{key}"), "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.cache_ttl_minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "cache_ttl_minutes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            page_size: self.page_size,
            ttl: Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60)),
        }
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    pub fn reaction_gate(&self) -> ReactionGate {
        ReactionGate::new(self.reactions.guest_kinds.iter().copied())
    }

    /// HTTP options, with the token read from [`API_TOKEN_ENV`] first.
    pub fn http_options(&self) -> HttpOptions {
        self.http_options_with(std::env::var(API_TOKEN_ENV).ok())
    }

    fn http_options_with(&self, env_token: Option<String>) -> HttpOptions {
        let api_token = env_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.api_token.clone())
            .map(SecretString::from);
        HttpOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
            api_token,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.cache_ttl_minutes, 30);
        assert_eq!(config.reconcile_delay_ms, 100);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.api_token.is_none());
        assert_eq!(config.reactions.guest_kinds, vec![ReactionKind::Like]);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/deckfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("deckfeed_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  \n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080/");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
base_url = "https://decks.example.com/"
page_size = 20
cache_ttl_minutes = 5
reconcile_delay_ms = 250
request_timeout_secs = 10
api_token = "test-token-123"

[reactions]
guest_kinds = []
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.base_url, "https://decks.example.com/");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.feed_options().ttl, Duration::from_secs(300));
        assert_eq!(config.reconcile_delay(), Duration::from_millis(250));
        assert_eq!(config.api_token.as_deref(), Some("test-token-123"));
        assert!(!config.reaction_gate().can_attempt(ReactionKind::Like, false));
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::parse("page_size = 10\n").unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.cache_ttl_minutes, 30);
        assert!(config.reaction_gate().can_attempt(ReactionKind::Like, false));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_reaction_kind_rejected() {
        let err = Config::parse("[reactions]\nguest_kinds = [\"upvote\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
page_size = 25
totally_fake_key = "should not fail"

[reactions]
also_fake = 1
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.page_size, 25);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let err = Config::parse("page_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "page_size", .. }));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = Config::parse("cache_ttl_minutes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "cache_ttl_minutes", .. }));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("deckfeed_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_token_wins_over_file() {
        let config = Config {
            api_token: Some("from-file".to_string()),
            ..Config::default()
        };

        let options = config.http_options_with(Some("from-env".to_string()));
        assert_eq!(options.api_token.unwrap().expose_secret(), "from-env");

        let options = config.http_options_with(Some("  ".to_string()));
        assert_eq!(options.api_token.unwrap().expose_secret(), "from-file");

        let options = Config::default().http_options_with(None);
        assert!(options.api_token.is_none());
    }

    #[test]
    fn test_debug_masks_api_token() {
        let config = Config {
            api_token: Some("super-secret-token-12345".to_string()),
            ..Config::default()
        };

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
