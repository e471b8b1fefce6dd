//! Run configuration.
//!
//! Configuration is assembled once at process start from layers, lowest
//! precedence first: built-in defaults, an optional YAML file, the
//! environment, then command-line flags. Each layer is a [`ConfigLayer`];
//! [`ConfigLayer::merge`] stacks them and [`ConfigLayer::run_config`] /
//! [`ConfigLayer::api_config`] validate the result. Reconciliation code only
//! ever sees the resulting immutable [`RunConfig`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{config_io_err, ConfigError};

pub const DEFAULT_BASE_URL: &str = "https://api.pipedrive.com/v1";
pub const DEFAULT_ALL_ORGS_FIELD: &str = "All LIGR Organizations";
pub const DEFAULT_ORPHAN_TAG: &str = "not in db";
pub const TOKEN_ENV_VAR: &str = "PIPEDRIVE_API_TOKEN";

/// 100 requests per 10 seconds allows one per 100 ms; 120 ms leaves headroom.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(120);
pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// CRM API credential. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(****)")
    }
}

/// Bounded retry-with-backoff policy for CRM calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Everything needed to talk to the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub api_token: ApiToken,
    pub base_url: String,
    /// Minimum spacing between any two requests.
    pub request_delay: Duration,
    pub retry: RetrySettings,
    pub page_size: u32,
    pub http_timeout: Duration,
}

/// Complete configuration of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub api: ApiConfig,
    pub source_path: PathBuf,
    pub out_dir: PathBuf,
    /// When set, no mutating call is dispatched.
    pub dry_run: bool,
    /// Display name of the person field holding all source organizations.
    pub all_orgs_field: String,
    /// Tag applied to CRM persons missing from the source.
    pub orphan_tag: String,
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// One partial source of configuration. Every field is optional; `merge`
/// lets a higher-precedence layer override individual fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub api_token: Option<String>,
    pub base_url: Option<String>,
    pub source: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub dry_run: Option<bool>,
    pub request_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub page_size: Option<u32>,
    pub http_timeout_secs: Option<u64>,
    pub all_orgs_field: Option<String>,
    pub orphan_tag: Option<String>,
}

impl ConfigLayer {
    /// Parse a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| config_io_err(path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Layer holding the API token from [`TOKEN_ENV_VAR`], if set.
    pub fn from_env() -> Self {
        Self {
            api_token: std::env::var(TOKEN_ENV_VAR)
                .ok()
                .filter(|t| !t.trim().is_empty()),
            ..Self::default()
        }
    }

    /// Stack `higher` on top of `self`; fields set in `higher` win.
    pub fn merge(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            api_token: higher.api_token.or(self.api_token),
            base_url: higher.base_url.or(self.base_url),
            source: higher.source.or(self.source),
            out_dir: higher.out_dir.or(self.out_dir),
            dry_run: higher.dry_run.or(self.dry_run),
            request_delay_ms: higher.request_delay_ms.or(self.request_delay_ms),
            max_retries: higher.max_retries.or(self.max_retries),
            retry_base_delay_ms: higher.retry_base_delay_ms.or(self.retry_base_delay_ms),
            retry_max_delay_ms: higher.retry_max_delay_ms.or(self.retry_max_delay_ms),
            page_size: higher.page_size.or(self.page_size),
            http_timeout_secs: higher.http_timeout_secs.or(self.http_timeout_secs),
            all_orgs_field: higher.all_orgs_field.or(self.all_orgs_field),
            orphan_tag: higher.orphan_tag.or(self.orphan_tag),
        }
    }

    /// Resolve the API settings, filling defaults.
    pub fn api_config(&self) -> Result<ApiConfig, ConfigError> {
        let api_token = self
            .api_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            base_delay: self
                .retry_base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            max_delay: self
                .retry_max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
        };
        if retry.base_delay > retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".into()));
        }

        Ok(ApiConfig {
            api_token: ApiToken::new(api_token),
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            request_delay: self
                .request_delay_ms
                .map_or(DEFAULT_REQUEST_DELAY, Duration::from_millis),
            retry,
            page_size,
            http_timeout: self
                .http_timeout_secs
                .map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_secs),
        })
    }

    /// Resolve a full run configuration, filling defaults.
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let api = self.api_config()?;
        let source_path = self.source.clone().ok_or(ConfigError::MissingSource)?;
        Ok(RunConfig {
            api,
            source_path,
            out_dir: self.out_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            dry_run: self.dry_run.unwrap_or(false),
            all_orgs_field: self
                .all_orgs_field
                .clone()
                .unwrap_or_else(|| DEFAULT_ALL_ORGS_FIELD.to_string()),
            orphan_tag: self
                .orphan_tag
                .clone()
                .unwrap_or_else(|| DEFAULT_ORPHAN_TAG.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn with_token() -> ConfigLayer {
        ConfigLayer {
            api_token: Some("secret".into()),
            source: Some(PathBuf::from("export.csv")),
            ..ConfigLayer::default()
        }
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let cfg = with_token().run_config().expect("config");
        assert_eq!(cfg.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.api.request_delay, DEFAULT_REQUEST_DELAY);
        assert_eq!(cfg.api.retry, RetrySettings::default());
        assert_eq!(cfg.all_orgs_field, "All LIGR Organizations");
        assert_eq!(cfg.orphan_tag, "not in db");
        assert!(!cfg.dry_run);
    }

    #[test]
    fn higher_layer_wins_per_field() {
        let file = ConfigLayer {
            dry_run: Some(false),
            orphan_tag: Some("orphan".into()),
            ..with_token()
        };
        let flags = ConfigLayer {
            dry_run: Some(true),
            ..ConfigLayer::default()
        };
        let cfg = file.merge(flags).run_config().expect("config");
        assert!(cfg.dry_run);
        assert_eq!(cfg.orphan_tag, "orphan");
    }

    #[test]
    fn missing_token_is_rejected() {
        let layer = ConfigLayer {
            api_token: Some("  ".into()),
            ..ConfigLayer::default()
        };
        assert!(matches!(layer.api_config(), Err(ConfigError::MissingToken)));
    }

    #[test]
    fn missing_source_is_rejected_for_runs_only() {
        let layer = ConfigLayer {
            api_token: Some("secret".into()),
            ..ConfigLayer::default()
        };
        assert!(layer.api_config().is_ok());
        assert!(matches!(layer.run_config(), Err(ConfigError::MissingSource)));
    }

    #[test]
    fn token_is_redacted_in_debug_output() {
        let cfg = with_token().run_config().expect("config");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("****"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let layer = ConfigLayer {
            base_url: Some("http://localhost:8080/v1/".into()),
            ..with_token()
        };
        assert_eq!(layer.api_config().unwrap().base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn zero_page_size_is_invalid() {
        let layer = ConfigLayer {
            page_size: Some(0),
            ..with_token()
        };
        assert!(matches!(layer.api_config(), Err(ConfigError::Invalid(_))));
    }
}
