//! Connection settings for a Gerrit server.
//!
//! The library only validates settings; loading them from files or the
//! environment is the front end's job.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::host::{MessageLevel, Notifier, SecretStore, password_secret_key};

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default Gerrit SSH port.
pub const DEFAULT_SSH_PORT: u16 = 29418;

/// Missing or invalid connection settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Gerrit URL is not configured")]
    MissingUrl,

    #[error("Gerrit username is not configured")]
    MissingUsername,

    #[error("Gerrit password is not configured")]
    MissingPassword,

    #[error("Invalid Gerrit URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Stream-events settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamEventsConfig {
    /// Whether to listen for server events at all.
    pub enabled: bool,
    /// SSH host; defaults to the host of the Gerrit URL.
    pub ssh_host: Option<String>,
    /// SSH port.
    pub ssh_port: u16,
    /// SSH user; defaults to the Gerrit username.
    pub ssh_user: Option<String>,
}

impl Default for StreamEventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ssh_host: None,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: None,
        }
    }
}

/// Gerrit connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GerritConfig {
    /// Base URL of the Gerrit server, e.g. `https://review.example.com`.
    pub url: Option<String>,
    pub username: Option<String>,
    /// HTTP password; may instead come from the secret store.
    pub password: Option<String>,
    /// Skip TLS certificate verification.
    pub allow_invalid_ssl: bool,
    /// Refuse every mutating request.
    pub read_only: bool,
    pub request_timeout_secs: u64,
    /// Refetch entries whose last fetch returned nothing after this many
    /// seconds. `None` keeps empty results until invalidated.
    pub refetch_interval_secs: Option<u64>,
    pub stream_events: StreamEventsConfig,
}

impl Default for GerritConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            allow_invalid_ssl: false,
            read_only: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refetch_interval_secs: None,
            stream_events: StreamEventsConfig::default(),
        }
    }
}

/// Validated credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub url: Url,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl GerritConfig {
    /// Fill a missing password from the secret store.
    #[must_use]
    pub fn with_secret(mut self, secrets: &dyn SecretStore) -> Self {
        if non_empty(&self.password).is_none()
            && let Some(url) = non_empty(&self.url)
        {
            self.password = secrets.get(&password_secret_key(url));
        }
        self
    }

    /// Validate the settings needed to talk to the server.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let raw_url = non_empty(&self.url).ok_or(ConfigError::MissingUrl)?;
        let username = non_empty(&self.username).ok_or(ConfigError::MissingUsername)?;
        let password = non_empty(&self.password).ok_or(ConfigError::MissingPassword)?;

        let mut url = Url::parse(raw_url).map_err(|e| ConfigError::InvalidUrl {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: raw_url.to_string(),
                reason: "expected an http(s) URL".to_string(),
            });
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Credentials {
            url,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    #[must_use]
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }

    #[must_use]
    pub fn refetch_interval(&self) -> Option<std::time::Duration> {
        self.refetch_interval_secs
            .map(std::time::Duration::from_secs)
    }
}

/// Reports configuration errors once per distinct configuration.
///
/// Repeated attempts with the same bad settings stay quiet; any edit to the
/// settings re-arms the report.
#[derive(Debug, Default)]
pub struct ConfigNag {
    last_attempted: Mutex<Option<GerritConfig>>,
}

impl ConfigNag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `config`, notifying on the first failure for this exact
    /// configuration.
    pub fn check(
        &self,
        config: &GerritConfig,
        notifier: &dyn Notifier,
    ) -> Result<Credentials, ConfigError> {
        let result = config.credentials();
        let mut last = self
            .last_attempted
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match &result {
            Ok(_) => *last = None,
            Err(err) => {
                if last.as_ref() != Some(config) {
                    tracing::warn!(error = %err, "Gerrit configuration is incomplete");
                    notifier.notify(
                        MessageLevel::Error,
                        &format!("Gerrit is not configured: {err}"),
                        &["Open settings"],
                    );
                    *last = Some(config.clone());
                }
            }
        }
        result
    }
}
