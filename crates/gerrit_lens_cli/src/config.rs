//! Configuration file support for gerrit-lens.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `GERRIT_LENS_`, nested keys
//!    separated by `__`, e.g. `GERRIT_LENS_GERRIT__URL`)
//! 3. Local config file (`./gerrit-lens.toml`)
//! 4. XDG config file (`~/.config/gerrit-lens/config.toml`)
//! 5. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [gerrit]
//! url = "https://review.example.com"
//! username = "jane"
//! password = "..."  # or GERRIT_LENS_GERRIT__PASSWORD
//! read_only = false
//! request_timeout_secs = 30
//!
//! [gerrit.stream_events]
//! enabled = true
//! ssh_port = 29418
//!
//! [checkout]
//! state_file = "/home/jane/.local/state/gerrit-lens/state.json"
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use gerrit_lens::GerritConfig;
use serde::Deserialize;

const APP_NAME: &str = "gerrit-lens";
const LOCAL_CONFIG: &str = "gerrit-lens.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gerrit connection settings.
    pub gerrit: GerritConfig,
    /// Quick checkout settings.
    pub checkout: CheckoutConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    /// Where quick checkout entries are persisted. Defaults to the XDG
    /// state directory.
    pub state_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from files and the environment. Unreadable sources
    /// are logged and fall back to defaults.
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            let xdg_config = proj_dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                tracing::debug!(path = %xdg_config.display(), "loading config");
                builder = builder.add_source(
                    File::from(xdg_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            tracing::debug!(path = LOCAL_CONFIG, "loading config");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("GERRIT_LENS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, url: Option<String>, read_only: bool) {
        if let Some(url) = url {
            self.gerrit.url = Some(url);
        }
        if read_only {
            self.gerrit.read_only = true;
        }
    }

    /// Quick checkout state file, falling back to the state directory.
    pub fn state_file(&self) -> Option<PathBuf> {
        self.checkout
            .state_file
            .clone()
            .or_else(|| Self::default_state_dir().map(|dir| dir.join("state.json")))
    }

    fn default_state_dir() -> Option<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", APP_NAME)?;
        Some(
            proj_dirs
                .state_dir()
                .unwrap_or_else(|| proj_dirs.data_local_dir())
                .to_path_buf(),
        )
    }
}
