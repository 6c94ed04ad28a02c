//! Configuration file
//!
//! ```toml
//! [placer]
//! canvas_count = 3
//! credentials_path = "users.txt"
//! targets_dir = "targets"
//!
//! [placer.intervals]
//! dispatch_secs = 8
//!
//! [endpoints]
//! gql_url = "https://gql-realtime-2.reddit.com/query"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! Every key is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_client::EndpointConfig;
use tessera_core::{Credentials, PlacerConfig};

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) placer: PlacerConfig,
    pub(crate) endpoints: EndpointConfig,
    pub(crate) logging: LoggingConfig,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub(crate) level: String,
    /// Emit JSON lines instead of human-readable output
    pub(crate) json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Load from `path`, or use defaults when no path is given
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        self.placer.validate().context("invalid [placer] section")
    }

    /// Read and parse the credentials file named by the config
    pub(crate) fn credentials(&self) -> Result<Vec<Credentials>> {
        let path = &self.placer.credentials_path;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read credentials file {}", path.display()))?;
        Credentials::parse_list(&text)
            .with_context(|| format!("failed to parse credentials file {}", path.display()))
    }
}
