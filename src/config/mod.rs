use crate::error::{ClientError, Result};
use config::{Config, Environment, File, FileFormat};
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Directory name used under the platform config and data roots
pub const APP_NAME: &str = "beeper-cli";

/// Where Beeper Desktop serves its local API
pub const DEFAULT_BASE_URL: &str = "http://localhost:23373";

/// Per-attempt request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Prefix for environment overrides (`BEEPER_TOKEN`, `BEEPER_BASE_URL`, ...)
pub const ENV_PREFIX: &str = "BEEPER";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Settings consumed by the transport. Immutable once the transport is built.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the local API
    pub base_url: String,
    /// Bearer token sent on every request
    pub token: SecretString,
    /// Per-attempt request timeout in seconds
    pub timeout_secs: u64,
    /// Write request/response trace lines to stderr
    pub debug: bool,
}

/// On-disk / environment shape before the token is wrapped
#[derive(Debug, Deserialize)]
struct RawConfig {
    base_url: String,
    #[serde(default)]
    token: Option<String>,
    timeout_secs: u64,
    debug: bool,
}

impl ClientConfig {
    /// Configuration with default base URL, timeout and debug off
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: Secret::new(token.into()),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            debug: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load from `file` (or `<config dir>/config.toml`) and `BEEPER_*` variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let path = match file {
            Some(path) => path.to_path_buf(),
            None => config_dir()?.join(CONFIG_FILE_NAME),
        };
        Self::load_from_sources(Some(&path), Environment::with_prefix(ENV_PREFIX))
    }

    /// Layer defaults, an optional TOML file and an environment source
    pub fn load_from_sources(file: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("timeout_secs", DEFAULT_TIMEOUT_SECS as i64)?
            .set_default("debug", false)?;

        if let Some(path) = file {
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let raw: RawConfig = builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(Self {
            base_url: raw.base_url,
            token: Secret::new(raw.token.unwrap_or_default()),
            timeout_secs: raw.timeout_secs,
            debug: raw.debug,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(ClientError::Config("Base URL cannot be empty".to_string()));
        }

        let url = url::Url::parse(&self.base_url).map_err(|e| {
            ClientError::Config(format!("Invalid base URL '{}': {}", self.base_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::Config(format!(
                "Base URL must start with http:// or https://: {}",
                self.base_url
            )));
        }

        if self.timeout_secs == 0 {
            return Err(ClientError::Config(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.token.expose_secret().trim().is_empty() {
            return Err(ClientError::Config(format!(
                "No API token configured. Set {}_TOKEN or add `token` to {}",
                ENV_PREFIX, CONFIG_FILE_NAME
            )));
        }

        Ok(())
    }
}

/// Config directory: `$XDG_CONFIG_HOME/beeper-cli`, or the platform default
pub fn config_dir() -> Result<PathBuf> {
    resolve_dir(
        std::env::var_os("XDG_CONFIG_HOME"),
        dirs::home_dir(),
        cfg!(target_os = "macos"),
        &[".config"],
    )
}

/// Data directory: `$XDG_DATA_HOME/beeper-cli`, or the platform default
pub fn data_dir() -> Result<PathBuf> {
    resolve_dir(
        std::env::var_os("XDG_DATA_HOME"),
        dirs::home_dir(),
        cfg!(target_os = "macos"),
        &[".local", "share"],
    )
}

fn resolve_dir(
    xdg: Option<OsString>,
    home: Option<PathBuf>,
    macos: bool,
    unix_root: &[&str],
) -> Result<PathBuf> {
    if let Some(dir) = xdg.filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    let mut path = home.ok_or_else(|| {
        ClientError::Config("Could not determine home directory".to_string())
    })?;
    if macos {
        path.push("Library");
        path.push("Application Support");
    } else {
        path.extend(unix_root);
    }
    path.push(APP_NAME);
    Ok(path)
}
