//! TOML configuration file loading
//!
//! Supports `~/.config/whereis/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct WhereisConfigFile {
    /// Listener and storage locations
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Login and session cookie settings
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Push delivery and pending invocation settings
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// Inbound SMS endpoint settings
    #[serde(default)]
    pub sms: SmsFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Address to bind
    pub host: Option<String>,

    /// Port to listen on
    pub port: Option<u16>,

    /// Data directory (database, commands file)
    pub data_dir: Option<String>,

    /// Database file, defaults to `<data_dir>/whereis.db`
    pub db: Option<String>,

    /// Command catalog file, defaults to `<data_dir>/commands.json`
    pub commands_file: Option<String>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Cookie signing secret
    pub secret: Option<String>,

    /// Session cookie name
    pub cookie_name: Option<String>,

    /// Session lifetime in seconds
    pub ttl_secs: Option<u64>,

    /// Mark the cookie `Secure`
    pub secure_cookie: Option<bool>,

    /// Identity assertion verifier endpoint
    pub verifier_url: Option<String>,

    /// Audience presented to the verifier
    pub audience: Option<String>,
}

/// Dispatch configuration
#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    /// Timeout for one push request
    pub push_timeout_secs: Option<u64>,

    /// Drop unretrieved invocations after this many seconds
    pub invocation_ttl_secs: Option<u64>,
}

/// SMS configuration
#[derive(Debug, Default, Deserialize)]
pub struct SmsFileConfig {
    /// Accept commands on `/command/sms`
    pub enabled: Option<bool>,

    /// Global requests per minute on the SMS endpoint
    pub rate_limit: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `WhereisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> WhereisConfigFile {
    let Some(path) = config_file_path() else {
        return WhereisConfigFile::default();
    };

    if !path.exists() {
        return WhereisConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                WhereisConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            WhereisConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/whereis/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("whereis").join("config.toml"))
}
