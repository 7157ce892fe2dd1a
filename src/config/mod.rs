//! Configuration management for the whereis gateway

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::security::session::{DEFAULT_COOKIE_NAME, DEFAULT_SESSION_TTL_SECS};
use file::WhereisConfigFile;

/// Default API port
pub const DEFAULT_PORT: u16 = 8080;

/// Default identity assertion verifier
pub const DEFAULT_VERIFIER_URL: &str = "https://verifier.login.persona.org/verify";

/// Default push request timeout in seconds
pub const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

/// Default SMS endpoint quota (requests per minute)
pub const DEFAULT_SMS_RATE_LIMIT: u32 = 30;

/// Gateway configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP listener configuration
    pub server: ServerConfig,

    /// Path to data directory (database, commands file)
    pub data_dir: PathBuf,

    /// Device registry database
    pub db_path: PathBuf,

    /// Command catalog JSON file
    pub commands_file: PathBuf,

    /// Login and session configuration
    pub session: SessionConfig,

    /// Push and pending invocation configuration
    pub dispatch: DispatchConfig,

    /// Inbound SMS configuration
    pub sms: SmsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

/// Session configuration
#[derive(Debug)]
pub struct SessionConfig {
    /// Cookie signing secret (from `WHEREIS_SESSION_SECRET`).
    /// When absent a random per-process secret is used.
    pub secret: Option<SecretString>,

    /// Session cookie name
    pub cookie_name: String,

    /// Session lifetime in seconds
    pub ttl_secs: u64,

    /// Mark the session cookie `Secure`
    pub secure_cookie: bool,

    /// Identity assertion verifier endpoint
    pub verifier_url: String,

    /// Audience presented to the verifier; derived from the listener when unset
    pub audience: Option<String>,
}

/// Dispatch configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Timeout for one push request in seconds
    pub push_timeout_secs: u64,

    /// Expire unretrieved invocations after this many seconds; never if `None`
    pub invocation_ttl_secs: Option<u64>,
}

/// SMS configuration
#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Accept commands on `/command/sms`
    pub enabled: bool,

    /// Global requests per minute on the SMS endpoint
    pub rate_limit: u32,
}

impl Config {
    /// Load configuration from the environment and the TOML config file
    ///
    /// Priority is env > toml > default. Creates the data directory.
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        let config = Self::from_sources(&fc, |key| std::env::var(key).ok());

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        config
    }

    /// Audience presented to the identity verifier
    ///
    /// The configured value, otherwise the address the server listens on.
    /// Derived on demand so CLI host/port overrides are reflected.
    #[must_use]
    pub fn audience(&self) -> String {
        self.session.audience.clone().unwrap_or_else(|| {
            format!("http://{}:{}", self.server.host, self.server.port)
        })
    }

    /// Merge an environment lookup over a parsed config file
    #[must_use]
    pub fn from_sources(fc: &WhereisConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let server = ServerConfig {
            host: env("WHEREIS_HOST")
                .or_else(|| fc.server.host.clone())
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env("WHEREIS_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        // Data directory (~/.local/share/whereis on Linux)
        let data_dir = env("WHEREIS_DATA_DIR")
            .or_else(|| fc.server.data_dir.clone())
            .map_or_else(
                || {
                    directories::BaseDirs::new()
                        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("whereis"))
                },
                PathBuf::from,
            );

        let db_path = env("WHEREIS_DB")
            .or_else(|| fc.server.db.clone())
            .map_or_else(|| data_dir.join("whereis.db"), PathBuf::from);

        let commands_file = env("WHEREIS_COMMANDS_FILE")
            .or_else(|| fc.server.commands_file.clone())
            .map_or_else(|| data_dir.join("commands.json"), PathBuf::from);

        let session = SessionConfig {
            secret: env("WHEREIS_SESSION_SECRET")
                .or_else(|| fc.session.secret.clone())
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            cookie_name: fc
                .session
                .cookie_name
                .clone()
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            ttl_secs: fc.session.ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS),
            secure_cookie: env("WHEREIS_SECURE_COOKIE")
                .map(|v| v == "true" || v == "1")
                .or(fc.session.secure_cookie)
                .unwrap_or(false),
            verifier_url: env("WHEREIS_VERIFIER_URL")
                .or_else(|| fc.session.verifier_url.clone())
                .unwrap_or_else(|| DEFAULT_VERIFIER_URL.to_string()),
            audience: env("WHEREIS_AUDIENCE")
                .or_else(|| fc.session.audience.clone())
                .filter(|s| !s.is_empty()),
        };

        let dispatch = DispatchConfig {
            push_timeout_secs: env("WHEREIS_PUSH_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.dispatch.push_timeout_secs)
                .unwrap_or(DEFAULT_PUSH_TIMEOUT_SECS),
            invocation_ttl_secs: env("WHEREIS_INVOCATION_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.dispatch.invocation_ttl_secs)
                .filter(|&secs| secs > 0),
        };

        let sms = SmsConfig {
            enabled: fc.sms.enabled.unwrap_or(true),
            rate_limit: env("WHEREIS_SMS_RATE_LIMIT")
                .and_then(|s| s.parse().ok())
                .or(fc.sms.rate_limit)
                .unwrap_or(DEFAULT_SMS_RATE_LIMIT),
        };

        Self {
            server,
            data_dir,
            db_path,
            commands_file,
            session,
            dispatch,
            sms,
        }
    }
}
