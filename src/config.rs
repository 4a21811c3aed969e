//! Application configuration loaded from environment variables.
//!
//! APNs signing material is optional as a group: without it the server
//! still accepts registrations, but push sending is disabled.

use std::env;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Redis connection URL (backing store)
    pub redis_url: String,
    /// Cadence of the silent widget-refresh fan-out, in seconds
    pub widget_refresh_seconds: u64,
    /// APNs JWT signing material; None disables push sending
    pub apns: Option<ApnsConfig>,
}

/// APNs JWT signing material (key id, team id, PEM private key).
#[derive(Debug, Clone)]
pub struct ApnsConfig {
    /// ES256 private key in PEM form
    pub key_pem: String,
    /// APNs key identifier (`kid` header)
    pub key_id: String,
    /// Apple developer team identifier (`iss` claim)
    pub team_id: String,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            widget_refresh_seconds: 900,
            apns: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let apns = match (
            env::var("PUSH_NOTIFICATION_PEM"),
            env::var("PUSH_NOTIFICATION_ID"),
            env::var("TEAM_IDENTIFIER"),
        ) {
            (Ok(key_pem), Ok(key_id), Ok(team_id)) => Some(ApnsConfig {
                key_pem,
                key_id: key_id.trim().to_string(),
                team_id: team_id.trim().to_string(),
            }),
            _ => None,
        };

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            widget_refresh_seconds: env::var("WIDGET_REFRESH_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.clamp(300, 86_400))
                .unwrap_or(900),
            apns,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
