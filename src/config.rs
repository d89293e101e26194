// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TERMS_VERSION: &str = "1.0";
const DEFAULT_SESSION_FILE: &str = ".chat-auth/session.json";
const DEFAULT_CALLBACK_PORT: u16 = 54321;
const DEFAULT_SETTLE_MS: u64 = 1000;
const DEFAULT_ERROR_REDIRECT_MS: u64 = 3000;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend (auth lives under `/auth/v1`, rows under `/rest/v1`)
    pub backend_url: String,
    /// Public anon key sent as `apikey` on every backend request
    pub backend_anon_key: String,
    /// Terms version every identity must have accepted
    pub terms_version: String,
    /// Where the identity provider client persists the session
    pub session_file: PathBuf,
    /// Loopback port for the callback listener
    pub callback_port: u16,
    /// Redirect target handed to the backend for OAuth and magic links
    pub redirect_url: String,
    /// Pause after a successful callback before navigating to landing
    pub callback_settle_delay: Duration,
    /// Pause after a failed callback before navigating to login
    pub callback_error_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let callback_port = parse_or("CALLBACK_PORT", DEFAULT_CALLBACK_PORT)?;

        Ok(Self {
            backend_url: env::var("BACKEND_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("BACKEND_URL"))?,
            backend_anon_key: env::var("BACKEND_ANON_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("BACKEND_ANON_KEY"))?,
            terms_version: env::var("TERMS_VERSION")
                .unwrap_or_else(|_| DEFAULT_TERMS_VERSION.to_string()),
            session_file: env::var("SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SESSION_FILE)),
            callback_port,
            redirect_url: env::var("OAUTH_REDIRECT_URL").unwrap_or_else(|_| {
                format!("http://127.0.0.1:{}/auth/callback", callback_port)
            }),
            callback_settle_delay: Duration::from_millis(parse_or(
                "CALLBACK_SETTLE_MS",
                DEFAULT_SETTLE_MS,
            )?),
            callback_error_delay: Duration::from_millis(parse_or(
                "CALLBACK_ERROR_REDIRECT_MS",
                DEFAULT_ERROR_REDIRECT_MS,
            )?),
        })
    }

    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:9".to_string(),
            backend_anon_key: "test_anon_key".to_string(),
            terms_version: DEFAULT_TERMS_VERSION.to_string(),
            session_file: PathBuf::from("target/test-session.json"),
            callback_port: DEFAULT_CALLBACK_PORT,
            redirect_url: format!("http://127.0.0.1:{}/auth/callback", DEFAULT_CALLBACK_PORT),
            callback_settle_delay: Duration::from_millis(DEFAULT_SETTLE_MS),
            callback_error_delay: Duration::from_millis(DEFAULT_ERROR_REDIRECT_MS),
        }
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
