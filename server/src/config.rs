//! Server configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_PUBLIC_DIR: &str = "public";
pub const AVAILABILITY_FILE: &str = "availability.csv";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory served as static files (layout CSV, floor and view images).
    pub public_dir: PathBuf,
    /// CSV rewritten by `POST /api/update-availability`.
    pub availability_csv: PathBuf,
}

impl ServerConfig {
    /// Build typed server config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3001
    /// - `PUBLIC_DIR`: default `public`
    /// - `AVAILABILITY_CSV`: default `<PUBLIC_DIR>/availability.csv`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { var: "PORT", value: raw })?,
            None => DEFAULT_PORT,
        };

        let public_dir = lookup("PUBLIC_DIR").map_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR), PathBuf::from);
        let availability_csv = lookup("AVAILABILITY_CSV")
            .map_or_else(|| public_dir.join(AVAILABILITY_FILE), PathBuf::from);

        Ok(Self { port, public_dir, availability_csv })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
