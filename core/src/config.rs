/*
    statify-rs | Rust CLI to explore your Spotify listening statistics.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.spotify.com";
pub const DEFAULT_API_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

/// Scopes needed to read profile, top items, history and playback state.
pub const DEFAULT_SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-email",
    "user-top-read",
    "user-read-recently-played",
    "user-read-playback-state",
    "user-read-currently-playing",
    "playlist-read-private",
    "playlist-read-collaborative",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Cannot determine a data directory; set STATIFY_DATA_DIR")]
    NoDataDir,
}

/// Client registration and endpoint locations for the Spotify accounts and Web APIs.
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub accounts_url: String,
    pub api_url: String,
}

impl SpotifyConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// `SPOTIFY_CLIENT_ID` and `SPOTIFY_CLIENT_SECRET` are required. `SPOTIFY_REDIRECT_URI`,
    /// `SPOTIFY_SCOPES` (space separated), `SPOTIFY_ACCOUNTS_URL` and `SPOTIFY_API_URL`
    /// override the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = non_empty("SPOTIFY_CLIENT_ID").ok_or(ConfigError::Missing("SPOTIFY_CLIENT_ID"))?;
        let client_secret =
            non_empty("SPOTIFY_CLIENT_SECRET").ok_or(ConfigError::Missing("SPOTIFY_CLIENT_SECRET"))?;

        let mut config = Self::new(client_id, client_secret);

        if let Some(uri) = non_empty("SPOTIFY_REDIRECT_URI") {
            config.redirect_uri = uri;
        }
        if let Some(scopes) = non_empty("SPOTIFY_SCOPES") {
            config.scopes = scopes.split_whitespace().map(str::to_string).collect();
        }
        if let Some(url) = non_empty("SPOTIFY_ACCOUNTS_URL") {
            config.accounts_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = non_empty("SPOTIFY_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }

    pub fn with_endpoints(mut self, accounts_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.accounts_url = accounts_url.into();
        self.api_url = api_url.into();
        self
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.accounts_url)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/api/token", self.accounts_url)
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Directory holding persistent storage, `STATIFY_DATA_DIR` or `<config dir>/statify`.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = env::var_os("STATIFY_DATA_DIR").filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|dir| dir.join("statify"))
        .ok_or(ConfigError::NoDataDir)
}
