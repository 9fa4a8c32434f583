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

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod format;
pub mod models;
pub mod session;
pub mod stats;
pub mod storage;

#[cfg(test)]
mod testing;

// Re-export key items for convenience
pub use auth::{AccountsClient, AuthError, CallbackParams, OAuthProvider};
pub use cache::{QueryCache, QueryError, QueryKey};
pub use client::{ApiError, SpotifyClient};
pub use config::{ConfigError, SpotifyConfig};
pub use models::{AuthTokens, TimeRange};
pub use session::{AuthStatus, Session, SessionError, SessionState};
pub use stats::{FeatureProfile, GenreShare, Insights, Overview};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError, TokenStore};
