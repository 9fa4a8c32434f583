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

use crate::auth::{AuthError, OAuthProvider};
use crate::models::{
    Artist, AudioFeatures, AudioFeaturesResponse, CurrentlyPlaying, Paging, RecentlyPlayed,
    TimeRange, Track, User,
};
use crate::storage::{StorageError, TokenStore};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Largest `limit` the `/me/top` and history endpoints accept.
pub const MAX_LIMIT: u32 = 50;
/// Largest number of ids `/audio-features` accepts per request.
pub const AUDIO_FEATURES_BATCH: usize = 100;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Spotify API Error: {status} - {message}")]
    Status { status: u16, message: String },
    #[error("No access token available")]
    NoAccessToken,
    #[error("Token refresh failed: {0}")]
    Refresh(#[source] AuthError),
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid Track ID: {0}")]
    InvalidTrackId(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Errors after which the stored session can no longer be used.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::NoAccessToken | ApiError::Refresh(_) | ApiError::Storage(StorageError::Corrupt(_))
        )
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    message: Option<String>,
}

/// Accepts a bare id, a `spotify:track:` URI or an `open.spotify.com/track/` link.
pub fn parse_track_id(input: &str) -> Result<String, ApiError> {
    let trimmed = input.trim();
    let id = if let Some(rest) = trimmed.strip_prefix("spotify:track:") {
        rest
    } else if let Some(pos) = trimmed.find("/track/") {
        let rest = &trimmed[pos + "/track/".len()..];
        rest.split(['?', '/', '#']).next().unwrap_or_default()
    } else {
        trimmed
    };

    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::InvalidTrackId(input.to_string()));
    }
    Ok(id.to_string())
}

/// Spotify Web API client. Every call injects the stored bearer token and refreshes it
/// first when it has expired.
pub struct SpotifyClient {
    http: reqwest::Client,
    api_url: String,
    tokens: TokenStore,
    oauth: Arc<dyn OAuthProvider>,
    refresh_lock: Mutex<()>,
}

impl SpotifyClient {
    pub fn new(
        api_url: impl Into<String>,
        tokens: TokenStore,
        oauth: Arc<dyn OAuthProvider>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.into(),
            tokens,
            oauth,
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Returns a usable access token, refreshing the stored pair if it has expired.
    ///
    /// A failed refresh removes the stored pair.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        let current = self.tokens.load()?.ok_or(ApiError::NoAccessToken)?;
        if !current.is_expired() {
            return Ok(current.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Whoever held the lock before us may already have stored a new pair.
        let current = self.tokens.load()?.ok_or(ApiError::NoAccessToken)?;
        if !current.is_expired() {
            return Ok(current.access_token);
        }

        match self.oauth.refresh(&current.refresh_token).await {
            Ok(fresh) => {
                self.tokens.save(&fresh)?;
                Ok(fresh.access_token)
            }
            Err(e) => {
                warn!("Failed to refresh token: {}", e);
                if let Err(clear_err) = self.tokens.clear() {
                    warn!("Failed to clear stored tokens: {}", clear_err);
                }
                Err(ApiError::Refresh(e))
            }
        }
    }

    async fn send(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response, ApiError> {
        let token = self.access_token().await?;

        debug!("GET {}", path);
        let mut request = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|body| body.error)
                .and_then(|error| error.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let body = self.send(path, query).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get("/me", &[]).await
    }

    pub async fn top_artists(&self, range: TimeRange, limit: u32) -> Result<Paging<Artist>, ApiError> {
        self.get(
            "/me/top/artists",
            &[
                ("time_range", range.as_str().to_string()),
                ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
            ],
        )
        .await
    }

    pub async fn top_tracks(&self, range: TimeRange, limit: u32) -> Result<Paging<Track>, ApiError> {
        self.get(
            "/me/top/tracks",
            &[
                ("time_range", range.as_str().to_string()),
                ("limit", limit.clamp(1, MAX_LIMIT).to_string()),
            ],
        )
        .await
    }

    pub async fn recently_played(&self, limit: u32) -> Result<RecentlyPlayed, ApiError> {
        self.get(
            "/me/player/recently-played",
            &[("limit", limit.clamp(1, MAX_LIMIT).to_string())],
        )
        .await
    }

    /// `None` when nothing is playing. Provider errors also read as "nothing playing";
    /// authentication and transport failures still propagate.
    pub async fn currently_playing(&self) -> Result<Option<CurrentlyPlaying>, ApiError> {
        let response = match self.send("/me/player/currently-playing", &[]).await {
            Ok(response) => response,
            Err(ApiError::Status { status, message }) => {
                debug!("No playback information ({} - {})", status, message);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// Features for several tracks, batched by [`AUDIO_FEATURES_BATCH`]. Ids the provider
    /// does not know are skipped.
    pub async fn audio_features(&self, ids: &[String]) -> Result<Vec<AudioFeatures>, ApiError> {
        let mut features = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(AUDIO_FEATURES_BATCH) {
            let response: AudioFeaturesResponse = self
                .get("/audio-features", &[("ids", chunk.join(","))])
                .await?;
            features.extend(response.audio_features.into_iter().flatten());
        }

        Ok(features)
    }

    pub async fn audio_features_for_track(&self, track_id: &str) -> Result<AudioFeatures, ApiError> {
        let id = parse_track_id(track_id)?;
        self.get(&format!("/audio-features/{}", id), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_ms;
    use crate::storage::{MemoryStorage, Storage, AUTH_TOKENS_KEY};
    use crate::testing::{self, FakeOAuth};
    use mockito::{Matcher, Server};

    fn client_with(server_url: &str, expires_at: i64, oauth: Arc<FakeOAuth>) -> SpotifyClient {
        let tokens = TokenStore::new(Arc::new(MemoryStorage::new()));
        tokens.save(&testing::tokens("stored-token", expires_at)).unwrap();
        SpotifyClient::new(server_url, tokens, oauth).unwrap()
    }

    #[tokio::test]
    async fn test_top_artists_injects_bearer_and_decodes() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/me/top/artists")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("time_range".into(), "short_term".into()),
                Matcher::UrlEncoded("limit".into(), "50".into()),
            ]))
            .match_header("authorization", "Bearer stored-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(testing::top_artists_body())
            .create_async()
            .await;

        let client = client_with(&server.url(), now_ms() + 60_000, Arc::new(FakeOAuth::new()));
        let page = client.top_artists(TimeRange::ShortTerm, 500).await.unwrap();
        m.assert_async().await;

        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0].name, "Artist One");
        assert_eq!(page.items[0].genres, vec!["indie", "rock"]);
    }

    #[tokio::test]
    async fn test_error_carries_status_and_provider_message() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/me")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"status":403,"message":"Insufficient client scope"}}"#)
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/me/player/recently-played")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("Bad gateway")
            .create_async()
            .await;

        let client = client_with(&server.url(), now_ms() + 60_000, Arc::new(FakeOAuth::new()));

        let err = client.current_user().await.unwrap_err();
        assert_eq!(err.to_string(), "Spotify API Error: 403 - Insufficient client scope");
        assert!(!err.is_auth_failure());

        let err = client.recently_played(20).await.unwrap_err();
        assert_eq!(err.to_string(), "Spotify API Error: 502 - Unknown error");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_the_call() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/me")
            .match_header("authorization", "Bearer refreshed-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(testing::user_body())
            .create_async()
            .await;

        let oauth = Arc::new(FakeOAuth::new());
        let client = client_with(&server.url(), now_ms() - 1, oauth.clone());

        let user = client.current_user().await.unwrap();
        m.assert_async().await;
        assert_eq!(user.id, "listener");
        assert_eq!(oauth.refresh_calls(), 1);

        let stored = client.tokens().load().unwrap().unwrap();
        assert_eq!(stored.access_token, "refreshed-token");
        assert_eq!(stored.refresh_token, "refresh-token");
        assert!(!stored.is_expired());
    }

    #[tokio::test]
    async fn test_concurrent_calls_refresh_once() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/me")
            .match_header("authorization", "Bearer refreshed-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(testing::user_body())
            .expect(2)
            .create_async()
            .await;

        let oauth = Arc::new(FakeOAuth::new());
        let client = client_with(&server.url(), now_ms() - 1, oauth.clone());

        let (a, b) = tokio::join!(client.current_user(), client.current_user());
        assert!(a.is_ok() && b.is_ok());
        m.assert_async().await;
        assert_eq!(oauth.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_tokens() {
        let mut server = Server::new_async().await;
        let m = server.mock("GET", "/me").expect(0).create_async().await;

        let client = client_with(&server.url(), now_ms() - 1, Arc::new(FakeOAuth::failing()));

        let err = client.current_user().await.unwrap_err();
        assert!(matches!(err, ApiError::Refresh(_)));
        assert!(err.is_auth_failure());
        assert!(client.tokens().load().unwrap().is_none());
        m.assert_async().await;

        // With nothing stored the next call fails without touching the network.
        assert!(matches!(client.current_user().await, Err(ApiError::NoAccessToken)));
    }

    #[tokio::test]
    async fn test_corrupt_tokens_are_an_auth_failure() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(AUTH_TOKENS_KEY, "{").unwrap();
        let client = SpotifyClient::new(
            "http://127.0.0.1:9",
            TokenStore::new(storage),
            Arc::new(FakeOAuth::new()),
        )
        .unwrap();

        let err = client.current_user().await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_currently_playing_no_content_and_errors_are_none() {
        let mut server = Server::new_async().await;
        let client = client_with(&server.url(), now_ms() + 60_000, Arc::new(FakeOAuth::new()));

        let m = server
            .mock("GET", "/me/player/currently-playing")
            .with_status(204)
            .create_async()
            .await;
        assert!(client.currently_playing().await.unwrap().is_none());
        m.remove_async().await;

        let m = server
            .mock("GET", "/me/player/currently-playing")
            .with_status(404)
            .with_body(r#"{"error":{"status":404,"message":"Player command failed: No active device found"}}"#)
            .create_async()
            .await;
        assert!(client.currently_playing().await.unwrap().is_none());
        m.remove_async().await;

        let _m = server
            .mock("GET", "/me/player/currently-playing")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(testing::currently_playing_body())
            .create_async()
            .await;
        let playing = client.currently_playing().await.unwrap().unwrap();
        assert!(playing.is_playing);
        assert_eq!(playing.item.unwrap().name, "Track One");
        assert_eq!(playing.device.unwrap().kind, "Computer");
    }

    #[tokio::test]
    async fn test_audio_features_are_batched_and_nulls_dropped() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/audio-features")
            .match_query(Matcher::Regex("ids=".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"audio_features":[null,{}]}}"#,
                testing::audio_features_json("t1", 0.5, 0.7)
            ))
            .expect(2)
            .create_async()
            .await;

        let client = client_with(&server.url(), now_ms() + 60_000, Arc::new(FakeOAuth::new()));
        let ids: Vec<String> = (0..150).map(|i| format!("id{}", i)).collect();
        let features = client.audio_features(&ids).await.unwrap();
        m.assert_async().await;
        assert_eq!(features.len(), 2);

        assert!(client.audio_features(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_features_for_track_accepts_links() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/audio-features/4uLU6hMCjMI75M1A2tKUQC")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(testing::audio_features_json("4uLU6hMCjMI75M1A2tKUQC", 0.6, 0.4))
            .create_async()
            .await;

        let client = client_with(&server.url(), now_ms() + 60_000, Arc::new(FakeOAuth::new()));
        let features = client
            .audio_features_for_track("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc")
            .await
            .unwrap();
        m.assert_async().await;
        assert_eq!(features.id, "4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn test_parse_track_id() {
        assert_eq!(parse_track_id("spotify:track:abc123").unwrap(), "abc123");
        assert_eq!(parse_track_id(" abc123 ").unwrap(), "abc123");
        assert_eq!(
            parse_track_id("https://open.spotify.com/track/abc123/").unwrap(),
            "abc123"
        );
        assert!(matches!(parse_track_id("../me"), Err(ApiError::InvalidTrackId(_))));
        assert!(parse_track_id("").is_err());
    }
}
