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

//! Fixtures shared by the unit tests.

use crate::auth::{AuthError, OAuthProvider};
use crate::models::{now_ms, AuthTokens};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn tokens(access_token: &str, expires_at: i64) -> AuthTokens {
    AuthTokens {
        access_token: access_token.to_string(),
        refresh_token: "refresh-token".to_string(),
        expires_at,
        token_type: "Bearer".to_string(),
    }
}

/// Token endpoint stand-in that counts calls.
#[derive(Default)]
pub struct FakeOAuth {
    fail: bool,
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeOAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn rejected() -> AuthError {
        AuthError::TokenEndpoint {
            status: 400,
            message: "invalid_grant".to_string(),
        }
    }
}

#[async_trait]
impl OAuthProvider for FakeOAuth {
    async fn exchange_code(&self, _code: &str) -> Result<AuthTokens, AuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Self::rejected());
        }
        Ok(tokens("exchanged-token", now_ms() + 3_600_000))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to pile up on the refresh lock.
        tokio::task::yield_now().await;
        if self.fail {
            return Err(Self::rejected());
        }
        Ok(AuthTokens {
            access_token: "refreshed-token".to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: now_ms() + 3_600_000,
            token_type: "Bearer".to_string(),
        })
    }
}

pub fn user_body() -> &'static str {
    r#"{
        "id": "listener",
        "display_name": "Listener",
        "email": "listener@example.com",
        "images": [{"url": "https://i.scdn.co/image/u", "height": 64, "width": 64}],
        "followers": {"total": 1234},
        "country": "SE",
        "product": "premium"
    }"#
}

pub fn top_artists_body() -> &'static str {
    r#"{
        "items": [
            {"id": "a1", "name": "Artist One", "genres": ["indie", "rock"], "images": [],
             "followers": {"total": 2500000}, "popularity": 80,
             "external_urls": {"spotify": "https://open.spotify.com/artist/a1"}},
            {"id": "a2", "name": "Artist Two", "genres": ["rock", "pop"], "images": [],
             "followers": {"total": 4200}, "popularity": 60, "external_urls": {}},
            {"id": "a3", "name": "Artist Three", "genres": ["rock", "jazz"], "images": [],
             "followers": {"total": 12}, "popularity": 20, "external_urls": {}}
        ],
        "total": 3,
        "limit": 50,
        "offset": 0,
        "next": null
    }"#
}

fn track_json(id: &str, name: &str) -> String {
    format!(
        r#"{{"id": "{id}", "name": "{name}",
            "artists": [{{"id": "a1", "name": "Artist One"}}],
            "album": {{"id": "al1", "name": "Album", "images": [], "release_date": "2020-01-01"}},
            "duration_ms": 215000, "popularity": 55, "preview_url": null,
            "external_urls": {{"spotify": "https://open.spotify.com/track/{id}"}}}}"#
    )
}

pub fn top_tracks_body() -> String {
    format!(
        r#"{{"items": [{}, {}], "total": 2, "limit": 50, "offset": 0}}"#,
        track_json("t1", "Track One"),
        track_json("t2", "Track Two")
    )
}

pub fn recently_played_body() -> String {
    format!(
        r#"{{"items": [
            {{"track": {}, "played_at": "2024-05-01T10:15:00.000Z"}},
            {{"track": {}, "played_at": "2024-05-01T10:11:00Z"}}
        ]}}"#,
        track_json("t1", "Track One"),
        track_json("t2", "Track Two")
    )
}

pub fn currently_playing_body() -> String {
    format!(
        r#"{{"item": {}, "is_playing": true, "progress_ms": 61000,
            "device": {{"id": "d1", "name": "Laptop", "type": "Computer", "volume_percent": 70}}}}"#,
        track_json("t1", "Track One")
    )
}

pub fn audio_features_json(id: &str, danceability: f32, energy: f32) -> String {
    format!(
        r#"{{"id": "{id}", "danceability": {danceability}, "energy": {energy}, "key": 5,
            "loudness": -6.5, "mode": 1, "speechiness": 0.05, "acousticness": 0.2,
            "instrumentalness": 0.0, "liveness": 0.1, "valence": 0.6, "tempo": 120.0,
            "duration_ms": 215000}}"#
    )
}
