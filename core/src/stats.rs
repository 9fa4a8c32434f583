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

use crate::cache::{QueryError, QueryKey};
use crate::client::MAX_LIMIT;
use crate::models::{
    Artist, AudioFeatures, CurrentlyPlaying, Paging, RecentlyPlayed, TimeRange, Track, User,
};
use crate::session::Session;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Items shown per list in the overview.
pub const OVERVIEW_ITEMS: usize = 5;
/// Slices in the genre breakdown.
pub const TOP_GENRES: usize = 8;

/// One genre's share among the top artists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreShare {
    pub genre: String,
    pub count: u32,
    pub percent: f32,
}

/// Counts genres across `artists` and keeps the `top_n` most frequent. Percentages are
/// relative to the kept genres, so they add up to 100.
pub fn genre_breakdown(artists: &[Artist], top_n: usize) -> Vec<GenreShare> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for artist in artists {
        for genre in &artist.genres {
            *counts.entry(genre.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(top_n);

    let total: u32 = ranked.iter().map(|(_, count)| count).sum();
    ranked
        .into_iter()
        .map(|(genre, count)| GenreShare {
            genre: genre.to_string(),
            count,
            percent: count as f32 * 100.0 / total as f32,
        })
        .collect()
}

/// Average audio features over a set of tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProfile {
    pub tracks: usize,
    pub danceability: f32,
    pub energy: f32,
    pub valence: f32,
    pub acousticness: f32,
    pub instrumentalness: f32,
    pub liveness: f32,
    pub speechiness: f32,
    pub tempo: f32,
}

impl FeatureProfile {
    pub fn from_features(features: &[AudioFeatures]) -> Option<Self> {
        if features.is_empty() {
            return None;
        }
        let n = features.len() as f32;
        let avg = |f: fn(&AudioFeatures) -> f32| features.iter().map(f).sum::<f32>() / n;

        Some(Self {
            tracks: features.len(),
            danceability: avg(|a| a.danceability),
            energy: avg(|a| a.energy),
            valence: avg(|a| a.valence),
            acousticness: avg(|a| a.acousticness),
            instrumentalness: avg(|a| a.instrumentalness),
            liveness: avg(|a| a.liveness),
            speechiness: avg(|a| a.speechiness),
            tempo: avg(|a| a.tempo),
        })
    }

    pub fn percentages(&self) -> [(&'static str, f32); 7] {
        [
            ("danceability", self.danceability),
            ("energy", self.energy),
            ("valence", self.valence),
            ("acousticness", self.acousticness),
            ("instrumentalness", self.instrumentalness),
            ("liveness", self.liveness),
            ("speechiness", self.speechiness),
        ]
    }
}

/// Dashboard summary for one time range.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub time_range: TimeRange,
    pub top_artists: Vec<Artist>,
    pub top_tracks: Vec<Track>,
    pub top_genres: Vec<GenreShare>,
    pub recently_played_count: usize,
}

/// Cached, typed reads for each view.
pub struct Insights {
    session: Arc<Session>,
}

impl Insights {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn profile(&self) -> Result<Arc<User>, QueryError> {
        self.session
            .query(QueryKey::Profile, |client| async move { client.current_user().await })
            .await
    }

    pub async fn top_artists(&self, range: TimeRange, limit: u32) -> Result<Arc<Paging<Artist>>, QueryError> {
        let limit = limit.clamp(1, MAX_LIMIT);
        self.session
            .query(QueryKey::TopArtists(range, limit), move |client| async move {
                client.top_artists(range, limit).await
            })
            .await
    }

    pub async fn top_tracks(&self, range: TimeRange, limit: u32) -> Result<Arc<Paging<Track>>, QueryError> {
        let limit = limit.clamp(1, MAX_LIMIT);
        self.session
            .query(QueryKey::TopTracks(range, limit), move |client| async move {
                client.top_tracks(range, limit).await
            })
            .await
    }

    pub async fn recently_played(&self, limit: u32) -> Result<Arc<RecentlyPlayed>, QueryError> {
        let limit = limit.clamp(1, MAX_LIMIT);
        self.session
            .query(QueryKey::RecentlyPlayed(limit), move |client| async move {
                client.recently_played(limit).await
            })
            .await
    }

    /// Playback state is always fetched fresh.
    pub async fn currently_playing(&self) -> Result<Arc<Option<CurrentlyPlaying>>, QueryError> {
        self.session.cache().invalidate(&QueryKey::CurrentlyPlaying);
        self.session
            .query(QueryKey::CurrentlyPlaying, |client| async move {
                client.currently_playing().await
            })
            .await
    }

    pub async fn track_features(&self, track_id: &str) -> Result<Arc<AudioFeatures>, QueryError> {
        let id = track_id.to_string();
        self.session
            .query(QueryKey::AudioFeatures(id.clone()), move |client| {
                let id = id.clone();
                async move { client.audio_features_for_track(&id).await }
            })
            .await
    }

    /// Genre breakdown of the top 50 artists in `range`.
    pub async fn genres(&self, range: TimeRange) -> Result<Vec<GenreShare>, QueryError> {
        let artists = self.top_artists(range, MAX_LIMIT).await?;
        Ok(genre_breakdown(&artists.items, TOP_GENRES))
    }

    /// Average audio features of the top 50 tracks in `range`.
    pub async fn feature_profile(&self, range: TimeRange) -> Result<Option<FeatureProfile>, QueryError> {
        let tracks = self.top_tracks(range, MAX_LIMIT).await?;
        let ids: Vec<String> = tracks.items.iter().filter_map(|t| t.id.clone()).collect();
        if ids.is_empty() {
            return Ok(None);
        }

        let key = QueryKey::AudioFeaturesBatch(ids.clone());
        let features = self
            .session
            .query(key, move |client| {
                let ids = ids.clone();
                async move { client.audio_features(&ids).await }
            })
            .await?;
        Ok(FeatureProfile::from_features(&features))
    }

    /// Top artists, top tracks, genres and recent plays, fetched concurrently.
    pub async fn overview(&self, range: TimeRange) -> Result<Overview, QueryError> {
        let (artists, tracks, recent) = tokio::try_join!(
            self.top_artists(range, MAX_LIMIT),
            self.top_tracks(range, MAX_LIMIT),
            self.recently_played(MAX_LIMIT),
        )?;
        debug!(
            "Overview for {}: {} artists, {} tracks, {} recent",
            range,
            artists.items.len(),
            tracks.items.len(),
            recent.items.len()
        );

        Ok(Overview {
            time_range: range,
            top_artists: artists.items.iter().take(OVERVIEW_ITEMS).cloned().collect(),
            top_tracks: tracks.items.iter().take(OVERVIEW_ITEMS).cloned().collect(),
            top_genres: genre_breakdown(&artists.items, TOP_GENRES),
            recently_played_count: recent.items.len(),
        })
    }
}
