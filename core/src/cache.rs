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

//! In-memory request cache for API reads.
//!
//! Concurrent fetches of the same key share one in-flight future. Successful results are
//! kept for a TTL, and a failed fetch is retried once unless it failed for authentication
//! reasons.

use crate::client::ApiError;
use crate::models::TimeRange;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Profile,
    TopArtists(TimeRange, u32),
    TopTracks(TimeRange, u32),
    RecentlyPlayed(u32),
    CurrentlyPlaying,
    AudioFeatures(String),
    AudioFeaturesBatch(Vec<String>),
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Profile => write!(f, "profile"),
            QueryKey::TopArtists(range, limit) => write!(f, "topArtists/{}/{}", range, limit),
            QueryKey::TopTracks(range, limit) => write!(f, "topTracks/{}/{}", range, limit),
            QueryKey::RecentlyPlayed(limit) => write!(f, "recentTracks/{}", limit),
            QueryKey::CurrentlyPlaying => write!(f, "currentlyPlaying"),
            QueryKey::AudioFeatures(id) => write!(f, "audioFeatures/{}", id),
            QueryKey::AudioFeaturesBatch(ids) => write!(f, "audioFeatures/[{}]", ids.len()),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error(transparent)]
    Api(Arc<ApiError>),
    #[error("Cached value for '{0}' has an unexpected type")]
    TypeMismatch(String),
}

impl QueryError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, QueryError::Api(e) if e.is_auth_failure())
    }
}

type Erased = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, Result<Erased, Arc<ApiError>>>>;

struct Entry {
    value: Erased,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, Entry>,
    in_flight: HashMap<QueryKey, InFlight>,
    generation: u64,
}

pub struct QueryCache {
    ttl: Duration,
    retry_delay: Duration,
    state: Mutex<CacheState>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_RETRY_DELAY)
    }
}

impl QueryCache {
    pub fn new(ttl: Duration, retry_delay: Duration) -> Self {
        Self {
            ttl,
            retry_delay,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached value for `key`, joins a fetch already running for it, or starts
    /// a new one with `fetcher`.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let (shared, generation) = {
            let mut state = self.lock();

            if let Some(entry) = state.entries.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!("Cache hit for {}", key);
                    return downcast(&key, entry.value.clone());
                }
                state.entries.remove(&key);
            }

            let shared = match state.in_flight.get(&key) {
                Some(running) => {
                    debug!("Joining in-flight request for {}", key);
                    running.clone()
                }
                None => {
                    let shared = Self::run(key.clone(), fetcher, self.retry_delay);
                    state.in_flight.insert(key.clone(), shared.clone());
                    shared
                }
            };
            (shared, state.generation)
        };

        let result = shared.clone().await;

        {
            let mut state = self.lock();
            // Only the request that is still registered may settle the key; a clear() in
            // between bumps the generation and drops the result.
            let still_current = state.generation == generation
                && state
                    .in_flight
                    .get(&key)
                    .map_or(false, |running| running.ptr_eq(&shared));
            if still_current {
                state.in_flight.remove(&key);
                if let Ok(value) = &result {
                    state.entries.insert(
                        key.clone(),
                        Entry {
                            value: value.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
            }
        }

        match result {
            Ok(value) => downcast(&key, value),
            Err(e) => Err(QueryError::Api(e)),
        }
    }

    fn run<T, F, Fut>(key: QueryKey, fetcher: F, retry_delay: Duration) -> InFlight
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        async move {
            let value = match fetcher().await {
                Ok(value) => value,
                Err(e) if e.is_auth_failure() => return Err(Arc::new(e)),
                Err(e) => {
                    warn!("Request for {} failed, retrying once: {}", key, e);
                    tokio::time::sleep(retry_delay).await;
                    fetcher().await.map_err(Arc::new)?
                }
            };
            Ok(Arc::new(value) as Erased)
        }
        .boxed()
        .shared()
    }

    pub fn invalidate(&self, key: &QueryKey) {
        let mut state = self.lock();
        state.entries.remove(key);
        state.in_flight.remove(key);
    }

    /// Drops every cached response and forgets running requests.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.in_flight.clear();
        state.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn downcast<T: Send + Sync + 'static>(key: &QueryKey, value: Erased) -> Result<Arc<T>, QueryError> {
    value
        .downcast::<T>()
        .map_err(|_| QueryError::TypeMismatch(key.to_string()))
}
