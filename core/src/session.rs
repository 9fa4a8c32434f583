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

use crate::auth::{authorize_url, generate_state, AccountsClient, AuthError, CallbackParams, OAuthProvider, STATE_LENGTH};
use crate::cache::{QueryCache, QueryError, QueryKey};
use crate::client::{ApiError, SpotifyClient};
use crate::config::SpotifyConfig;
use crate::models::User;
use crate::storage::{Storage, StorageError, TokenStore, AUTH_STATE_KEY};
use log::{info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use url::Url;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("A login is already in progress")]
    LoginInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub status: AuthStatus,
    pub user: Option<User>,
    pub error: Option<String>,
    pub initialized: bool,
}

/// The auth/session store: current profile, token lifecycle, and the request cache that
/// must be dropped together with them.
pub struct Session {
    config: Arc<SpotifyConfig>,
    oauth: Arc<dyn OAuthProvider>,
    client: Arc<SpotifyClient>,
    tokens: TokenStore,
    session_storage: Arc<dyn Storage>,
    cache: QueryCache,
    state: RwLock<SessionState>,
    init: OnceCell<()>,
}

impl Session {
    /// `local` keeps the token pair and profile between runs, `session_storage` holds values
    /// that only live for the current login attempt.
    pub fn new(
        config: Arc<SpotifyConfig>,
        local: Arc<dyn Storage>,
        session_storage: Arc<dyn Storage>,
        oauth: Arc<dyn OAuthProvider>,
    ) -> Result<Self, SessionError> {
        let tokens = TokenStore::new(local);
        let client = SpotifyClient::new(config.api_url.clone(), tokens.clone(), oauth.clone())?;

        Ok(Self {
            config,
            oauth,
            client: Arc::new(client),
            tokens,
            session_storage,
            cache: QueryCache::default(),
            state: RwLock::new(SessionState::default()),
            init: OnceCell::new(),
        })
    }

    /// Session backed by the real Spotify accounts service.
    pub fn from_config(
        config: Arc<SpotifyConfig>,
        local: Arc<dyn Storage>,
        session_storage: Arc<dyn Storage>,
    ) -> Result<Self, SessionError> {
        let oauth = Arc::new(AccountsClient::new(config.clone())?);
        Self::new(config, local, session_storage, oauth)
    }

    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn client(&self) -> Arc<SpotifyClient> {
        self.client.clone()
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.status == AuthStatus::Authenticated
    }

    /// Starts a fresh login: drops any existing session, stores a new CSRF `state` and
    /// returns the URL the user must open.
    pub async fn begin_login(&self) -> Result<Url, SessionError> {
        self.reset(None).await?;

        let state = generate_state(STATE_LENGTH);
        self.session_storage.set_item(AUTH_STATE_KEY, &state)?;
        Ok(authorize_url(&self.config, &state)?)
    }

    /// Handles the redirect back from the provider. The stored `state` is consumed whatever
    /// the outcome, so a callback can never be replayed. A rejected callback ends any
    /// existing session.
    pub async fn complete_login(&self, callback: &str) -> Result<User, SessionError> {
        let stored = self.session_storage.get_item(AUTH_STATE_KEY)?;
        self.session_storage.remove_item(AUTH_STATE_KEY)?;

        let code = match CallbackParams::parse(callback).and_then(|p| p.verify(stored.as_deref())) {
            Ok(code) => code,
            Err(e) => {
                warn!("Rejected OAuth callback: {}", e);
                if let Err(clear_err) = self.reset(Some(e.to_string())).await {
                    warn!("Failed to clear session: {}", clear_err);
                }
                return Err(e.into());
            }
        };

        self.login(&code).await
    }

    /// Exchanges `code` for a token pair and loads the profile. Any failure leaves no
    /// tokens or profile behind and records the error message.
    pub async fn login(&self, code: &str) -> Result<User, SessionError> {
        {
            let mut state = self.state.write().await;
            if state.status == AuthStatus::Authenticating {
                return Err(SessionError::LoginInProgress);
            }
            state.status = AuthStatus::Authenticating;
            state.error = None;
        }

        match self.exchange_and_load(code).await {
            Ok(user) => {
                info!("Logged in as {}", user.name());
                let mut state = self.state.write().await;
                state.status = AuthStatus::Authenticated;
                state.user = Some(user.clone());
                state.initialized = true;
                Ok(user)
            }
            Err(e) => {
                warn!("Login failed: {}", e);
                if let Err(clear_err) = self.reset(Some(e.to_string())).await {
                    warn!("Failed to clear partial session: {}", clear_err);
                }
                self.state.write().await.initialized = true;
                Err(e)
            }
        }
    }

    async fn exchange_and_load(&self, code: &str) -> Result<User, SessionError> {
        let tokens = self.oauth.exchange_code(code).await?;
        self.tokens.save(&tokens)?;
        let user = self.client.current_user().await?;
        self.tokens.save_user(&user)?;
        Ok(user)
    }

    /// Removes the token pair, profile, session-scoped values and cached responses.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.reset(None).await?;
        info!("Logged out");
        Ok(())
    }

    /// Re-hydrates the session from storage. Only the first call does any work, and none
    /// is done once a login has completed.
    ///
    /// An unexpired stored pair is trusted without a new login round trip; an expired or
    /// missing one leaves the session unauthenticated. Unreadable storage or a failed
    /// profile fetch clears the session.
    pub async fn initialize(&self) {
        self.init.get_or_init(|| self.restore()).await;
    }

    async fn restore(&self) {
        // A login in this process already settled the session.
        if self.state.read().await.initialized {
            return;
        }

        let stored = match self.tokens.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Stored session is unreadable, clearing it: {}", e);
                self.finish_restore_with_reset().await;
                return;
            }
        };

        let tokens = match stored {
            Some(tokens) if !tokens.is_expired() => tokens,
            _ => {
                self.state.write().await.initialized = true;
                return;
            }
        };

        self.state.write().await.status = AuthStatus::Authenticating;
        match self.client.current_user().await {
            Ok(user) => {
                if let Err(e) = self.tokens.save_user(&user) {
                    warn!("Failed to persist profile: {}", e);
                }
                info!("Restored session for {} (token valid until {})", user.name(), tokens.expires_at);
                let mut state = self.state.write().await;
                state.status = AuthStatus::Authenticated;
                state.user = Some(user);
                state.initialized = true;
            }
            Err(e) => {
                warn!("Failed to initialize auth: {}", e);
                self.finish_restore_with_reset().await;
            }
        }
    }

    async fn finish_restore_with_reset(&self) {
        if let Err(e) = self.reset(None).await {
            warn!("Failed to clear session: {}", e);
        }
        self.state.write().await.initialized = true;
    }

    /// Runs an API read through the request cache. An authentication failure ends the
    /// session.
    pub async fn query<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<SpotifyClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let client = self.client.clone();
        let result = self.cache.fetch(key, move || fetch(client.clone())).await;

        if let Err(e) = &result {
            if e.is_auth_failure() {
                warn!("Session is no longer valid: {}", e);
                if let Err(clear_err) = self.reset(Some(e.to_string())).await {
                    warn!("Failed to clear session: {}", clear_err);
                }
            }
        }
        result
    }

    async fn reset(&self, error: Option<String>) -> Result<(), SessionError> {
        self.cache.clear();
        {
            let mut state = self.state.write().await;
            state.status = AuthStatus::Unauthenticated;
            state.user = None;
            state.error = error;
        }
        self.tokens.clear()?;
        self.session_storage.clear()?;
        Ok(())
    }
}
