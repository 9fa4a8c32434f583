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

use crate::config::SpotifyConfig;
use crate::models::{now_ms, AuthTokens, TokenResponse};
use crate::storage::StorageError;
use async_trait::async_trait;
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const STATE_LENGTH: usize = 16;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid OAuth configuration: {0}")]
    Config(String),
    #[error("Network error talking to the accounts service: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token endpoint error: {status} - {message}")]
    TokenEndpoint { status: u16, message: String },
    #[error("Token endpoint response did not include a refresh token")]
    MissingRefreshToken,
    #[error("Authentication error: {0}")]
    Denied(String),
    #[error("Invalid authentication callback")]
    InvalidCallback,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The token endpoint of an OAuth2 authorization server.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Exchanges an authorization code for a fresh token pair.
    async fn exchange_code(&self, code: &str) -> Result<AuthTokens, AuthError>;

    /// Trades a refresh token for a new pair. The returned pair keeps `refresh_token`
    /// when the server does not rotate it.
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError>;
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Talks to the Spotify accounts service (`/api/token`).
pub struct AccountsClient {
    http: reqwest::Client,
    config: Arc<SpotifyConfig>,
}

impl AccountsClient {
    pub fn new(config: Arc<SpotifyConfig>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<TokenErrorBody>().await {
                Ok(body) => body
                    .error_description
                    .or(body.error)
                    .unwrap_or_else(|| "Unknown error".to_string()),
                Err(_) => "Unknown error".to_string(),
            };
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<TokenResponse>().await?)
    }
}

#[async_trait]
impl OAuthProvider for AccountsClient {
    async fn exchange_code(&self, code: &str) -> Result<AuthTokens, AuthError> {
        debug!("Exchanging authorization code for tokens");
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;

        response
            .into_tokens(now_ms(), None)
            .ok_or(AuthError::MissingRefreshToken)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        info!("Access token expired, refreshing");
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;

        response
            .into_tokens(now_ms(), Some(refresh_token))
            .ok_or(AuthError::MissingRefreshToken)
    }
}

/// Random alphanumeric value for the CSRF `state` parameter.
pub fn generate_state(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Builds the `/authorize` URL the user opens to grant access.
///
/// `show_dialog=true` forces the consent screen so a different account can be chosen
/// after a logout.
pub fn authorize_url(config: &SpotifyConfig, state: &str) -> Result<Url, AuthError> {
    let mut url = Url::parse(&config.authorize_endpoint())
        .map_err(|e| AuthError::Config(format!("authorize endpoint: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("scope", &config.scope_string())
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("state", state)
        .append_pair("show_dialog", "true");

    Ok(url)
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    /// Accepts a full redirect URL or a bare query string (`code=..&state=..`).
    pub fn parse(input: &str) -> Result<Self, AuthError> {
        let input = input.trim();
        let query = match Url::parse(input) {
            Ok(url) => url.query().unwrap_or_default().to_string(),
            Err(_) => input.trim_start_matches('?').to_string(),
        };
        if query.is_empty() {
            return Err(AuthError::InvalidCallback);
        }

        let mut params = CallbackParams::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(params)
    }

    /// Returns the authorization code when the callback is legitimate.
    ///
    /// A provider `error` wins over everything else. Otherwise `code` and `state` must both
    /// be present and `state` must equal the value stored when the login began.
    pub fn verify(self, stored_state: Option<&str>) -> Result<String, AuthError> {
        if let Some(error) = self.error {
            return Err(AuthError::Denied(error));
        }

        match (self.code, self.state, stored_state) {
            (Some(code), Some(state), Some(stored)) if !code.is_empty() && state == stored => {
                Ok(code)
            }
            _ => Err(AuthError::InvalidCallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn config_for(server_url: &str) -> Arc<SpotifyConfig> {
        Arc::new(SpotifyConfig::new("client-id", "client-secret").with_endpoints(server_url, server_url))
    }

    #[test]
    fn test_generate_state() {
        let state = generate_state(STATE_LENGTH);
        assert_eq!(state.len(), 16);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(state, generate_state(STATE_LENGTH));
    }

    #[test]
    fn test_authorize_url_parameters() {
        let config = SpotifyConfig::new("my-client", "secret");
        let url = authorize_url(&config, "abc123").unwrap();

        assert!(url.as_str().starts_with("https://accounts.spotify.com/authorize?"));
        let pairs: std::collections::HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "my-client");
        assert_eq!(pairs["state"], "abc123");
        assert_eq!(pairs["redirect_uri"], config.redirect_uri);
        assert_eq!(pairs["show_dialog"], "true");
        assert!(pairs["scope"].contains("user-read-recently-played"));
    }

    #[test]
    fn test_callback_verification() {
        let ok = CallbackParams::parse("http://127.0.0.1:8888/callback?code=xyz&state=s1").unwrap();
        assert_eq!(ok.clone().verify(Some("s1")).unwrap(), "xyz");

        // State mismatch, missing stored state, missing code.
        assert!(matches!(ok.clone().verify(Some("other")), Err(AuthError::InvalidCallback)));
        assert!(matches!(ok.verify(None), Err(AuthError::InvalidCallback)));
        let no_code = CallbackParams::parse("state=s1").unwrap();
        assert!(matches!(no_code.verify(Some("s1")), Err(AuthError::InvalidCallback)));

        let denied = CallbackParams::parse("?error=access_denied&state=s1").unwrap();
        let err = denied.verify(Some("s1")).unwrap_err();
        assert_eq!(err.to_string(), "Authentication error: access_denied");

        assert!(CallbackParams::parse("http://127.0.0.1:8888/callback").is_err());
    }

    #[tokio::test]
    async fn test_exchange_code_posts_form_and_computes_expiry() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                Matcher::UrlEncoded("client_secret".into(), "client-secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at","token_type":"Bearer","expires_in":3600,"refresh_token":"rt","scope":"user-top-read"}"#,
            )
            .create_async()
            .await;

        let client = AccountsClient::new(config_for(&server.url())).unwrap();
        let before = now_ms();
        let tokens = client.exchange_code("the-code").await.unwrap();
        m.assert_async().await;

        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token, "rt");
        assert!(tokens.expires_at >= before + 3_600_000);
        assert!(!tokens.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old-rt".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new-at","token_type":"Bearer","expires_in":3600}"#)
            .create_async()
            .await;

        let client = AccountsClient::new(config_for(&server.url())).unwrap();
        let tokens = client.refresh("old-rt").await.unwrap();
        m.assert_async().await;

        assert_eq!(tokens.access_token, "new-at");
        assert_eq!(tokens.refresh_token, "old-rt");
    }

    #[tokio::test]
    async fn test_token_endpoint_error_is_reported() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid authorization code"}"#)
            .create_async()
            .await;

        let client = AccountsClient::new(config_for(&server.url())).unwrap();
        let err = client.exchange_code("bad").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Token endpoint error: 400 - Invalid authorization code"
        );
    }

    #[tokio::test]
    async fn test_exchange_without_refresh_token_fails() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","token_type":"Bearer","expires_in":3600}"#)
            .create_async()
            .await;

        let client = AccountsClient::new(config_for(&server.url())).unwrap();
        let err = client.exchange_code("code").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken));
    }
}
