// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP backend client.
//!
//! Handles:
//! - Auth endpoints under `/auth/v1` (code exchange, token refresh, user
//!   lookup, logout, magic link, OAuth authorize URL)
//! - Row endpoints under `/rest/v1` (`profiles`, `user_consent`)
//! - Session persistence and transparent refresh

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::persist::{PersistedAuth, SessionStorage};
use super::pkce;
use super::tables;
use super::{Credential, IdentityProvider, RowStore};
use crate::error::{AppError, Result};
use crate::models::{AuthUser, ConsentRecord, NewProfile, Profile, ProfileUpdate, Session};

/// Refresh the access token when it expires within this many seconds.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Assumed lifetime when neither the response nor the token says otherwise.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Postgres unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";

/// Low-level HTTP client shared by the auth and row clients.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request with the `apikey` header and a bearer token (anon key if none).
    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key))
    }
}

/// Token grant response from `/auth/v1/token`.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| Utc::now() + Duration::seconds(secs))
            })
            .or_else(|| access_token_expiry(&self.access_token))
            .unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_TOKEN_TTL_SECS));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Error body shapes returned by the auth and row endpoints.
#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    /// PostgREST puts the SQLSTATE here; the auth API uses a number
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn detail(&self) -> Option<&str> {
        self.error_description
            .as_deref()
            .or(self.message.as_deref())
            .or(self.msg.as_deref())
            .or(self.error.as_deref())
    }

    fn is_unique_violation(&self) -> bool {
        self.code.as_ref().and_then(|c| c.as_str()) == Some(PG_UNIQUE_VIOLATION)
    }
}

#[derive(Deserialize)]
struct AccessClaims {
    exp: i64,
}

/// Read `exp` from an access token. The signature is the provider's concern;
/// the token is only inspected to schedule refresh.
fn access_token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(data.claims.exp, 0)
}

/// Map a non-success response to an error using `make` for the variant.
async fn error_from_response(
    response: reqwest::Response,
    make: fn(String) -> AppError,
    operation: &'static str,
) -> AppError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let detail = body.detail().unwrap_or(text.as_str()).to_string();

    if status == StatusCode::CONFLICT || body.is_unique_violation() {
        return AppError::UniqueViolation(detail);
    }

    tracing::warn!(status = %status, operation, detail = %detail, "Backend request failed");
    make(format!("{} failed with HTTP {}: {}", operation, status, detail))
}

async fn check_json<T: DeserializeOwned>(
    response: reqwest::Response,
    make: fn(String) -> AppError,
    operation: &'static str,
) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response, make, operation).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| make(format!("{}: invalid response body: {}", operation, e)))
}

async fn check_empty(
    response: reqwest::Response,
    make: fn(String) -> AppError,
    operation: &'static str,
) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(error_from_response(response, make, operation).await)
}

// ─── Identity Provider ────────────────────────────────────────────────

/// Identity provider speaking the `/auth/v1` API.
pub struct RestIdentityProvider<S> {
    client: RestClient,
    storage: S,
    redirect_url: String,
    /// Serializes refreshes so concurrent callers don't burn the refresh token twice.
    refresh_lock: Mutex<()>,
}

impl<S: SessionStorage> RestIdentityProvider<S> {
    pub fn new(client: RestClient, storage: S, redirect_url: impl Into<String>) -> Self {
        Self {
            client,
            storage,
            redirect_url: redirect_url.into(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &RestClient {
        &self.client
    }

    /// Build an OAuth authorize URL for `oauth_provider` (e.g. "github").
    ///
    /// The PKCE verifier is persisted so the callback's code can be exchanged.
    pub async fn authorize_url(&self, oauth_provider: &str) -> Result<String> {
        let challenge = self.begin_pkce().await?;

        let mut url = url::Url::parse(&format!("{}/auth/v1/authorize", self.client.base_url))
            .map_err(|e| AppError::Internal(e.into()))?;
        url.query_pairs_mut()
            .append_pair("provider", oauth_provider)
            .append_pair("redirect_to", &self.redirect_url)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "s256");

        tracing::info!(provider = oauth_provider, "Starting OAuth login");
        Ok(url.into())
    }

    /// Send a magic sign-in link to `email`.
    pub async fn send_magic_link(&self, email: &str) -> Result<()> {
        let challenge = self.begin_pkce().await?;

        let body = serde_json::json!({
            "email": email,
            "create_user": true,
            "code_challenge": challenge,
            "code_challenge_method": "s256",
        });

        let response = self
            .client
            .request(Method::POST, "/auth/v1/otp", None)
            .query(&[("redirect_to", self.redirect_url.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Provider(e.to_string()))?;

        check_empty(response, AppError::Provider, "magic link").await?;
        tracing::info!("Magic link sent");
        Ok(())
    }

    async fn begin_pkce(&self) -> Result<String> {
        let verifier = pkce::generate_code_verifier()?;
        let challenge = pkce::code_challenge(&verifier);

        let mut persisted = self.storage.load().await?;
        persisted.code_verifier = Some(verifier);
        self.storage.save(&persisted).await?;

        Ok(challenge)
    }

    async fn exchange_code(&self, code: &str) -> Result<Session> {
        let verifier = self.storage.load().await?.code_verifier.ok_or_else(|| {
            AppError::Provider("No login in progress (missing PKCE verifier)".to_string())
        })?;

        let body = serde_json::json!({
            "auth_code": code,
            "code_verifier": verifier,
        });

        let response = self
            .client
            .request(Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "pkce")])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Code exchange request failed: {}", e)))?;

        let tokens: TokenResponse = check_json(response, AppError::Provider, "code exchange").await?;
        Ok(tokens.into_session())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let response = self
            .client
            .request(Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Token refresh request failed: {}", e)))?;

        // 4xx means the grant is dead; 429 and 5xx are worth retrying later
        let status = response.status();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, detail = %detail, "Token refresh rejected");
            return Err(AppError::Provider(AppError::REFRESH_REJECTED.to_string()));
        }

        let tokens: TokenResponse = check_json(response, AppError::Provider, "token refresh").await?;
        Ok(tokens.into_session())
    }

    async fn fetch_user(&self, access_token: &str) -> Result<AuthUser> {
        let response = self
            .client
            .request(Method::GET, "/auth/v1/user", Some(access_token))
            .send()
            .await
            .map_err(|e| AppError::Provider(e.to_string()))?;

        check_json(response, AppError::Provider, "user lookup").await
    }

    async fn store_session(&self, session: &Session) -> Result<()> {
        self.storage
            .save(&PersistedAuth {
                session: Some(session.clone()),
                code_verifier: None,
            })
            .await
    }
}

impl<S: SessionStorage> IdentityProvider for RestIdentityProvider<S> {
    async fn get_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.storage.load().await?.session else {
            return Ok(None);
        };
        if !session.expires_within(TOKEN_REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we were waiting
        let Some(session) = self.storage.load().await?.session else {
            return Ok(None);
        };
        if !session.expires_within(TOKEN_REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        tracing::info!(user_id = %session.user.id, "Access token expiring, refreshing");

        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                self.store_session(&fresh).await?;
                Ok(Some(fresh))
            }
            // The grant itself was rejected: the persisted session is dead
            Err(e) if e.is_refresh_rejected() => {
                tracing::warn!(user_id = %session.user.id, "Refresh token rejected, dropping session");
                self.storage.clear().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_session(&self, credential: Credential) -> Result<Session> {
        tracing::debug!(kind = credential.kind(), "Resolving session from credential");

        let session = match credential {
            Credential::Code(code) => self.exchange_code(&code).await?,
            Credential::Tokens {
                access_token,
                refresh_token,
            } => {
                let user = self.fetch_user(&access_token).await?;
                let expires_at = access_token_expiry(&access_token)
                    .unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_TOKEN_TTL_SECS));
                Session {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                }
            }
            Credential::RefreshToken(token) => self.refresh(&token).await?,
        };

        self.store_session(&session).await?;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let persisted = self.storage.load().await?;
        // Local state goes first so a network failure can't resurrect the session
        self.storage.clear().await?;

        let Some(session) = persisted.session else {
            return Ok(());
        };

        let response = self
            .client
            .request(Method::POST, "/auth/v1/logout", Some(&session.access_token))
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Logout request failed: {}", e)))?;

        check_empty(response, AppError::Provider, "logout").await
    }
}

// ─── Row Store ────────────────────────────────────────────────────────

/// Row store speaking the `/rest/v1` API with the signed-in user's token.
pub struct RestRowStore<S> {
    client: RestClient,
    auth: Arc<RestIdentityProvider<S>>,
}

impl<S: SessionStorage> RestRowStore<S> {
    pub fn new(auth: Arc<RestIdentityProvider<S>>) -> Self {
        Self {
            client: auth.client().clone(),
            auth,
        }
    }

    /// Request authorized as the current user (anon key when signed out).
    async fn authed(&self, method: Method, table: &str) -> Result<RequestBuilder> {
        let token = self
            .auth
            .get_session()
            .await?
            .map(|s| s.access_token);
        Ok(self
            .client
            .request(method, &format!("/rest/v1/{}", table), token.as_deref()))
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &'static str,
        column: &str,
        value: &str,
    ) -> Result<Option<T>> {
        let response = self
            .authed(Method::GET, table)
            .await?
            .query(&[("select", "*".to_string()), (column, eq(value))])
            .send()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let rows: Vec<T> = check_json(response, AppError::Database, table).await?;
        Ok(rows.into_iter().next())
    }
}

/// PostgREST equality filter.
fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

fn first_row<T>(rows: Vec<T>, what: &str) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| AppError::Database(format!("{} returned no row", what)))
}

impl<S: SessionStorage> RowStore for RestRowStore<S> {
    async fn find_profile(&self, id: &str) -> Result<Option<Profile>> {
        self.select_one(tables::PROFILES, "id", id).await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let response = self
            .authed(Method::POST, tables::PROFILES)
            .await?
            .header("Prefer", "return=representation")
            .json(profile)
            .send()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let rows: Vec<Profile> = check_json(response, AppError::Database, "profile insert").await?;
        first_row(rows, "profile insert")
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<Profile> {
        let mut body = serde_json::to_value(update).map_err(|e| AppError::Internal(e.into()))?;
        if let Some(map) = body.as_object_mut() {
            map.insert("updated_at".to_string(), serde_json::json!(Utc::now()));
        }

        let response = self
            .authed(Method::PATCH, tables::PROFILES)
            .await?
            .query(&[("id", eq(id))])
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let rows: Vec<Profile> = check_json(response, AppError::Database, "profile update").await?;
        first_row(rows, "profile update")
    }

    async fn find_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>> {
        self.select_one(tables::USER_CONSENT, "user_id", user_id)
            .await
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> Result<()> {
        let response = self
            .authed(Method::POST, tables::USER_CONSENT)
            .await?
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record)
            .send()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        check_empty(response, AppError::Database, "consent upsert").await
    }
}
