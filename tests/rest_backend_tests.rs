// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP backend tests against an in-process stub server.

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chat_auth::backend::{
    Credential, IdentityProvider, MemorySessionStorage, PersistedAuth, RestClient,
    RestIdentityProvider, RestRowStore, RowStore, SessionStorage,
};
use chat_auth::config::Config;
use chat_auth::credentials::CallbackInput;
use chat_auth::models::{AuthUser, ConsentRecord, NewProfile, Session};
use chat_auth::services::{ConsentChoice, GateState, Route};
use chat_auth::AppState;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

mod common;
use common::params;

const ANON_KEY: &str = "anon-key";

#[derive(Default)]
struct Stub {
    profiles: Mutex<Vec<Value>>,
    consent: Mutex<HashMap<String, Value>>,
    /// (Prefer header, on_conflict) of each consent upsert
    consent_writes: Mutex<Vec<(String, String)>>,
    bearers: Mutex<Vec<String>>,
    logouts: Mutex<usize>,
}

fn user_json() -> Value {
    json!({ "id": "u1", "email": "jane@x.com", "user_metadata": {} })
}

fn grant(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 3600,
        "user": user_json(),
    })
}

fn bad_grant(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_grant", "error_description": description })),
    )
        .into_response()
}

async fn require_apikey(State(stub): State<Arc<Stub>>, request: Request, next: Next) -> Response {
    if request.headers().get("apikey").and_then(|v| v.to_str().ok()) != Some(ANON_KEY) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "No API key found" })))
            .into_response();
    }
    if let Some(bearer) = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        stub.bearers.lock().unwrap().push(bearer.to_string());
    }
    next.run(request).await
}

async fn token(
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    match query.get("grant_type").map(String::as_str) {
        Some("pkce") => {
            let verifier_ok = body["code_verifier"].as_str().is_some_and(|v| v.len() >= 43);
            if body["auth_code"] == "good-code" && verifier_ok {
                Json(grant("at-1", "rt-1")).into_response()
            } else {
                bad_grant("invalid flow state")
            }
        }
        Some("refresh_token") => {
            if body["refresh_token"] == "rt-1" {
                Json(grant("at-2", "rt-2")).into_response()
            } else if body["refresh_token"] == "rt-upstream-down" {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "message": "upstream returned HTTP 404" })),
                )
                    .into_response()
            } else {
                bad_grant("Invalid Refresh Token: Refresh Token Not Found")
            }
        }
        _ => bad_grant("unsupported grant_type"),
    }
}

async fn user(headers: HeaderMap) -> Response {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer at-implicit") => Json(user_json()).into_response(),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid JWT" }))).into_response(),
    }
}

async fn logout(State(stub): State<Arc<Stub>>) -> StatusCode {
    *stub.logouts.lock().unwrap() += 1;
    StatusCode::NO_CONTENT
}

async fn otp(Query(query): Query<HashMap<String, String>>, Json(body): Json<Value>) -> Response {
    if query.contains_key("redirect_to") && body["email"].is_string() {
        Json(json!({})).into_response()
    } else {
        bad_grant("missing email")
    }
}

fn filter_value(query: &HashMap<String, String>, column: &str) -> Option<String> {
    query
        .get(column)
        .and_then(|v| v.strip_prefix("eq."))
        .map(str::to_string)
}

async fn list_profiles(
    State(stub): State<Arc<Stub>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let id = filter_value(&query, "id");
    let rows = stub.profiles.lock().unwrap();
    Json(
        rows.iter()
            .filter(|row| id.as_deref().map_or(true, |id| row["id"] == id))
            .cloned()
            .collect(),
    )
}

async fn insert_profile(State(stub): State<Arc<Stub>>, Json(row): Json<Value>) -> Response {
    let mut rows = stub.profiles.lock().unwrap();
    if rows
        .iter()
        .any(|r| r["id"] == row["id"] || r["username"] == row["username"])
    {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"profiles_pkey\""
            })),
        )
            .into_response();
    }
    let mut stored = row.clone();
    stored["preferred_emoji"] = Value::Null;
    rows.push(stored.clone());
    (StatusCode::CREATED, Json(vec![stored])).into_response()
}

async fn update_profile(
    State(stub): State<Arc<Stub>>,
    Query(query): Query<HashMap<String, String>>,
    Json(patch): Json<Value>,
) -> Json<Vec<Value>> {
    let id = filter_value(&query, "id");
    let mut rows = stub.profiles.lock().unwrap();
    let mut updated = Vec::new();
    for row in rows.iter_mut().filter(|r| id.as_deref() == r["id"].as_str()) {
        if let Some(fields) = patch.as_object() {
            for (k, v) in fields {
                row[k] = v.clone();
            }
        }
        updated.push(row.clone());
    }
    Json(updated)
}

async fn list_consent(
    State(stub): State<Arc<Stub>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let user_id = filter_value(&query, "user_id").unwrap_or_default();
    let records = stub.consent.lock().unwrap();
    Json(records.get(&user_id).cloned().into_iter().collect())
}

async fn upsert_consent(
    State(stub): State<Arc<Stub>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(record): Json<Value>,
) -> StatusCode {
    let prefer = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let on_conflict = query.get("on_conflict").cloned().unwrap_or_default();
    stub.consent_writes.lock().unwrap().push((prefer, on_conflict));

    let user_id = record["user_id"].as_str().unwrap_or_default().to_string();
    stub.consent.lock().unwrap().insert(user_id, record);
    StatusCode::CREATED
}

/// Start the stub backend on an ephemeral port.
async fn start_stub() -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub::default());

    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/user", get(user))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/otp", post(otp))
        .route(
            "/rest/v1/profiles",
            get(list_profiles).post(insert_profile).patch(update_profile),
        )
        .route("/rest/v1/user_consent", get(list_consent).post(upsert_consent))
        .layer(middleware::from_fn_with_state(stub.clone(), require_apikey))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), stub)
}

fn provider(base_url: &str, storage: MemorySessionStorage) -> RestIdentityProvider<MemorySessionStorage> {
    RestIdentityProvider::new(
        RestClient::new(base_url, ANON_KEY),
        storage,
        "http://127.0.0.1:54321/auth/callback",
    )
}

fn session(access: &str, refresh: &str, expires_in_secs: i64) -> Session {
    Session {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        user: AuthUser::new("u1").with_email("jane@x.com"),
    }
}

#[tokio::test]
async fn test_pkce_code_exchange() {
    let (base_url, _) = start_stub().await;
    let storage = MemorySessionStorage::new();
    let provider = provider(&base_url, storage.clone());

    let url = provider.authorize_url("github").await.unwrap();
    assert!(url.starts_with(&format!("{}/auth/v1/authorize?", base_url)));
    assert!(url.contains("provider=github"));
    assert!(url.contains("code_challenge_method=s256"));
    assert!(storage.load().await.unwrap().code_verifier.is_some());

    let session = provider
        .resolve_session(Credential::Code("good-code".to_string()))
        .await
        .unwrap();
    assert_eq!(session.access_token, "at-1");
    assert_eq!(session.user.id, "u1");

    // Verifier is single-use; the session is persisted
    let persisted = storage.load().await.unwrap();
    assert!(persisted.code_verifier.is_none());
    assert_eq!(persisted.session, Some(session));
}

#[tokio::test]
async fn test_code_without_login_in_progress() {
    let (base_url, _) = start_stub().await;
    let provider = provider(&base_url, MemorySessionStorage::new());

    let err = provider
        .resolve_session(Credential::Code("good-code".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_implicit_tokens_fetch_user() {
    let (base_url, _) = start_stub().await;
    let provider = provider(&base_url, MemorySessionStorage::new());

    let session = provider
        .resolve_session(Credential::Tokens {
            access_token: "at-implicit".to_string(),
            refresh_token: "rt-implicit".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(session.user.email.as_deref(), Some("jane@x.com"));

    let rejected = provider
        .resolve_session(Credential::Tokens {
            access_token: "forged".to_string(),
            refresh_token: "rt".to_string(),
        })
        .await;
    assert!(rejected.is_err());
}

#[tokio::test]
async fn test_get_session_refreshes_near_expiry() {
    let (base_url, _) = start_stub().await;
    let storage = MemorySessionStorage::new();
    storage
        .save(&PersistedAuth {
            session: Some(session("at-1", "rt-1", 30)),
            code_verifier: None,
        })
        .await
        .unwrap();
    let provider = provider(&base_url, storage.clone());

    let refreshed = provider.get_session().await.unwrap().unwrap();
    assert_eq!(refreshed.access_token, "at-2");
    assert_eq!(
        storage.load().await.unwrap().session.unwrap().refresh_token,
        "rt-2"
    );
}

#[tokio::test]
async fn test_rejected_refresh_drops_session() {
    let (base_url, _) = start_stub().await;
    let storage = MemorySessionStorage::new();
    storage
        .save(&PersistedAuth {
            session: Some(session("at-old", "rt-revoked", -10)),
            code_verifier: None,
        })
        .await
        .unwrap();
    let provider = provider(&base_url, storage.clone());

    assert!(provider.get_session().await.unwrap().is_none());
    assert!(storage.load().await.unwrap().session.is_none());
}

#[tokio::test]
async fn test_server_error_on_refresh_keeps_session() {
    let (base_url, _) = start_stub().await;
    let storage = MemorySessionStorage::new();
    storage
        .save(&PersistedAuth {
            session: Some(session("at-old", "rt-upstream-down", -10)),
            code_verifier: None,
        })
        .await
        .unwrap();
    let provider = provider(&base_url, storage.clone());

    // The 503 body mentions a 4xx; only the status decides
    let err = provider.get_session().await.unwrap_err();
    assert!(err.is_transient());
    assert!(!err.is_refresh_rejected());
    assert_eq!(
        storage.load().await.unwrap().session.unwrap().refresh_token,
        "rt-upstream-down"
    );
}

#[tokio::test]
async fn test_unreachable_backend_is_transient() {
    let storage = MemorySessionStorage::new();
    storage
        .save(&PersistedAuth {
            session: Some(session("at-1", "rt-1", -10)),
            code_verifier: None,
        })
        .await
        .unwrap();
    // Nothing listens on the discard port
    let provider = provider("http://127.0.0.1:9", storage.clone());

    let err = provider.get_session().await.unwrap_err();
    assert!(err.is_transient());
    // A network failure is not a rejection; the session is kept for later
    assert!(storage.load().await.unwrap().session.is_some());
}

#[tokio::test]
async fn test_sign_out_posts_logout_and_clears() {
    let (base_url, stub) = start_stub().await;
    let storage = MemorySessionStorage::new();
    storage
        .save(&PersistedAuth {
            session: Some(session("at-1", "rt-1", 3600)),
            code_verifier: None,
        })
        .await
        .unwrap();
    let provider = provider(&base_url, storage.clone());

    provider.sign_out().await.unwrap();

    assert_eq!(*stub.logouts.lock().unwrap(), 1);
    assert!(stub.bearers.lock().unwrap().contains(&"at-1".to_string()));
    assert!(storage.load().await.unwrap().session.is_none());
}

#[tokio::test]
async fn test_magic_link() {
    let (base_url, _) = start_stub().await;
    let storage = MemorySessionStorage::new();
    let provider = provider(&base_url, storage.clone());

    provider.send_magic_link("jane@x.com").await.unwrap();
    assert!(storage.load().await.unwrap().code_verifier.is_some());
}

#[tokio::test]
async fn test_profile_insert_conflict() {
    let (base_url, _) = start_stub().await;
    let store = RestRowStore::new(Arc::new(provider(&base_url, MemorySessionStorage::new())));

    let created = store
        .insert_profile(&NewProfile::new("u1", "jane"))
        .await
        .unwrap();
    assert_eq!(created.username, "jane");

    let err = store
        .insert_profile(&NewProfile::new("u1", "jane"))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());

    let found = store.find_profile("u1").await.unwrap();
    assert_eq!(found, Some(created));
    assert!(store.find_profile("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_consent_upsert_merges_on_user_id() {
    let (base_url, stub) = start_stub().await;
    let store = RestRowStore::new(Arc::new(provider(&base_url, MemorySessionStorage::new())));

    store
        .upsert_consent(&ConsentRecord::accepted("u1", "1.0"))
        .await
        .unwrap();
    let record = store.find_consent("u1").await.unwrap().unwrap();
    assert!(record.satisfies("1.0"));

    let writes = stub.consent_writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].0.contains("resolution=merge-duplicates"));
    assert_eq!(writes[0].1, "user_id");
}

#[tokio::test]
async fn test_full_login_over_http() {
    let (base_url, stub) = start_stub().await;
    let provider = Arc::new(provider(&base_url, MemorySessionStorage::new()));
    let store = Arc::new(RestRowStore::new(provider.clone()));

    let mut config = Config::test_default();
    config.backend_url = base_url;
    config.callback_settle_delay = std::time::Duration::ZERO;
    config.callback_error_delay = std::time::Duration::ZERO;
    let state = AppState::new(config, provider.clone(), store);

    provider.authorize_url("github").await.unwrap();
    let outcome = state
        .callback
        .handle(CallbackInput::Params(params(&[("code", "good-code")])))
        .await;
    assert_eq!(outcome.redirect, Some(Route::Landing));

    // Row requests run as the signed-in user
    assert!(stub.bearers.lock().unwrap().contains(&"at-1".to_string()));
    assert_eq!(stub.profiles.lock().unwrap()[0]["username"], "jane");

    assert!(state.consent.check().await.intercepts_input());
    assert_eq!(
        state.consent.accept(ConsentChoice::both()).await.unwrap(),
        GateState::Clear
    );
}
