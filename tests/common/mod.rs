// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chat_auth::backend::{Credential, IdentityProvider, InMemoryIdentityProvider, InMemoryRowStore};
use chat_auth::config::Config;
use chat_auth::models::{AuthUser, Identity};
use chat_auth::routes::create_router;
use chat_auth::AppState;
use std::collections::HashMap;
use std::sync::Arc;

#[allow(dead_code)]
pub type TestState = AppState<InMemoryIdentityProvider, InMemoryRowStore>;

/// Check if a live backend is configured via environment variable.
#[allow(dead_code)]
pub fn backend_available() -> bool {
    std::env::var("CHAT_AUTH_TEST_BACKEND_URL").is_ok()
}

/// Skip test with message if no live backend is configured.
#[macro_export]
macro_rules! require_backend {
    () => {
        if !crate::common::backend_available() {
            eprintln!("⚠️  Skipping: CHAT_AUTH_TEST_BACKEND_URL not set");
            return;
        }
    };
}

/// Offline app wired to in-memory collaborators.
#[allow(dead_code)]
pub struct TestApp {
    pub state: Arc<TestState>,
    pub provider: Arc<InMemoryIdentityProvider>,
    pub store: Arc<InMemoryRowStore>,
}

/// Create a test app with in-memory backend and default config.
#[allow(dead_code)]
pub fn test_app() -> TestApp {
    test_app_with(Config::test_default(), Arc::new(InMemoryIdentityProvider::new()))
}

#[allow(dead_code)]
pub fn test_app_with(config: Config, provider: Arc<InMemoryIdentityProvider>) -> TestApp {
    let store = Arc::new(InMemoryRowStore::new());
    let state = Arc::new(AppState::new(config, provider.clone(), store.clone()));
    TestApp {
        state,
        provider,
        store,
    }
}

/// Create a test app and its router.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, TestApp) {
    let app = test_app();
    (create_router(app.state.clone()), app)
}

/// Sign `user` in through the provider and establish the session.
#[allow(dead_code)]
pub async fn sign_in(app: &TestApp, user: AuthUser) -> Identity {
    let code = format!("code-{}", user.id);
    app.provider.issue_code(code.clone(), user);
    let session = app
        .provider
        .resolve_session(Credential::Code(code))
        .await
        .expect("sign-in failed");
    app.state.sessions.establish_session(session)
}

#[allow(dead_code)]
pub fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not JSON")
}
