// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login initiation routes (HTTP backend only).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::backend::{RestIdentityProvider, RowStore, SessionStorage};
use crate::error::{AppError, Result};
use crate::AppState;

type RestState<S, R> = Arc<AppState<RestIdentityProvider<S>, R>>;

pub fn routes<S: SessionStorage, R: RowStore>() -> Router<RestState<S, R>> {
    Router::new()
        .route("/auth/magic-link", post(magic_link::<S, R>))
        .route("/auth/login/{provider}", get(oauth_login::<S, R>))
}

#[derive(Debug, Deserialize, Validate)]
pub struct MagicLinkRequest {
    #[validate(email)]
    pub email: String,
}

/// Send a sign-in link; the user finishes at `/auth/callback`.
async fn magic_link<S: SessionStorage, R: RowStore>(
    State(state): State<RestState<S, R>>,
    Json(body): Json<MagicLinkRequest>,
) -> Result<StatusCode> {
    body.validate()
        .map_err(|_| AppError::BadRequest("Invalid e-mail address".to_string()))?;

    state
        .sessions
        .provider()
        .send_magic_link(body.email.trim())
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Start an OAuth login - redirect to the provider's consent page.
async fn oauth_login<S: SessionStorage, R: RowStore>(
    State(state): State<RestState<S, R>>,
    Path(provider): Path<String>,
) -> Result<Redirect> {
    if provider.is_empty() || !provider.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::BadRequest(format!(
            "Unknown OAuth provider: {}",
            provider
        )));
    }

    let url = state.sessions.provider().authorize_url(&provider).await?;
    Ok(Redirect::temporary(&url))
}
