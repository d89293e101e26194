// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication callback and logout routes.

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{IdentityProvider, RowStore};
use crate::credentials::CallbackInput;
use crate::error::{AppError, Result};
use crate::services::{CallbackOutcome, CallbackState};
use crate::AppState;

pub fn routes<P: IdentityProvider, R: RowStore>() -> Router<Arc<AppState<P, R>>> {
    Router::new()
        .route(
            "/auth/callback",
            get(callback_from_url::<P, R>).post(callback_from_params::<P, R>),
        )
        .route("/auth/logout", post(logout::<P, R>))
}

/// Body for the structured callback shape.
///
/// Apps that receive the redirect themselves post the parsed parameters,
/// the full URL (so `#fragment` tokens survive), or both.
#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub params: Option<HashMap<String, String>>,
}

impl CallbackRequest {
    fn into_input(self) -> Result<CallbackInput> {
        match (self.url, self.params) {
            (Some(url), Some(params)) => Ok(CallbackInput::Both { url, params }),
            (Some(url), None) => Ok(CallbackInput::Url(url)),
            (None, Some(params)) => Ok(CallbackInput::Params(params)),
            (None, None) => Err(AppError::BadRequest(
                "Callback needs a url or params".to_string(),
            )),
        }
    }
}

/// Redirect target for login links: the credential is in the query string.
async fn callback_from_url<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
    uri: Uri,
) -> impl IntoResponse {
    let url = format!("http://127.0.0.1:{}{}", state.config.callback_port, uri);
    outcome_response(state.callback.handle(CallbackInput::Url(url)).await)
}

async fn callback_from_params<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
    Json(body): Json<CallbackRequest>,
) -> Result<impl IntoResponse> {
    let input = body.into_input()?;
    Ok(outcome_response(state.callback.handle(input).await))
}

fn outcome_response(outcome: CallbackOutcome) -> (StatusCode, Json<CallbackOutcome>) {
    let status = match outcome.state {
        CallbackState::Succeeded { .. } => StatusCode::OK,
        CallbackState::Failed { .. } => StatusCode::UNAUTHORIZED,
        _ => StatusCode::CONFLICT,
    };
    (status, Json(outcome))
}

/// Sign out and reset the consent gate.
async fn logout<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
) -> StatusCode {
    state.sign_out().await;
    StatusCode::NO_CONTENT
}
