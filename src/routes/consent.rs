// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consent gate routes.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::backend::{IdentityProvider, RowStore};
use crate::error::Result;
use crate::services::{ConsentChoice, GateState};
use crate::AppState;

pub fn routes<P: IdentityProvider, R: RowStore>() -> Router<Arc<AppState<P, R>>> {
    Router::new()
        .route("/consent", get(get_consent::<P, R>))
        .route("/consent/accept", post(accept::<P, R>))
        .route("/consent/decline", post(decline::<P, R>))
}

#[derive(Debug, Serialize)]
pub struct ConsentResponse {
    #[serde(flatten)]
    pub gate: GateState,
    pub required_version: String,
}

/// Current gate state, checking the record if needed.
async fn get_consent<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
) -> Json<ConsentResponse> {
    let gate = state.consent.check().await;
    Json(ConsentResponse {
        gate,
        required_version: state.consent.required_version().to_string(),
    })
}

async fn accept<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
    Json(choice): Json<ConsentChoice>,
) -> Result<Json<ConsentResponse>> {
    let gate = state.consent.accept(choice).await?;
    Ok(Json(ConsentResponse {
        gate,
        required_version: state.consent.required_version().to_string(),
    }))
}

/// Decline the terms: signs out and shuts the app down.
async fn decline<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
) -> Json<ConsentResponse> {
    let gate = state.consent.decline().await;
    Json(ConsentResponse {
        gate,
        required_version: state.consent.required_version().to_string(),
    })
}
