// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for signed-in users who passed the consent gate.

use crate::backend::{IdentityProvider, RowStore};
use crate::error::Result;
use crate::models::{Identity, Profile, ProfileUpdate};
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, patch},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// API routes. Session and consent middleware are applied in routes/mod.rs.
pub fn routes<P: IdentityProvider, R: RowStore>() -> Router<Arc<AppState<P, R>>> {
    Router::new()
        .route("/api/me", get(get_me::<P, R>))
        .route("/api/profile", patch(update_profile::<P, R>))
}

/// Current user response.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub identity: Identity,
    pub profile: Option<Profile>,
}

async fn get_me<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MeResponse>> {
    let profile = state.provisioner.load(&identity.id).await?;
    Ok(Json(MeResponse { identity, profile }))
}

async fn update_profile<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
    Extension(identity): Extension<Identity>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>> {
    let profile = state.provisioner.update(&identity, update).await?;
    Ok(Json(profile))
}
