// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session and consent middleware.

use crate::backend::{IdentityProvider, RowStore};
use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Middleware that requires a signed-in identity.
///
/// The [`Identity`](crate::models::Identity) is inserted into request
/// extensions for handlers.
pub async fn require_session<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = state
        .sessions
        .current_identity()
        .ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Middleware that keeps every gated route closed until consent is clear.
///
/// Runs the gate check on each request; the gate itself skips the lookup
/// once it is clear for the current user.
pub async fn require_consent<P: IdentityProvider, R: RowStore>(
    State(state): State<Arc<AppState<P, R>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let gate = state.consent.check().await;
    if !gate.allows_access() {
        tracing::debug!(state = ?gate, path = %request.uri().path(), "Request held at consent gate");
        return Err(match gate {
            crate::services::GateState::Unauthenticated => AppError::Unauthorized,
            _ => AppError::ConsentRequired,
        });
    }

    Ok(next.run(request).await)
}
