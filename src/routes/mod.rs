// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers for the loopback listener.

pub mod api;
pub mod auth;
pub mod consent;
pub mod login;

use crate::backend::{IdentityProvider, RowStore};
use crate::middleware::{require_consent, require_session};
use crate::AppState;
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub authenticated: bool,
}

/// Health check response
async fn health_check<P: IdentityProvider, R: RowStore>(
    axum::extract::State(state): axum::extract::State<Arc<AppState<P, R>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        authenticated: state.sessions.is_authenticated(),
    })
}

/// Build the complete router with all routes.
pub fn create_router<P: IdentityProvider, R: RowStore>(state: Arc<AppState<P, R>>) -> Router {
    create_router_with(state, Router::new())
}

/// Build the router with backend-specific public routes merged in.
pub fn create_router_with<P: IdentityProvider, R: RowStore>(
    state: Arc<AppState<P, R>>,
    extra: Router<Arc<AppState<P, R>>>,
) -> Router {
    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/health", get(health_check::<P, R>))
        .merge(auth::routes())
        .merge(consent::routes())
        .merge(extra);

    // Gated routes (session and consent required; session checked first)
    let gated_routes = api::routes()
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_consent::<P, R>,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session::<P, R>,
        ));

    Router::new()
        .merge(public_routes)
        .merge(gated_routes)
        .layer(middleware::from_fn(
            crate::middleware::security::add_security_headers,
        ))
        .layer(
            TraceLayer::new_for_http()
                // Path only: callback query strings carry credentials
                .make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path()
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
