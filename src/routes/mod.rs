// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod activity;

use crate::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Root response shown to anyone poking the server directly.
async fn root() -> &'static str {
    "Sugar Glance — your glucose, live on your Lock Screen."
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(activity::routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Outermost so probes are answered before the trace layer logs them
        .layer(axum::middleware::from_fn(
            crate::middleware::bot_filter::reject_bot_probes,
        ))
        .with_state(state)
}
