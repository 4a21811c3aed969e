// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bot-probe suppression middleware.
//!
//! Scanners hammer PHP paths constantly. Those requests get a bare 404
//! before the trace layer ever sees them, so they never reach the logs.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Whether a request path is a known PHP bot probe.
pub fn is_bot_probe(path: &str) -> bool {
    path.ends_with(".php") || path.contains(".php7") || path.contains(".php/")
}

/// Reject bot probes with a silent 404.
pub async fn reject_bot_probes(req: Request, next: Next) -> Response {
    if is_bot_probe(req.uri().path()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(req).await
}
