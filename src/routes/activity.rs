// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live Activity lifecycle and widget token routes.
//!
//! Bodies are parsed by hand from bytes so malformed JSON maps to a
//! plain 400 instead of an extractor-specific status.

use crate::error::{AppError, Result};
use crate::models::{
    AccountLocation, Environment, LiveActivityRecord, Preferences,
};
use crate::redact;
use crate::services::processor::{EndReason, MIN_POLL_INTERVAL};
use crate::AppState;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Live Activity routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start-live-activity", post(start))
        .route("/end-live-activity", post(end))
        .route("/register-widget-token", post(register_widget_token))
        .route("/unregister-widget-token", post(unregister_widget_token))
        // Bodies are tiny (<1KB), so 16KB is a safe conservative limit
        .layer(DefaultBodyLimit::max(16384))
}

/// Body of `POST /start-live-activity`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    push_token: String,
    environment: Environment,
    account_location: AccountLocation,
    /// History window in seconds
    duration: u64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(rename = "accountID", default)]
    account_id: Option<Uuid>,
    #[serde(rename = "sessionID", default)]
    session_id: Option<Uuid>,
    #[serde(default)]
    preferences: Option<Preferences>,
}

impl StartRequest {
    /// Stable activity identity: username when present, else the token.
    fn id(&self) -> String {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.push_token)
            .to_string()
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Register (or re-register) a Live Activity and schedule its first poll.
async fn start(State(state): State<Arc<AppState>>, body: Bytes) -> Result<StatusCode> {
    let request: StartRequest = parse_body(&body)?;

    if request.push_token.is_empty() {
        return Err(AppError::BadRequest("pushToken must not be empty".to_string()));
    }
    if request.duration == 0 {
        return Err(AppError::BadRequest("duration must be positive".to_string()));
    }

    let now = Utc::now();
    let id = request.id();
    let record = LiveActivityRecord {
        id: id.clone(),
        push_token: request.push_token,
        environment: request.environment,
        account_location: request.account_location,
        duration: request.duration,
        username: request.username,
        password: request.password,
        account_id: request.account_id,
        session_id: request.session_id,
        preferences: request.preferences,
        start_date: now,
        last_reading_date: None,
        last_reading: None,
        poll_interval: MIN_POLL_INTERVAL,
        retry_count: 0,
    };

    // A restart for the same id overwrites and polls immediately.
    state.store.put_record(&record).await?;
    state.store.schedule(&id, now.timestamp()).await?;

    tracing::info!(
        activity = %redact::identifier(&id),
        environment = record.environment.as_str(),
        duration = record.duration,
        "Live Activity started"
    );

    Ok(StatusCode::OK)
}

/// Body of `POST /end-live-activity`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndRequest {
    #[serde(default)]
    push_token: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Tear down a Live Activity; idempotent.
async fn end(State(state): State<Arc<AppState>>, body: Bytes) -> Result<StatusCode> {
    let request: EndRequest = parse_body(&body)?;

    let id = request
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .or(request.push_token.as_deref())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("either username or pushToken is required".to_string())
        })?;

    // An in-flight processor observes the missing record and stops.
    state.store.unschedule(id).await?;
    state.store.delete_record(id).await?;

    tracing::info!(
        activity = %redact::identifier(id),
        reason = %EndReason::ManualStop,
        "Live Activity ended"
    );

    Ok(StatusCode::OK)
}

/// Body of the widget token routes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WidgetTokenRequest {
    push_token: String,
    environment: Environment,
}

/// Add a device token to the widget refresh fan-out.
async fn register_widget_token(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode> {
    let request: WidgetTokenRequest = parse_body(&body)?;
    if request.push_token.is_empty() {
        return Err(AppError::BadRequest("pushToken must not be empty".to_string()));
    }

    state
        .store
        .add_widget_token(request.environment, &request.push_token)
        .await?;

    tracing::info!(
        device = %redact::identifier(&request.push_token),
        environment = request.environment.as_str(),
        "Widget token registered"
    );
    Ok(StatusCode::OK)
}

/// Remove a device token from the widget refresh fan-out.
async fn unregister_widget_token(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode> {
    let request: WidgetTokenRequest = parse_body(&body)?;

    state
        .store
        .remove_widget_token(request.environment, &request.push_token)
        .await?;

    Ok(StatusCode::OK)
}
