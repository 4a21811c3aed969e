//! APNs transport for Live Activity updates, end events and silent
//! widget refreshes.
//!
//! Pushes go over HTTP/2 with a provider JWT (ES256) minted from the
//! configured key and cached for just under Apple's one-hour ceiling.
//! Without signing material the gateway logs and skips every send, so
//! the rest of the engine keeps cycling.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::ApnsConfig;
use crate::error::AppError;
use crate::models::{Environment, GlucoseReading};
use crate::redact;
use crate::services::alert::AlertContent;

/// Bundle id of the mobile app; APNs topic for every push.
pub const BUNDLE_ID: &str = "com.sugarglance.app";

/// Hard deadline on every APNs call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Apple allows provider tokens up to an hour; re-mint before that.
const TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);

/// Errors surfaced to callers. Only token rejections that are terminal
/// for the device come back; everything else is logged and swallowed
/// so the next cycle retries on its own cadence.
#[derive(Debug, thiserror::Error)]
pub enum ApnsError {
    #[error("Device token rejected: {reason}")]
    TerminalToken { reason: String },
}

/// APNs reasons that mean the device is gone for good.
fn is_terminal_reason(reason: &str) -> bool {
    matches!(reason, "BadDeviceToken" | "Unregistered" | "ExpiredToken")
}

/// Compact Live Activity content state: current reading, history, and
/// an optional session-expired marker on the final end event.
#[derive(Debug, Clone, Serialize)]
pub struct ContentState {
    #[serde(rename = "c")]
    pub current: Option<GlucoseReading>,
    #[serde(rename = "h")]
    pub history: Vec<HistoryPoint>,
    #[serde(rename = "se", skip_serializing_if = "Option::is_none")]
    pub session_expired: Option<bool>,
}

/// One history sample: timestamp and value only.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    #[serde(rename = "t", with = "chrono::serde::ts_seconds")]
    pub t: DateTime<Utc>,
    #[serde(rename = "v")]
    pub v: i16,
}

impl ContentState {
    /// State for a regular update: latest reading plus the full window.
    pub fn update(latest: &GlucoseReading, history: &[GlucoseReading]) -> Self {
        Self {
            current: Some(latest.clone()),
            history: history
                .iter()
                .map(|r| HistoryPoint {
                    t: r.date,
                    v: r.value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
                })
                .collect(),
            session_expired: None,
        }
    }

    /// State for the final end event.
    pub fn end() -> Self {
        Self {
            current: None,
            history: Vec::new(),
            session_expired: Some(true),
        }
    }
}

/// Outbound push transport.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Send a Live Activity content-state update, optionally with an alert.
    async fn send_update(
        &self,
        environment: Environment,
        push_token: &str,
        state: &ContentState,
        alert: Option<&AlertContent>,
        stale_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ApnsError>;

    /// Send the final end event for a Live Activity.
    async fn send_end(&self, environment: Environment, push_token: &str) -> Result<(), ApnsError>;

    /// Send a silent background push that refreshes the widget timeline.
    async fn send_widget_refresh(
        &self,
        environment: Environment,
        push_token: &str,
    ) -> Result<(), ApnsError>;
}

/// JWT-credentialed APNs client, one signing state per process.
pub struct ApnsClient {
    http: reqwest::Client,
    signer: Option<TokenSigner>,
}

struct TokenSigner {
    encoding_key: EncodingKey,
    key_id: String,
    team_id: String,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    minted_at: Instant,
}

#[derive(Serialize)]
struct ProviderClaims<'a> {
    iss: &'a str,
    iat: i64,
}

impl ApnsClient {
    /// Build the client; `config` of None disables sending.
    pub fn new(config: Option<&ApnsConfig>) -> Result<Self, AppError> {
        let signer = match config {
            Some(config) => {
                let encoding_key = EncodingKey::from_ec_pem(config.key_pem.as_bytes())
                    .map_err(|e| {
                        AppError::Internal(anyhow::anyhow!("Invalid APNs signing key: {}", e))
                    })?;
                Some(TokenSigner {
                    encoding_key,
                    key_id: config.key_id.clone(),
                    team_id: config.team_id.clone(),
                    cached: Mutex::new(None),
                })
            }
            None => None,
        };

        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            signer,
        })
    }

    fn host(environment: Environment) -> &'static str {
        match environment {
            Environment::Development => "https://api.sandbox.push.apple.com",
            Environment::Production => "https://api.push.apple.com",
        }
    }

    /// Send one push; non-terminal failures are logged and swallowed.
    async fn post(
        &self,
        environment: Environment,
        push_token: &str,
        push_type: &str,
        topic: &str,
        priority: &str,
        expiration: i64,
        payload: &Value,
    ) -> Result<(), ApnsError> {
        let Some(signer) = &self.signer else {
            tracing::info!("APNs credentials not configured, skipping push");
            return Ok(());
        };

        let bearer = match signer.bearer_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "Failed to mint APNs provider token");
                return Ok(());
            }
        };

        let url = format!("{}/3/device/{}", Self::host(environment), push_token);
        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .header("apns-push-type", push_type)
            .header("apns-topic", topic)
            .header("apns-priority", priority)
            .header("apns-expiration", expiration.to_string())
            .json(payload)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, push_type, "APNs request failed");
                return Ok(());
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let reason = rejection_reason(&body).unwrap_or_default();

        if is_terminal_reason(&reason) {
            return Err(ApnsError::TerminalToken { reason });
        }

        tracing::warn!(
            status = status.as_u16(),
            reason = %reason,
            push_type,
            "APNs rejected push"
        );
        Ok(())
    }
}

impl TokenSigner {
    /// Current provider token, re-minted when the cached one ages out.
    fn bearer_token(&self) -> Result<String, jsonwebtoken::errors::Error> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cached.as_ref() {
            if token.minted_at.elapsed() < TOKEN_LIFETIME {
                return Ok(token.token.clone());
            }
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = ProviderClaims {
            iss: &self.team_id,
            iat: Utc::now().timestamp(),
        };
        let token = jsonwebtoken::encode(&header, &claims, &self.encoding_key)?;
        *cached = Some(CachedToken {
            token: token.clone(),
            minted_at: Instant::now(),
        });
        Ok(token)
    }
}

/// APNs error envelope: `{"reason": "..."}`.
fn rejection_reason(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("reason")?
        .as_str()
        .map(str::to_string)
}

/// Payload for a Live Activity update event.
fn update_payload(
    state: &ContentState,
    alert: Option<&AlertContent>,
    stale_date: DateTime<Utc>,
    timestamp: DateTime<Utc>,
) -> Value {
    let mut aps = json!({
        "timestamp": timestamp.timestamp(),
        "event": "update",
        "content-state": state,
        "stale-date": stale_date.timestamp(),
    });
    if let Some(alert) = alert {
        aps["alert"] = json!({
            "title": alert.title,
            "body": alert.body,
        });
    }
    json!({ "aps": aps })
}

/// Payload for the final Live Activity end event.
fn end_payload(timestamp: DateTime<Utc>) -> Value {
    json!({
        "aps": {
            "timestamp": timestamp.timestamp(),
            "event": "end",
            "content-state": ContentState::end(),
        }
    })
}

#[async_trait]
impl PushGateway for ApnsClient {
    async fn send_update(
        &self,
        environment: Environment,
        push_token: &str,
        state: &ContentState,
        alert: Option<&AlertContent>,
        stale_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ApnsError> {
        let payload = update_payload(state, alert, stale_date, timestamp);
        tracing::debug!(
            device = %redact::identifier(push_token),
            alert = alert.is_some(),
            "Sending Live Activity update"
        );
        self.post(
            environment,
            push_token,
            "liveactivity",
            &format!("{BUNDLE_ID}.push-type.liveactivity"),
            "10",
            stale_date.timestamp(),
            &payload,
        )
        .await
    }

    async fn send_end(&self, environment: Environment, push_token: &str) -> Result<(), ApnsError> {
        let now = Utc::now();
        let payload = end_payload(now);
        self.post(
            environment,
            push_token,
            "liveactivity",
            &format!("{BUNDLE_ID}.push-type.liveactivity"),
            "10",
            now.timestamp() + 60,
            &payload,
        )
        .await
    }

    async fn send_widget_refresh(
        &self,
        environment: Environment,
        push_token: &str,
    ) -> Result<(), ApnsError> {
        let payload = json!({ "aps": { "content-available": 1 } });
        self.post(
            environment,
            push_token,
            "background",
            BUNDLE_ID,
            "5",
            Utc::now().timestamp() + 3600,
            &payload,
        )
        .await
    }
}
