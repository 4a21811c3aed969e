//! Dexcom Share API client for fetching glucose readings.
//!
//! Handles:
//! - Reading fetch over an existing session
//! - Account authentication and session login when the session is
//!   missing or rejected, surfacing the refreshed handles
//! - Error classification (hard account errors, decode errors with
//!   status, transport errors)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::{AccountLocation, GlucoseReading, LiveActivityRecord, TrendDirection};
use crate::redact;

/// Publisher application id the Share API expects.
const APPLICATION_ID: &str = "d89443d2-327c-4a6f-89e5-496bbb0317db";

/// Hard deadline on every upstream call.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Errors surfaced to the activity processor.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Credentials invalid / account disabled / no way to log in.
    #[error("Upstream rejected the account: {0}")]
    Client(String),

    /// Response body could not be decoded; carries status and body for logs.
    #[error("Undecodable upstream response (HTTP {status})")]
    Decoding { status: u16, body: String },

    /// Network, timeout, 5xx.
    #[error("Upstream request failed: {0}")]
    Generic(String),
}

impl FetchError {
    /// 429s get a special one-minute cooldown in the processor.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Decoding { status: 429, .. })
    }
}

/// Result of one fetch: readings plus any refreshed session handles
/// the caller must persist.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Readings ordered by timestamp ascending.
    pub readings: Vec<GlucoseReading>,
    pub account_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
}

/// Source of glucose readings for an activity.
#[async_trait]
pub trait GlucoseSource: Send + Sync {
    /// Fetch readings within the record's duration window.
    async fn fetch(&self, record: &LiveActivityRecord) -> Result<FetchOutcome, FetchError>;
}

/// Dexcom Share client.
#[derive(Clone)]
pub struct DexcomClient {
    http: reqwest::Client,
}

impl Default for DexcomClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a read attempt over an existing session.
enum ReadError {
    /// The session id was rejected; a re-login may recover.
    SessionExpired,
    Fetch(FetchError),
}

impl DexcomClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn base_url(location: AccountLocation) -> &'static str {
        match location {
            AccountLocation::Us => "https://share2.dexcom.com",
            AccountLocation::Worldwide => "https://shareous1.dexcom.com",
        }
    }

    /// Authenticate the account, returning its account id.
    async fn authenticate(
        &self,
        location: AccountLocation,
        username: &str,
        password: &str,
    ) -> Result<Uuid, FetchError> {
        let url = format!(
            "{}/ShareWebServices/Services/General/AuthenticatePublisherAccount",
            Self::base_url(location)
        );
        let body = json!({
            "accountName": username,
            "password": password,
            "applicationId": APPLICATION_ID,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Generic(e.to_string()))?;

        let id = self.check_uuid_response(response).await?;
        tracing::debug!(account = %redact::identifier(&id.to_string()), "Authenticated account");
        Ok(id)
    }

    /// Log in by account id, returning a fresh session id.
    async fn login(
        &self,
        location: AccountLocation,
        account_id: Uuid,
        password: &str,
    ) -> Result<Uuid, FetchError> {
        let url = format!(
            "{}/ShareWebServices/Services/General/LoginPublisherAccountById",
            Self::base_url(location)
        );
        let body = json!({
            "accountId": account_id,
            "password": password,
            "applicationId": APPLICATION_ID,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Generic(e.to_string()))?;

        let session_id = self.check_uuid_response(response).await?;
        if session_id.is_nil() {
            // The API signals a refused login with the nil UUID.
            return Err(FetchError::Client("Login returned a nil session".to_string()));
        }
        Ok(session_id)
    }

    /// Read the latest glucose values over an existing session.
    async fn read_latest(
        &self,
        location: AccountLocation,
        session_id: Uuid,
        duration_seconds: u64,
    ) -> Result<Vec<GlucoseReading>, ReadError> {
        let minutes = duration_seconds.div_ceil(60).max(1);
        let max_count = (duration_seconds / 300).max(1);
        let url = format!(
            "{}/ShareWebServices/Services/Publisher/ReadPublisherLatestGlucoseValues?sessionId={}&minutes={}&maxCount={}",
            Self::base_url(location),
            session_id,
            minutes,
            max_count,
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| ReadError::Fetch(FetchError::Generic(e.to_string())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReadError::Fetch(FetchError::Generic(e.to_string())))?;

        if !status.is_success() {
            if let Some(code) = error_code(&body) {
                if matches!(code.as_str(), "SessionIdNotFound" | "SessionNotValid") {
                    return Err(ReadError::SessionExpired);
                }
            }
            return Err(ReadError::Fetch(classify_http_error(status.as_u16(), body)));
        }

        let wire: Vec<ShareReading> = serde_json::from_str(&body).map_err(|_| {
            ReadError::Fetch(FetchError::Decoding {
                status: status.as_u16(),
                body,
            })
        })?;

        let mut readings: Vec<GlucoseReading> = wire
            .into_iter()
            .filter_map(ShareReading::into_reading)
            .collect();
        readings.sort_by_key(|r| r.date);
        Ok(readings)
    }

    /// Parse a response whose body is a quoted UUID string.
    async fn check_uuid_response(&self, response: reqwest::Response) -> Result<Uuid, FetchError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Generic(e.to_string()))?;

        if !status.is_success() {
            if let Some(code) = error_code(&body) {
                if is_account_error(&code) {
                    return Err(FetchError::Client(code));
                }
            }
            return Err(classify_http_error(status.as_u16(), body));
        }

        serde_json::from_str::<Uuid>(&body).map_err(|_| FetchError::Decoding {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl GlucoseSource for DexcomClient {
    async fn fetch(&self, record: &LiveActivityRecord) -> Result<FetchOutcome, FetchError> {
        let location = record.account_location;

        // Happy path: ride the stored session.
        if let Some(session_id) = record.session_id {
            match self.read_latest(location, session_id, record.duration).await {
                Ok(readings) => {
                    return Ok(FetchOutcome {
                        readings,
                        ..FetchOutcome::default()
                    })
                }
                Err(ReadError::SessionExpired) => {
                    tracing::debug!(
                        activity = %redact::identifier(&record.id),
                        "Session rejected, re-logging in"
                    );
                }
                Err(ReadError::Fetch(e)) => return Err(e),
            }
        }

        let (Some(username), Some(password)) = (&record.username, &record.password) else {
            return Err(FetchError::Client(
                "No usable session and no credentials for re-login".to_string(),
            ));
        };

        let account_id = match record.account_id {
            Some(id) => id,
            None => self.authenticate(location, username, password).await?,
        };
        let session_id = self.login(location, account_id, password).await?;

        let readings = match self.read_latest(location, session_id, record.duration).await {
            Ok(readings) => readings,
            // A freshly minted session should not be rejected again.
            Err(ReadError::SessionExpired) => {
                return Err(FetchError::Client("Fresh session rejected".to_string()))
            }
            Err(ReadError::Fetch(e)) => return Err(e),
        };

        Ok(FetchOutcome {
            readings,
            account_id: Some(account_id),
            session_id: Some(session_id),
        })
    }
}

/// Share API error envelope: `{"Code": "...", "Message": "..."}`.
fn error_code(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ShareError {
        #[serde(rename = "Code")]
        code: String,
    }
    serde_json::from_str::<ShareError>(body).ok().map(|e| e.code)
}

/// Account-level codes that no retry will fix.
fn is_account_error(code: &str) -> bool {
    matches!(
        code,
        "AccountPasswordInvalid"
            | "SSO_AuthenticateAccountNotFound"
            | "SSO_AuthenticatePasswordInvalid"
            | "SSO_AuthenticateMaxAttemptsExceeed"
            | "AccountDisabled"
    )
}

fn classify_http_error(status: u16, body: String) -> FetchError {
    if status >= 500 {
        FetchError::Generic(format!("HTTP {status}"))
    } else {
        FetchError::Decoding { status, body }
    }
}

/// One reading as the Share API serializes it.
#[derive(Debug, Deserialize)]
struct ShareReading {
    /// Wall time as `/Date(ms)/`
    #[serde(rename = "WT")]
    wt: String,
    #[serde(rename = "Value")]
    value: f64,
    #[serde(rename = "Trend")]
    trend: TrendDirection,
}

impl ShareReading {
    fn into_reading(self) -> Option<GlucoseReading> {
        Some(GlucoseReading {
            date: parse_share_date(&self.wt)?,
            value: self.value.round() as i32,
            trend: self.trend,
        })
    }
}

/// Parse the Share API's `/Date(1640995200000)/` timestamp format.
/// Some responses carry a zone suffix (`/Date(1640995200000-0500)/`);
/// the milliseconds are UTC either way.
fn parse_share_date(raw: &str) -> Option<DateTime<Utc>> {
    let inner = raw.strip_prefix("/Date(")?.strip_suffix(")/")?;
    let millis_end = inner
        .char_indices()
        .find(|&(i, c)| i > 0 && !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(inner.len());
    let millis: i64 = inner[..millis_end].parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}
