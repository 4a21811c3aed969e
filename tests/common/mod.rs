// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use sugar_glance::config::Config;
use sugar_glance::db::StateStore;
use sugar_glance::models::{
    AccountLocation, Environment, GlucoseReading, GlucoseUnit, LiveActivityRecord, Preferences,
    TargetRange, TrendDirection,
};
use sugar_glance::services::alert::AlertContent;
use sugar_glance::services::apns::{ApnsError, ContentState, PushGateway};
use sugar_glance::services::dexcom::{FetchError, FetchOutcome, GlucoseSource};
use sugar_glance::services::processor::MIN_POLL_INTERVAL;
use sugar_glance::AppState;

/// Check if a Redis instance is available via environment variable.
pub fn redis_available() -> bool {
    std::env::var("REDIS_URL").is_ok()
}

/// Skip test with message if Redis is not available.
#[macro_export]
macro_rules! require_redis {
    () => {
        if !crate::common::redis_available() {
            eprintln!("⚠️  Skipping: REDIS_URL not set");
            return;
        }
    };
}

/// Create a test store connection.
pub async fn test_store() -> StateStore {
    let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for integration tests");
    StateStore::connect(&url)
        .await
        .expect("Failed to connect to Redis")
}

/// Build the full router over a test store.
pub fn create_test_app(store: StateStore) -> Router {
    let state = Arc::new(AppState {
        config: Config::default(),
        store,
    });
    sugar_glance::routes::create_router(state)
}

/// Unique id per test so shared Redis state never collides.
pub fn unique_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// A reading `age` seconds before `now`.
pub fn reading_at(now: DateTime<Utc>, age_seconds: i64, value: i32) -> GlucoseReading {
    GlucoseReading {
        date: now - Duration::seconds(age_seconds),
        value,
        trend: TrendDirection::Flat,
    }
}

/// A fresh activity record with sensible defaults.
pub fn test_record(id: &str, now: DateTime<Utc>) -> LiveActivityRecord {
    LiveActivityRecord {
        id: id.to_string(),
        push_token: format!("token-{id}"),
        environment: Environment::Development,
        account_location: AccountLocation::Us,
        duration: 21_600,
        username: None,
        password: None,
        account_id: None,
        session_id: None,
        preferences: Some(Preferences {
            target_range: TargetRange {
                lower: 70,
                upper: 180,
            },
            unit: GlucoseUnit::Mgdl,
        }),
        start_date: now,
        last_reading_date: None,
        last_reading: None,
        poll_interval: MIN_POLL_INTERVAL,
        retry_count: 0,
    }
}

/// Scripted glucose source: pops one queued response per fetch and
/// returns an empty outcome once the script runs out. Optionally
/// restricted to a single activity id so stray ids on a shared Redis
/// cannot eat the script.
#[derive(Default)]
pub struct MockSource {
    responses: Mutex<VecDeque<Result<FetchOutcome, FetchError>>>,
    only_for: Mutex<Option<String>>,
}

impl MockSource {
    pub fn queue(&self, response: Result<FetchOutcome, FetchError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn with_readings(readings: Vec<GlucoseReading>) -> Self {
        let source = Self::default();
        source.queue(Ok(FetchOutcome {
            readings,
            account_id: None,
            session_id: None,
        }));
        source
    }

    pub fn restrict_to(&self, id: &str) {
        *self.only_for.lock().unwrap() = Some(id.to_string());
    }
}

#[async_trait]
impl GlucoseSource for MockSource {
    async fn fetch(&self, record: &LiveActivityRecord) -> Result<FetchOutcome, FetchError> {
        if let Some(only) = self.only_for.lock().unwrap().as_deref() {
            if record.id != only {
                return Ok(FetchOutcome::default());
            }
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FetchOutcome::default()))
    }
}

/// One push observed by the recording gateway.
#[derive(Debug, Clone)]
pub enum SentPush {
    Update {
        token: String,
        state: serde_json::Value,
        alert: Option<(String, String)>,
    },
    End {
        token: String,
    },
    Widget {
        environment: Environment,
        token: String,
    },
}

/// Gateway double that records every push and can be told to reject
/// update pushes with a terminal token error.
#[derive(Default)]
pub struct RecordingGateway {
    pushes: Mutex<Vec<SentPush>>,
    terminal_reason: Mutex<Option<String>>,
    widget_terminal_tokens: Mutex<Vec<String>>,
}

impl RecordingGateway {
    pub fn reject_updates_with(&self, reason: &str) {
        *self.terminal_reason.lock().unwrap() = Some(reason.to_string());
    }

    pub fn reject_widget_token(&self, token: &str) {
        self.widget_terminal_tokens
            .lock()
            .unwrap()
            .push(token.to_string());
    }

    pub fn pushes(&self) -> Vec<SentPush> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<SentPush> {
        self.pushes()
            .into_iter()
            .filter(|p| matches!(p, SentPush::Update { .. }))
            .collect()
    }

    pub fn ends(&self) -> Vec<SentPush> {
        self.pushes()
            .into_iter()
            .filter(|p| matches!(p, SentPush::End { .. }))
            .collect()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send_update(
        &self,
        _environment: Environment,
        push_token: &str,
        state: &ContentState,
        alert: Option<&AlertContent>,
        _stale_date: DateTime<Utc>,
        _timestamp: DateTime<Utc>,
    ) -> Result<(), ApnsError> {
        if let Some(reason) = self.terminal_reason.lock().unwrap().clone() {
            return Err(ApnsError::TerminalToken { reason });
        }
        self.pushes.lock().unwrap().push(SentPush::Update {
            token: push_token.to_string(),
            state: serde_json::to_value(state).expect("state serializes"),
            alert: alert.map(|a| (a.title.clone(), a.body.clone())),
        });
        Ok(())
    }

    async fn send_end(
        &self,
        _environment: Environment,
        push_token: &str,
    ) -> Result<(), ApnsError> {
        self.pushes.lock().unwrap().push(SentPush::End {
            token: push_token.to_string(),
        });
        Ok(())
    }

    async fn send_widget_refresh(
        &self,
        environment: Environment,
        push_token: &str,
    ) -> Result<(), ApnsError> {
        if self
            .widget_terminal_tokens
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == push_token)
        {
            return Err(ApnsError::TerminalToken {
                reason: "Unregistered".to_string(),
            });
        }
        self.pushes.lock().unwrap().push(SentPush::Widget {
            environment,
            token: push_token.to_string(),
        });
        Ok(())
    }
}
