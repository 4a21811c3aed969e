//! Per-activity processing cycle.
//!
//! Each cycle loads the record, fetches readings, decides on a push and
//! an alert, then persists "what to do next" as a schedule score. There
//! is no long-lived per-activity task; the cycle itself is the state
//! machine and re-enqueueing is the loop. Cycles are idempotent in
//! effect: record writes are last-writer-wins and every push carries
//! the full content state.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::db::StateStore;
use crate::error::AppError;
use crate::models::LiveActivityRecord;
use crate::redact;
use crate::services::alert;
use crate::services::apns::{ApnsError, ContentState, PushGateway};
use crate::services::dexcom::{FetchError, GlucoseSource};

/// Floor of the adaptive poll interval, in seconds.
pub const MIN_POLL_INTERVAL: u64 = 4;
/// Ceiling of the adaptive poll interval; also the claim horizon.
pub const MAX_POLL_INTERVAL: u64 = 60;
/// Cadence at which the sensor produces readings.
pub const READING_INTERVAL: u64 = 300;
/// Lifetime cap on an activity (7 h 45 m).
pub const MAXIMUM_DURATION: u64 = 27_900;
/// Multiplier applied when polls come back empty or stale.
pub const BACKOFF_FACTOR: f64 = 1.8;
/// Multiplier applied on retryable errors.
pub const ERROR_BACKOFF_FACTOR: f64 = 3.0;

/// Generic errors tolerated before a maxed-out activity is dropped.
const GENERIC_RETRY_BUDGET: u32 = 3;
/// Decode errors tolerated before a maxed-out activity is dropped.
const DECODING_RETRY_BUDGET: u32 = 5;

/// Why an activity was terminated, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    MaxDuration,
    DexcomError,
    ApnsInvalidToken,
    ManualStop,
    TooManyRetries,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndReason::MaxDuration => "maxDuration",
            EndReason::DexcomError => "dexcomError",
            EndReason::ApnsInvalidToken => "apnsInvalidToken",
            EndReason::ManualStop => "manualStop",
            EndReason::TooManyRetries => "tooManyRetries",
        };
        f.write_str(name)
    }
}

/// Drives one activity through one processing cycle.
pub struct ActivityProcessor {
    store: StateStore,
    source: Arc<dyn GlucoseSource>,
    gateway: Arc<dyn PushGateway>,
}

impl ActivityProcessor {
    pub fn new(
        store: StateStore,
        source: Arc<dyn GlucoseSource>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            store,
            source,
            gateway,
        }
    }

    /// Run one processing cycle for `id`.
    ///
    /// Store errors propagate without unscheduling; the claim rescore
    /// already guarantees a retry within one max-interval.
    pub async fn process_one(&self, id: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let Some(mut record) = self.store.get_record(id).await? else {
            // Ended (or never existed); drop the stray schedule entry.
            self.store.unschedule(id).await?;
            return Ok(());
        };

        if now - record.start_date >= Duration::seconds(MAXIMUM_DURATION as i64) {
            return self.finish(&record, EndReason::MaxDuration).await;
        }

        let outcome = match self.source.fetch(&record).await {
            Ok(outcome) => outcome,
            Err(FetchError::Client(message)) => {
                tracing::warn!(
                    activity = %redact::identifier(id),
                    error = %message,
                    "Upstream refused the account"
                );
                return self.finish(&record, EndReason::DexcomError).await;
            }
            Err(FetchError::Decoding { status, body }) => {
                return self.handle_decoding(record, now, status, body).await;
            }
            Err(FetchError::Generic(message)) => {
                return self.handle_generic(record, now, message).await;
            }
        };

        // Persist refreshed session handles on whatever path reschedules.
        if let Some(account_id) = outcome.account_id {
            record.account_id = Some(account_id);
        }
        if let Some(session_id) = outcome.session_id {
            record.session_id = Some(session_id);
        }

        let Some(latest) = outcome.readings.last().cloned() else {
            let old_interval = record.poll_interval;
            record.poll_interval = backed_off(record.poll_interval, BACKOFF_FACTOR);
            record.retry_count = 0;
            return self.reschedule(record, now, old_interval).await;
        };

        if let Some(last_date) = record.last_reading_date {
            if latest.date <= last_date {
                // Nothing new; never re-push the same reading.
                let since_last = (now - last_date).num_seconds().max(0) as u64;
                if since_last > READING_INTERVAL {
                    let old_interval = record.poll_interval;
                    record.poll_interval = backed_off(record.poll_interval, BACKOFF_FACTOR);
                    return self.reschedule(record, now, old_interval).await;
                }
                let delay = delay_after_reading(since_last as i64);
                record.poll_interval = MIN_POLL_INTERVAL;
                record.retry_count = 0;
                return self.reschedule(record, now, delay).await;
            }
        }

        let alert = alert::decide(
            &latest,
            record.last_reading.as_ref(),
            record.preferences.as_ref(),
        );
        let state = ContentState::update(&latest, &outcome.readings);
        let stale_date = latest.date + Duration::seconds(2 * READING_INTERVAL as i64);

        if let Err(ApnsError::TerminalToken { reason }) = self
            .gateway
            .send_update(
                record.environment,
                &record.push_token,
                &state,
                alert.as_ref(),
                stale_date,
                latest.date,
            )
            .await
        {
            tracing::info!(
                activity = %redact::identifier(id),
                reason = %reason,
                "Device token no longer valid"
            );
            return self.finish(&record, EndReason::ApnsInvalidToken).await;
        }

        // Aim the next poll just past the expected next reading.
        let since_latest = (now - latest.date).num_seconds().max(0);
        let delay = delay_after_reading(since_latest);
        record.poll_interval = MIN_POLL_INTERVAL;
        record.retry_count = 0;
        record.last_reading_date = Some(latest.date);
        record.last_reading = Some(latest);
        self.reschedule(record, now, delay).await
    }

    /// Undecodable upstream response; 429 gets a jittered cooldown.
    async fn handle_decoding(
        &self,
        mut record: LiveActivityRecord,
        now: DateTime<Utc>,
        status: u16,
        body: String,
    ) -> Result<(), AppError> {
        if record.poll_interval >= MAX_POLL_INTERVAL && record.retry_count > DECODING_RETRY_BUDGET {
            return self.finish(&record, EndReason::TooManyRetries).await;
        }

        tracing::warn!(
            activity = %redact::identifier(&record.id),
            status,
            body = %body.chars().take(256).collect::<String>(),
            retry_count = record.retry_count,
            "Undecodable upstream response"
        );

        record.poll_interval = backed_off(record.poll_interval, ERROR_BACKOFF_FACTOR);
        let delay = if status == 429 {
            rate_limit_cooldown()
        } else {
            record.poll_interval
        };
        record.retry_count += 1;
        self.reschedule(record, now, delay).await
    }

    /// Transport-level failure; exponential backoff with a tighter budget.
    async fn handle_generic(
        &self,
        mut record: LiveActivityRecord,
        now: DateTime<Utc>,
        message: String,
    ) -> Result<(), AppError> {
        if record.poll_interval >= MAX_POLL_INTERVAL && record.retry_count >= GENERIC_RETRY_BUDGET {
            return self.finish(&record, EndReason::TooManyRetries).await;
        }

        tracing::warn!(
            activity = %redact::identifier(&record.id),
            error = %message,
            retry_count = record.retry_count,
            "Upstream fetch failed"
        );

        record.poll_interval = backed_off(record.poll_interval, ERROR_BACKOFF_FACTOR);
        record.retry_count += 1;
        let delay = record.poll_interval;
        self.reschedule(record, now, delay).await
    }

    /// Persist the record and its next poll time.
    async fn reschedule(
        &self,
        record: LiveActivityRecord,
        now: DateTime<Utc>,
        delay_seconds: u64,
    ) -> Result<(), AppError> {
        self.store.put_record(&record).await?;
        self.store
            .schedule(&record.id, now.timestamp() + delay_seconds as i64)
            .await?;
        tracing::debug!(
            activity = %redact::identifier(&record.id),
            delay_seconds,
            poll_interval = record.poll_interval,
            "Rescheduled activity"
        );
        Ok(())
    }

    /// Terminate the activity: best-effort end event, then delete both
    /// the record and its schedule entry.
    async fn finish(&self, record: &LiveActivityRecord, reason: EndReason) -> Result<(), AppError> {
        if let Err(e) = self
            .gateway
            .send_end(record.environment, &record.push_token)
            .await
        {
            tracing::debug!(
                activity = %redact::identifier(&record.id),
                error = %e,
                "End event not delivered"
            );
        }

        self.store.delete_record(&record.id).await?;
        self.store.unschedule(&record.id).await?;

        tracing::info!(
            activity = %redact::identifier(&record.id),
            reason = %reason,
            "Live Activity ended"
        );
        Ok(())
    }
}

/// Multiplicative backoff, capped at the interval ceiling.
fn backed_off(interval: u64, factor: f64) -> u64 {
    ((interval as f64 * factor) as u64).min(MAX_POLL_INTERVAL)
}

/// Delay that lands just past the next expected reading, floored at
/// the minimum interval.
fn delay_after_reading(elapsed_seconds: i64) -> u64 {
    let until_next = READING_INTERVAL as i64 - elapsed_seconds;
    (until_next + MIN_POLL_INTERVAL as i64).max(MIN_POLL_INTERVAL as i64) as u64
}

/// One-minute cooldown with ±10 s jitter for upstream rate limits.
fn rate_limit_cooldown() -> u64 {
    rand::rng().random_range(50..=70)
}
