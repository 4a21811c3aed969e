//! Redis client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Activity records (JSON blobs, one per Live Activity)
//! - The schedule index (sorted set ordered by next poll time)
//! - Widget token sets (one per APNs environment)
//!
//! Every operation is a single round trip and individually atomic
//! against the backend; no multi-key transactions are used.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::db::keys;
use crate::error::AppError;
use crate::models::{Environment, LiveActivityRecord};
use crate::redact;

/// Field under which the record JSON is stored in its hash.
const DATA_FIELD: &str = "data";

/// Redis-backed state store.
#[derive(Clone)]
pub struct StateStore {
    conn: ConnectionManager,
}

impl StateStore {
    /// Connect to Redis and return a cloneable store handle.
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!("Connected to Redis");

        Ok(Self { conn })
    }

    // ─── Activity Records ────────────────────────────────────────

    /// Overwrite the record for an activity.
    pub async fn put_record(&self, record: &LiveActivityRecord) -> Result<(), AppError> {
        let json = serde_json::to_string(record)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Record encode error: {}", e)))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(keys::activity_data(&record.id), DATA_FIELD, json)
            .await?;
        Ok(())
    }

    /// Fetch the record for an activity, if it exists.
    ///
    /// A record that no longer deserializes is reported as absent so the
    /// caller unschedules it instead of retrying forever.
    pub async fn get_record(&self, id: &str) -> Result<Option<LiveActivityRecord>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(keys::activity_data(id), DATA_FIELD).await?;

        match raw {
            None => Ok(None),
            Some(json) => match serde_json::from_str(&json) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    tracing::error!(
                        activity = %redact::identifier(id),
                        error = %e,
                        "Dropping undecodable activity record"
                    );
                    Ok(None)
                }
            },
        }
    }

    /// Delete the record for an activity.
    pub async fn delete_record(&self, id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys::activity_data(id)).await?;
        Ok(())
    }

    // ─── Schedule Index ──────────────────────────────────────────

    /// Upsert an activity into the schedule at the given epoch second.
    pub async fn schedule(&self, id: &str, score: i64) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(keys::SCHEDULE, id, score).await?;
        Ok(())
    }

    /// Remove an activity from the schedule.
    pub async fn unschedule(&self, id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(keys::SCHEDULE, id).await?;
        Ok(())
    }

    /// Ids whose next poll time is at or before `now`, ascending by score.
    pub async fn due_before(&self, now: i64) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrangebyscore(keys::SCHEDULE, "-inf", now).await?;
        Ok(ids)
    }

    /// Bulk-rescore claimed ids so the next tick does not repick them.
    ///
    /// Rescoring (instead of removing) guarantees a retry within one
    /// max-interval even if the claiming processor dies mid-cycle.
    pub async fn claim(&self, ids: &[String], new_score: i64) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let items: Vec<(i64, &str)> = ids.iter().map(|id| (new_score, id.as_str())).collect();
        let mut conn = self.conn.clone();
        let _: () = conn.zadd_multiple(keys::SCHEDULE, &items).await?;
        Ok(())
    }

    // ─── Widget Tokens ───────────────────────────────────────────

    /// Register a widget device token.
    pub async fn add_widget_token(
        &self,
        environment: Environment,
        token: &str,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(keys::widget_tokens(environment), token).await?;
        Ok(())
    }

    /// Remove a widget device token.
    pub async fn remove_widget_token(
        &self,
        environment: Environment,
        token: &str,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(keys::widget_tokens(environment), token).await?;
        Ok(())
    }

    /// All widget device tokens registered for an environment.
    pub async fn list_widget_tokens(
        &self,
        environment: Environment,
    ) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();
        let tokens: Vec<String> = conn.smembers(keys::widget_tokens(environment)).await?;
        Ok(tokens)
    }
}
