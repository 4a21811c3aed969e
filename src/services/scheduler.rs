//! 1 Hz tick loop over the schedule index.
//!
//! Each tick pops every due activity, claims it by bumping its score a
//! full max-interval into the future, then spawns one processing task
//! per id. Ticks never wait for the previous tick's tasks; the claim
//! rescore is what keeps duplicate processing rare, and makes a crashed
//! processor's activity come back on its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::StateStore;
use crate::error::AppError;
use crate::redact;
use crate::services::processor::{ActivityProcessor, MAX_POLL_INTERVAL};

/// Run the scheduler until the process exits.
pub async fn run_scheduler_loop(store: StateStore, processor: Arc<ActivityProcessor>) {
    tracing::info!("Poll scheduler started");
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = tick_once(&store, &processor, Utc::now()).await {
            tracing::error!(error = %err, "Scheduler tick failed");
        }
    }
}

/// One tick: claim everything due and hand each id to a processor task.
///
/// Returns how many activities were dispatched.
pub async fn tick_once(
    store: &StateStore,
    processor: &Arc<ActivityProcessor>,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    let due = store.due_before(now.timestamp()).await?;
    if due.is_empty() {
        return Ok(0);
    }

    store
        .claim(&due, now.timestamp() + MAX_POLL_INTERVAL as i64)
        .await?;

    let count = due.len();
    for id in due {
        let processor = processor.clone();
        tokio::spawn(async move {
            if let Err(err) = processor.process_one(&id, now).await {
                tracing::error!(
                    activity = %redact::identifier(&id),
                    error = %err,
                    "Processing cycle failed"
                );
            }
        });
    }

    Ok(count)
}
