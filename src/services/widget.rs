//! Periodic widget-refresh fan-out.
//!
//! On each tick, every registered widget token in both environments
//! gets a silent background push so the device reruns its widget
//! timeline. Tokens APNs reports as gone are dropped from the set.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};

use crate::db::StateStore;
use crate::error::AppError;
use crate::models::Environment;
use crate::redact;
use crate::services::apns::{ApnsError, PushGateway};

const MAX_CONCURRENT_PUSHES: usize = 16;

/// Run the widget ticker until the process exits.
pub async fn run_widget_loop(store: StateStore, gateway: Arc<dyn PushGateway>, cadence_seconds: u64) {
    tracing::info!(cadence_seconds, "Widget ticker started");
    let mut interval = tokio::time::interval(Duration::from_secs(cadence_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match refresh_all(&store, &gateway).await {
            Ok(sent) => tracing::debug!(sent, "Widget refresh tick complete"),
            Err(err) => tracing::error!(error = %err, "Widget refresh tick failed"),
        }
    }
}

/// Fan out one silent refresh to every registered token.
///
/// Returns how many pushes were attempted.
pub async fn refresh_all(
    store: &StateStore,
    gateway: &Arc<dyn PushGateway>,
) -> Result<usize, AppError> {
    let mut sent = 0usize;

    for environment in [Environment::Development, Environment::Production] {
        let tokens = store.list_widget_tokens(environment).await?;
        sent += tokens.len();

        stream::iter(tokens)
            .map(|token| {
                let gateway = gateway.clone();
                let store = store.clone();
                async move {
                    match gateway.send_widget_refresh(environment, &token).await {
                        Ok(()) => {}
                        Err(ApnsError::TerminalToken { reason }) => {
                            tracing::info!(
                                device = %redact::identifier(&token),
                                reason = %reason,
                                "Dropping widget token"
                            );
                            if let Err(err) =
                                store.remove_widget_token(environment, &token).await
                            {
                                tracing::warn!(error = %err, "Failed to drop widget token");
                            }
                        }
                    }
                }
            })
            .buffer_unordered(MAX_CONCURRENT_PUSHES)
            .collect::<Vec<()>>()
            .await;
    }

    Ok(sent)
}
