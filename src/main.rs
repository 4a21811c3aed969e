// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sugar Glance API Server
//!
//! Drives Apple Live Activity updates for the Sugar Glance CGM app by
//! polling the upstream provider and pushing readings over APNs.

use std::sync::Arc;

use sugar_glance::{
    config::Config,
    db::StateStore,
    services::{scheduler, widget, ActivityProcessor, ApnsClient, DexcomClient},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    if config.apns.is_none() {
        tracing::warn!("APNs signing material not configured, push sending is disabled");
    }
    tracing::info!(port = config.port, "Starting Sugar Glance API");

    // Connect the backing store
    let store = StateStore::connect(&config.redis_url)
        .await
        .expect("Failed to connect to Redis");

    // Push gateway and upstream client are shared by all cycles
    let gateway: Arc<ApnsClient> =
        Arc::new(ApnsClient::new(config.apns.as_ref()).expect("Failed to build APNs client"));
    let source = Arc::new(DexcomClient::new());

    let processor = Arc::new(ActivityProcessor::new(
        store.clone(),
        source,
        gateway.clone(),
    ));

    // Long-lived timers: 1 Hz poll scheduler and the widget ticker
    tokio::spawn(scheduler::run_scheduler_loop(store.clone(), processor));
    tokio::spawn(widget::run_widget_loop(
        store.clone(),
        gateway,
        config.widget_refresh_seconds,
    ));

    // Build shared state and router
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
    });
    let app = sugar_glance::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sugar_glance=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
