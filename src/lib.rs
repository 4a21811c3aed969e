// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Sugar Glance: Live Activity push server for CGM glucose readings
//!
//! This crate provides the backend engine that polls the upstream CGM
//! provider for registered devices and drives their Lock Screen Live
//! Activities over APNs.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redact;
pub mod routes;
pub mod services;

use config::Config;
use db::StateStore;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: StateStore,
}
