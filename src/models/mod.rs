// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod activity;
pub mod reading;

pub use activity::{
    AccountLocation, Environment, GlucoseUnit, LiveActivityRecord, Preferences, TargetRange,
};
pub use reading::{GlucoseReading, TrendDirection};
