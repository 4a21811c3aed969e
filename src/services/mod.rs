// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod alert;
pub mod apns;
pub mod dexcom;
pub mod processor;
pub mod scheduler;
pub mod widget;

pub use apns::{ApnsClient, PushGateway};
pub use dexcom::{DexcomClient, GlucoseSource};
pub use processor::ActivityProcessor;
