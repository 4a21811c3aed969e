// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Alert policy: decide whether a fresh reading warrants a push alert.
//!
//! Pure and deterministic. An alert fires when the trend is a rapid
//! change, or when the reading crossed the target band in either
//! direction. Without preferences or a previous reading there is
//! nothing to compare against, so no alert fires.

use crate::models::{GlucoseReading, GlucoseUnit, Preferences};

/// Title and body of a push alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertContent {
    pub title: String,
    pub body: String,
}

/// Decide whether `current` warrants an alert given the previously
/// delivered reading and the user's preferences.
pub fn decide(
    current: &GlucoseReading,
    previous: Option<&GlucoseReading>,
    preferences: Option<&Preferences>,
) -> Option<AlertContent> {
    let preferences = preferences?;
    let previous = previous?;

    let range = preferences.target_range;
    let crossed_band = range.contains(current.value) != range.contains(previous.value);
    if !current.trend.is_rapid() && !crossed_band {
        return None;
    }

    let (title, fallback_adjective) = if current.value > range.upper {
        ("High Glucose", "rising")
    } else if current.value < range.lower {
        ("Low Glucose", "falling")
    } else {
        ("Back in Range", "steady")
    };

    let adjective = current.trend.adjective().unwrap_or(fallback_adjective);
    let body = format!(
        "Now {} and {}, was {}.",
        format_value(current.value, preferences.unit),
        adjective,
        format_value(previous.value, preferences.unit),
    );

    Some(AlertContent {
        title: title.to_string(),
        body,
    })
}

/// mg/dL per mmol/L of glucose.
const MMOL_CONVERSION: f64 = 18.0182;

/// Format a provider-unit value in the user's display unit.
///
/// Conversion happens here and only here; band comparisons always use
/// raw provider units.
fn format_value(value: i32, unit: GlucoseUnit) -> String {
    match unit {
        GlucoseUnit::Mgdl => format!("{value} mg/dL"),
        GlucoseUnit::Mmol => format!("{:.1} mmol/L", f64::from(value) / MMOL_CONVERSION),
    }
}
