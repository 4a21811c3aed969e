//! Glucose reading model as delivered by the upstream provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single glucose reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseReading {
    /// When the reading was taken (epoch seconds on the wire)
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
    /// Glucose value in provider units (mg/dL)
    pub value: i32,
    /// Trend direction reported by the sensor
    pub trend: TrendDirection,
}

/// Trend direction reported alongside a reading.
///
/// Variant names match the strings the Share API uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    None,
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    NotComputable,
    RateOutOfRange,
}

impl TrendDirection {
    /// Human adjective used in alert bodies, if one applies.
    pub fn adjective(&self) -> Option<&'static str> {
        match self {
            TrendDirection::Flat => Some("stable"),
            TrendDirection::FortyFiveUp => Some("rising slowly"),
            TrendDirection::FortyFiveDown => Some("falling slowly"),
            TrendDirection::SingleUp => Some("rising"),
            TrendDirection::SingleDown => Some("falling"),
            TrendDirection::DoubleUp => Some("rising quickly"),
            TrendDirection::DoubleDown => Some("falling quickly"),
            TrendDirection::None
            | TrendDirection::NotComputable
            | TrendDirection::RateOutOfRange => None,
        }
    }

    /// Rapid changes always warrant an alert.
    pub fn is_rapid(&self) -> bool {
        matches!(self, TrendDirection::DoubleUp | TrendDirection::DoubleDown)
    }
}
