// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live Activity record model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::reading::GlucoseReading;

/// APNs environment the device token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Wire/storage name, also used in widget-set keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// Upstream provider region the account lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountLocation {
    Us,
    Worldwide,
}

/// Display unit preferred by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlucoseUnit {
    Mgdl,
    Mmol,
}

/// Closed integer glucose band, in the same unit as the readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRange {
    pub lower: i32,
    pub upper: i32,
}

impl TargetRange {
    /// Whether a value sits inside the band (bounds included).
    pub fn contains(&self, value: i32) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
}

/// Alerting preferences supplied at activity start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub target_range: TargetRange,
    pub unit: GlucoseUnit,
}

/// One registered Live Activity, stored as JSON in Redis.
///
/// The record is the sole source of truth; the schedule index only
/// reprojects its next poll time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveActivityRecord {
    /// Stable identity: username when provided, raw push token otherwise
    pub id: String,
    /// APNs device token for the Live Activity
    pub push_token: String,
    pub environment: Environment,
    pub account_location: AccountLocation,
    /// History window requested from upstream on each poll, in seconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Upstream account handle; rewritten after a refreshing fetch
    #[serde(rename = "accountID", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    /// Upstream session handle; rewritten after a refreshing fetch
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
    /// When the activity was first started; caps its lifetime
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start_date: DateTime<Utc>,
    /// Timestamp of the most recent reading delivered to the device
    #[serde(
        with = "chrono::serde::ts_seconds_option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_reading_date: Option<DateTime<Utc>>,
    /// The most recent reading delivered to the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reading: Option<GlucoseReading>,
    /// Current adaptive backoff value in seconds
    pub poll_interval: u64,
    /// Consecutive error count; zeroed by any cycle that produced a reading
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reading::TrendDirection;

    #[test]
    fn test_target_range_is_closed() {
        let range = TargetRange {
            lower: 70,
            upper: 180,
        };
        assert!(range.contains(70));
        assert!(range.contains(180));
        assert!(range.contains(120));
        assert!(!range.contains(69));
        assert!(!range.contains(181));
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let record = LiveActivityRecord {
            id: "alice".to_string(),
            push_token: "aabbcc".to_string(),
            environment: Environment::Production,
            account_location: AccountLocation::Us,
            duration: 21_600,
            username: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
            account_id: Some(Uuid::new_v4()),
            session_id: None,
            preferences: Some(Preferences {
                target_range: TargetRange {
                    lower: 70,
                    upper: 180,
                },
                unit: GlucoseUnit::Mgdl,
            }),
            start_date: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            last_reading_date: Some(DateTime::from_timestamp(1_700_000_300, 0).unwrap()),
            last_reading: Some(GlucoseReading {
                date: DateTime::from_timestamp(1_700_000_300, 0).unwrap(),
                value: 120,
                trend: TrendDirection::Flat,
            }),
            poll_interval: 4,
            retry_count: 0,
        };

        let json = serde_json::to_string(&record).unwrap();
        let parsed: LiveActivityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.account_id, record.account_id);
        assert_eq!(parsed.last_reading, record.last_reading);
        assert_eq!(parsed.poll_interval, 4);
    }

    #[test]
    fn test_record_wire_field_names() {
        let record = LiveActivityRecord {
            id: "t".to_string(),
            push_token: "t".to_string(),
            environment: Environment::Development,
            account_location: AccountLocation::Worldwide,
            duration: 3600,
            username: None,
            password: None,
            account_id: Some(Uuid::nil()),
            session_id: Some(Uuid::nil()),
            preferences: None,
            start_date: DateTime::from_timestamp(0, 0).unwrap(),
            last_reading_date: None,
            last_reading: None,
            poll_interval: 4,
            retry_count: 0,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("accountID").is_some());
        assert!(json.get("sessionID").is_some());
        assert!(json.get("pushToken").is_some());
        assert_eq!(json["environment"], "development");
        assert_eq!(json["accountLocation"], "worldwide");
        assert_eq!(json["startDate"], 0);
        // absent optionals are omitted, not null
        assert!(json.get("lastReadingDate").is_none());
        assert!(json.get("username").is_none());
    }
}
