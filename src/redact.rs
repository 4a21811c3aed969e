// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Redacted user identifiers for log lines.
//!
//! Log lines never carry a raw push token or a full email address.

/// Redact an activity identifier for logging.
///
/// Emails keep their first character and domain (`a•••••@example.com`),
/// UUIDs keep their first eight hex chars, anything else is truncated.
pub fn identifier(id: &str) -> String {
    if let Some((local, domain)) = id.split_once('@') {
        let first = local.chars().next().unwrap_or('•');
        let padding = "•".repeat(local.chars().count().saturating_sub(1).max(1));
        return format!("{first}{padding}@{domain}");
    }

    // Hyphenated form only; a bare hex push token is not a UUID.
    if id.len() == 36 && id.contains('-') && uuid::Uuid::parse_str(id).is_ok() {
        return id.chars().take(8).collect();
    }

    let prefix: String = id.chars().take(8).collect();
    if prefix.len() < id.len() {
        format!("{prefix}…")
    } else {
        prefix
    }
}
