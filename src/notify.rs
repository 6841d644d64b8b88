//! Arrival detection and the outbound notifier capability.
//!
//! The gate decides from the *pre-update* fingerprint snapshot whether a
//! sighting is user-surfacing; dispatch happens off the ingest path and can
//! never fail the store write.

use crate::database::{Fingerprint, TIMESTAMP_FMT};
use crate::probe::Probe;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, error, warn};
use std::time::Duration;

/// Gap after which a known fingerprint counts as a fresh arrival.
pub const ARRIVAL_GAP_MINUTES: i64 = 10;

/// Fingerprints sighted more often than this stop notifying; neighborhood
/// IoT beacons saturate without it.
pub const SPAM_GUARD_SIGHTINGS: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    New,
    Returning,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::New => "new",
            NotificationKind::Returning => "returning",
        }
    }
}

/// Decide whether this sighting surfaces to the user.
///
/// `old` is the fingerprint row as it existed before `log_sighting` updated
/// it. Rules, in order: absent row is a brand-new device; silenced or
/// spam-guarded rows never notify; otherwise a gap of ten minutes or more
/// since the previous sighting is a returning arrival. An unparseable
/// `last_seen` falls through to no notification.
pub fn evaluate_arrival(old: Option<&Fingerprint>, now: DateTime<Utc>) -> Option<NotificationKind> {
    let old = match old {
        None => return Some(NotificationKind::New),
        Some(fingerprint) => fingerprint,
    };

    if !old.notification_enabled {
        return None;
    }

    if old.sighting_count > SPAM_GUARD_SIGHTINGS {
        debug!(
            "Suppressing notification for {} seen {} times",
            old.fingerprint_id, old.sighting_count
        );
        return None;
    }

    let last_seen = match NaiveDateTime::parse_from_str(&old.last_seen, TIMESTAMP_FMT) {
        Ok(naive) => Utc.from_utc_datetime(&naive),
        Err(e) => {
            warn!(
                "Unparseable last_seen {:?} on fingerprint {}: {}",
                old.last_seen, old.fingerprint_id, e
            );
            return None;
        }
    };

    let minutes_since = now.signed_duration_since(last_seen).num_minutes();
    if minutes_since >= ARRIVAL_GAP_MINUTES {
        Some(NotificationKind::Returning)
    } else {
        None
    }
}

/// Outbound notification capability. The ingest core depends on this seam,
/// not on any transport.
pub trait Notifier: Send + Sync {
    fn notify(&self, fingerprint: &Fingerprint, probe: &Probe, kind: NotificationKind);
}

/// POSTs `{fingerprint, probe_data, notification_type}` to a local notifier
/// endpoint on a spawned task. Failures are logged and never retried.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build notifier HTTP client")?;
        Ok(WebhookNotifier { client, url })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, fingerprint: &Fingerprint, probe: &Probe, kind: NotificationKind) {
        let payload = serde_json::json!({
            "fingerprint": fingerprint,
            "probe_data": {
                "mac": probe.mac,
                "dbm": probe.dbm,
                "ssid": probe.ssid,
                "oui": probe.oui,
            },
            "notification_type": kind.as_str(),
        });

        let client = self.client.clone();
        let url = self.url.clone();
        let kind = kind.as_str();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Sent {} notification", kind);
                }
                Ok(response) => {
                    warn!(
                        "Notifier rejected {} notification: HTTP {}",
                        kind,
                        response.status()
                    );
                }
                Err(e) => {
                    error!("Failed to send {} notification: {}", kind, e);
                }
            }
        });
    }
}

/// Stands in when no webhook is configured; arrivals only hit the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, fingerprint: &Fingerprint, probe: &Probe, kind: NotificationKind) {
        debug!(
            "{} device: fingerprint={} mac={} ssid={:?}",
            kind.as_str(),
            fingerprint.fingerprint_id,
            probe.mac,
            probe.ssid
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fingerprint(count: i64, enabled: bool, last_seen: &str) -> Fingerprint {
        Fingerprint {
            fingerprint_id: "abcdef0123456789".to_string(),
            identity_id: None,
            ie_data: None,
            first_seen: "2024-04-04 12:00:00".to_string(),
            last_seen: last_seen.to_string(),
            sighting_count: count,
            notification_enabled: enabled,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(s, TIMESTAMP_FMT).unwrap())
    }

    #[test]
    fn absent_row_is_new() {
        let now = at("2024-04-04 14:00:00");
        assert_eq!(evaluate_arrival(None, now), Some(NotificationKind::New));
    }

    #[test]
    fn silenced_row_never_notifies() {
        let now = at("2024-04-04 14:00:00");
        let fp = fingerprint(1, false, "2024-04-04 12:00:00");
        assert_eq!(evaluate_arrival(Some(&fp), now), None);
    }

    #[test]
    fn spam_guard_wins_over_gap() {
        let now = at("2024-04-04 14:00:00");
        let fp = fingerprint(101, true, "2024-04-01 00:00:00");
        assert_eq!(evaluate_arrival(Some(&fp), now), None);

        // Exactly 100 is still allowed through.
        let fp = fingerprint(100, true, "2024-04-01 00:00:00");
        assert_eq!(
            evaluate_arrival(Some(&fp), now),
            Some(NotificationKind::Returning)
        );
    }

    #[test]
    fn ten_minute_gap_is_returning() {
        let now = at("2024-04-04 14:11:00");
        let fp = fingerprint(5, true, "2024-04-04 14:00:00");
        assert_eq!(
            evaluate_arrival(Some(&fp), now),
            Some(NotificationKind::Returning)
        );

        // Exactly ten minutes counts.
        let now = at("2024-04-04 14:10:00");
        assert_eq!(
            evaluate_arrival(Some(&fp), now),
            Some(NotificationKind::Returning)
        );
    }

    #[test]
    fn short_gap_stays_quiet() {
        let now = at("2024-04-04 14:09:59");
        let fp = fingerprint(5, true, "2024-04-04 14:00:00");
        assert_eq!(evaluate_arrival(Some(&fp), now), None);
    }

    #[test]
    fn unparseable_last_seen_stays_quiet() {
        let now = at("2024-04-04 14:00:00");
        let fp = fingerprint(5, true, "not a timestamp");
        assert_eq!(evaluate_arrival(Some(&fp), now), None);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(NotificationKind::New.as_str(), "new");
        assert_eq!(NotificationKind::Returning.as_str(), "returning");
    }
}
