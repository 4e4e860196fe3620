use std::fmt;
use std::time::Duration;

use serde_json::json;

use crate::rate_limit::{ClientKey, MissingKeyPolicy};

/// Admission events emitted by the rate limit middleware.
///
/// Events are a diagnostic side channel: sinks observe decisions after they
/// are made and can never change them.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionEvent {
    /// First request seen for a key; a full bucket was created.
    BucketCreated {
        /// Key the bucket belongs to
        key: ClientKey,
    },
    /// A request was admitted and one token withdrawn.
    Admitted {
        /// Key that was charged
        key: ClientKey,
        /// Tokens left after the withdrawal
        remaining: f64,
    },
    /// A request was rejected with 429.
    Rejected {
        /// Key that ran out of tokens
        key: ClientKey,
        /// Tokens left after refill
        remaining: f64,
        /// Time until a token is available
        retry_after: Duration,
    },
    /// No key could be extracted from a request.
    KeyMissing {
        /// Policy applied to the request
        policy: MissingKeyPolicy,
    },
}

impl AdmissionEvent {
    /// The key this event concerns, if any.
    pub fn key(&self) -> Option<&ClientKey> {
        match self {
            AdmissionEvent::BucketCreated { key }
            | AdmissionEvent::Admitted { key, .. }
            | AdmissionEvent::Rejected { key, .. } => Some(key),
            AdmissionEvent::KeyMissing { .. } => None,
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::BucketCreated { key } => write!(f, "BucketCreated({})", key),
            AdmissionEvent::Admitted { key, remaining } => {
                write!(f, "Admitted({}, remaining={:.3})", key, remaining)
            }
            AdmissionEvent::Rejected { key, remaining, retry_after } => {
                write!(f, "Rejected({}, remaining={:.3}, retry_after={:?})", key, remaining, retry_after)
            }
            AdmissionEvent::KeyMissing { policy } => write!(f, "KeyMissing(policy={:?})", policy),
        }
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert an AdmissionEvent into a JSON value for sinks.
pub fn event_to_json(event: &AdmissionEvent) -> serde_json::Value {
    match event {
        AdmissionEvent::BucketCreated { key } => {
            json!({ "kind": "bucket_created", "key": key.as_str() })
        }
        AdmissionEvent::Admitted { key, remaining } => json!({
            "kind": "admitted",
            "key": key.as_str(),
            "remaining": *remaining,
        }),
        AdmissionEvent::Rejected { key, remaining, retry_after } => json!({
            "kind": "rejected",
            "key": key.as_str(),
            "remaining": *remaining,
            "retry_after_ms": clamp_u64(retry_after.as_millis()),
        }),
        AdmissionEvent::KeyMissing { policy } => json!({
            "kind": "key_missing",
            "fail_open": matches!(policy, MissingKeyPolicy::FailOpen),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_variant_and_key() {
        let event = AdmissionEvent::Rejected {
            key: "k1".into(),
            remaining: 0.0,
            retry_after: Duration::from_millis(500),
        };
        let text = event.to_string();
        assert!(text.contains("Rejected"));
        assert!(text.contains("k1"));
        assert!(text.contains("500ms"));
    }

    #[test]
    fn key_accessor() {
        let created = AdmissionEvent::BucketCreated { key: "k".into() };
        assert_eq!(created.key(), Some(&ClientKey::from("k")));
        let missing = AdmissionEvent::KeyMissing { policy: MissingKeyPolicy::FailClosed };
        assert_eq!(missing.key(), None);
    }

    #[test]
    fn rejected_json() {
        let v = event_to_json(&AdmissionEvent::Rejected {
            key: "k1".into(),
            remaining: 0.5,
            retry_after: Duration::from_millis(250),
        });
        assert_eq!(v["kind"], "rejected");
        assert_eq!(v["key"], "k1");
        assert_eq!(v["remaining"], 0.5);
        assert_eq!(v["retry_after_ms"], 250);
    }

    #[test]
    fn key_missing_json() {
        let v = event_to_json(&AdmissionEvent::KeyMissing { policy: MissingKeyPolicy::FailOpen });
        assert_eq!(v["kind"], "key_missing");
        assert_eq!(v["fail_open"], true);
    }

    #[test]
    fn admitted_json() {
        let v = event_to_json(&AdmissionEvent::Admitted { key: "k2".into(), remaining: 3.0 });
        assert_eq!(v["kind"], "admitted");
        assert_eq!(v["remaining"], 3.0);
    }
}
