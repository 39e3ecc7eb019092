//! Versioned subscription metadata.
//!
//! Stored as one JSON document per subscription. Keys this crate does not
//! know about survive a read-modify-write in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Current metadata schema version.
pub const METADATA_VERSION: u16 = 1;

/// Marker written by the backfill tool.
pub const BACKFILL_SOURCE: &str = "backfill";

/// `extra` key holding the provider's customer id.
pub const PROVIDER_CUSTOMER_KEY: &str = "provider_customer_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionMetadata {
    #[serde(default)]
    pub version: u16,

    /// Set on rows created by a migration tool; rollback deletes only these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_source: Option<String>,

    /// Trigger days already notified. Append-only.
    #[serde(default)]
    notifications_sent: BTreeSet<u32>,

    /// Provider timestamp (unix seconds) of the newest applied webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_applied_event_ts: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SubscriptionMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            migration_source: None,
            notifications_sent: BTreeSet::new(),
            last_applied_event_ts: None,
            extra: Map::new(),
        }
    }
}

impl SubscriptionMetadata {
    pub fn migrated_from(source: impl Into<String>) -> Self {
        Self {
            migration_source: Some(source.into()),
            ..Self::default()
        }
    }

    /// Reads a stored document, upgrading older versions in place.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut metadata: Self = match value {
            Value::Null => Self::default(),
            other => serde_json::from_value(other)?,
        };
        metadata.version = METADATA_VERSION;
        Ok(metadata)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn notifications_sent(&self) -> &BTreeSet<u32> {
        &self.notifications_sent
    }

    pub fn has_notified(&self, day: u32) -> bool {
        self.notifications_sent.contains(&day)
    }

    /// Records a delivered notification. Returns false if already present.
    pub fn record_notification(&mut self, day: u32) -> bool {
        self.notifications_sent.insert(day)
    }

    pub fn last_applied_event_ts(&self) -> Option<i64> {
        self.last_applied_event_ts
    }

    /// True when `occurred_at` predates the newest event already applied.
    pub fn is_stale(&self, occurred_at: i64) -> bool {
        self.last_applied_event_ts
            .map(|last| occurred_at < last)
            .unwrap_or(false)
    }

    /// Advances the high-water mark; never moves it backwards.
    pub fn record_event_ts(&mut self, occurred_at: i64) {
        self.last_applied_event_ts = Some(
            self.last_applied_event_ts
                .map_or(occurred_at, |last| last.max(occurred_at)),
        );
    }

    pub fn is_migrated(&self) -> bool {
        self.migration_source.is_some()
    }
}
