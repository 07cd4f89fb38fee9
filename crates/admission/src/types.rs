use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{QueueError, RequesterId, Result};

/// Identifies a queue: one per gated event (a time-limited deal, a coupon drop).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    pub event_type: String,
    pub event_id: String,
}

impl QueueKey {
    pub fn new(event_type: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: event_id.into(),
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.event_type, self.event_id)
    }
}

/// Throughput settings for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of requesters holding an `ENTERED` slot at once.
    pub max_capacity: u32,
    /// How many waiting requesters are promoted per interval.
    pub entry_batch_size: u32,
    /// Seconds between promotions.
    pub entry_interval_secs: u64,
    /// Seconds an `ENTERED` requester keeps its slot. `None` keeps it until
    /// the requester leaves.
    #[serde(default)]
    pub entry_ttl_secs: Option<u64>,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "max_capacity must be positive".to_string(),
            ));
        }
        if self.entry_batch_size == 0 {
            return Err(QueueError::InvalidConfig(
                "entry_batch_size must be positive".to_string(),
            ));
        }
        if self.entry_interval_secs == 0 {
            return Err(QueueError::InvalidConfig(
                "entry_interval_secs must be positive".to_string(),
            ));
        }
        if self.entry_ttl_secs == Some(0) {
            return Err(QueueError::InvalidConfig(
                "entry_ttl_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn entry_interval(&self) -> Duration {
        Duration::from_secs(self.entry_interval_secs)
    }

    /// Estimated seconds until a requester at 1-based `position` is let in.
    pub fn estimated_wait_secs(&self, position: u64) -> u64 {
        (position / u64::from(self.entry_batch_size)) * self.entry_interval_secs
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100,
            entry_batch_size: 10,
            entry_interval_secs: 5,
            entry_ttl_secs: None,
        }
    }
}

/// A queue and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingQueue {
    pub key: QueueKey,
    pub config: QueueConfig,
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl WaitingQueue {
    pub fn new(key: QueueKey, config: QueueConfig) -> Self {
        Self {
            key,
            config,
            active: false,
            activated_at: None,
            deactivated_at: None,
        }
    }

    pub fn activate(&mut self, at: DateTime<Utc>) {
        self.active = true;
        self.activated_at = Some(at);
        self.deactivated_at = None;
    }

    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.active = false;
        self.deactivated_at = Some(at);
    }
}

/// Lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Waiting,
    Entered,
    Expired,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Waiting => "WAITING",
            EntryStatus::Entered => "ENTERED",
            EntryStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WAITING" => Some(EntryStatus::Waiting),
            "ENTERED" => Some(EntryStatus::Entered),
            "EXPIRED" => Some(EntryStatus::Expired),
            _ => None,
        }
    }

    /// Waiting and entered entries are live; a requester with a live entry
    /// gets it back instead of a new one.
    pub fn is_live(&self) -> bool {
        matches!(self, EntryStatus::Waiting | EntryStatus::Entered)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requester's place in a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub token: Uuid,
    pub key: QueueKey,
    pub requester_id: RequesterId,
    pub status: EntryStatus,
    pub joined_at: DateTime<Utc>,
    pub entered_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(key: QueueKey, requester_id: RequesterId, joined_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4(),
            key,
            requester_id,
            status: EntryStatus::Waiting,
            joined_at,
            entered_at: None,
            expired_at: None,
        }
    }

    pub fn enter(&mut self, at: DateTime<Utc>) {
        self.status = EntryStatus::Entered;
        self.entered_at = Some(at);
    }

    pub fn expire(&mut self, at: DateTime<Utc>) {
        self.status = EntryStatus::Expired;
        self.expired_at = Some(at);
    }
}

/// What a requester sees when polling the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub token: Uuid,
    pub status: EntryStatus,
    /// 1-based position among waiting entries; `None` once entered or expired.
    pub position: Option<u64>,
    pub total_waiting: u64,
    pub estimated_wait_secs: Option<u64>,
}
