use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AllocationError, Result};

/// Period during which a time-limited deal accepts claims: `[starts_at, ends_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl SaleWindow {
    pub fn new(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<Self> {
        if starts_at > ends_at {
            return Err(AllocationError::InvalidPeriod { starts_at, ends_at });
        }
        Ok(Self { starts_at, ends_at })
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.ensure_open(now).is_ok()
    }

    pub fn ensure_open(&self, now: DateTime<Utc>) -> Result<()> {
        if now < self.starts_at {
            return Err(AllocationError::NotStarted(self.starts_at));
        }
        if now >= self.ends_at {
            return Err(AllocationError::Ended(self.ends_at));
        }
        Ok(())
    }
}
