//! # Fetch Outcomes and Failure Records

use serde::{Deserialize, Serialize};

use super::catalog::{CanonicalId, StatusPartition};

/// Classification buckets of a document response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseClass {
    Success,
    RateLimited,
    NotFound,
    OtherFailure,
}

impl ResponseClass {
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            _ => Self::OtherFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Eligible for retry in a later drain cycle
    Transient,
    /// Never retried without operator intervention
    Permanent,
}

/// Why an id landed on the permanent list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PermanentReason {
    #[default]
    #[serde(rename = "not-found")]
    NotFound,
    /// Failed too many consecutive drain cycles
    #[serde(rename = "escalated")]
    Escalated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub canonical_id: CanonicalId,
    pub status: StatusPartition,
    pub url: String,
    pub kind: FailureKind,
    /// Consecutive failed drain cycles, transient records only
    pub strikes: u32,
    pub reason: Option<PermanentReason>,
}

impl FailureRecord {
    pub fn transient(canonical_id: CanonicalId, status: StatusPartition, url: impl Into<String>) -> Self {
        Self {
            canonical_id,
            status,
            url: url.into(),
            kind: FailureKind::Transient,
            strikes: 0,
            reason: None,
        }
    }

    pub fn permanent(
        canonical_id: CanonicalId,
        status: StatusPartition,
        url: impl Into<String>,
        reason: PermanentReason,
    ) -> Self {
        Self {
            canonical_id,
            status,
            url: url.into(),
            kind: FailureKind::Permanent,
            strikes: 0,
            reason: Some(reason),
        }
    }

    /// Converts a transient record into its escalated permanent form
    #[must_use]
    pub fn escalate(self) -> Self {
        Self::permanent(self.canonical_id, self.status, self.url, PermanentReason::Escalated)
    }
}

/// Final result of the per-entry fetch protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchOutcome {
    /// Current artifact already on disk, no request made
    AlreadyPresent,
    /// Id is on the permanent list, no request made
    KnownPermanent,
    Downloaded { attempts: u32, bytes: usize },
    NotFound { attempts: u32 },
    /// Recorded as transient for a later drain cycle
    RetryExhausted { attempts: u32, last_error: String },
}

impl FetchOutcome {
    #[must_use]
    pub const fn made_request(&self) -> bool {
        !matches!(self, Self::AlreadyPresent | Self::KnownPermanent)
    }

    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::AlreadyPresent | Self::Downloaded { .. })
    }
}
