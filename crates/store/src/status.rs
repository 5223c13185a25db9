//! Request log status and entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sluice_core::EventId;

use crate::error::StoreError;

/// Opaque handle to a request-log reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId(pub i64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a `(source, after_id)` fetch attempt.
///
/// `Reserved -> InboxOnly -> Succeeded`, and `Reserved | InboxOnly -> Failed`.
/// Nothing moves backwards and terminal states stay terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Reserved,
    InboxOnly,
    Succeeded,
    Failed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 4] = [
        RequestStatus::Reserved,
        RequestStatus::InboxOnly,
        RequestStatus::Succeeded,
        RequestStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::InboxOnly => "inbox_only",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// States a row may be in when it moves to `self`.
    pub fn predecessors(self) -> &'static [RequestStatus] {
        match self {
            // Only ever created by a reservation.
            Self::Reserved => &[],
            Self::InboxOnly => &[Self::Reserved],
            Self::Succeeded => &[Self::Reserved, Self::InboxOnly],
            Self::Failed => &[Self::Reserved, Self::InboxOnly],
        }
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        next.predecessors().contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        match self {
            Self::Reserved | Self::InboxOnly => false,
            Self::Succeeded | Self::Failed => true,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::UnknownStatus(s.to_string()))
    }
}

/// One row of the request log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub id: ReservationId,
    pub source_name: String,
    pub after_id: EventId,
    pub limit: i64,
    pub status: RequestStatus,
    pub max_id: Option<EventId>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
