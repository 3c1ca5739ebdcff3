use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::NodeAddress;

/// Lifecycle of a range: `Pending -> Working -> {Done, Failed}`,
/// `Failed -> {Pending, Aborted}`. `Done` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeStatus {
    Pending,
    Working,
    Failed,
    Aborted,
    Done,
}

impl RangeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RangeStatus::Done | RangeStatus::Aborted)
    }
}

impl std::fmt::Display for RangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeStatus::Pending => write!(f, "pending"),
            RangeStatus::Working => write!(f, "working"),
            RangeStatus::Failed => write!(f, "failed"),
            RangeStatus::Aborted => write!(f, "aborted"),
            RangeStatus::Done => write!(f, "done"),
        }
    }
}

/// One contiguous `[start, end)` slice of a job, owned by exactly one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub range_id: String,
    pub node: NodeAddress,
    pub start: i64,
    pub end: i64,
    /// Next unit to execute; `start <= progress <= end`
    pub progress: i64,
    pub status: RangeStatus,
    pub last_update: DateTime<Utc>,
    pub retries: u32,
}

impl Range {
    pub fn new(
        range_id: String,
        node: NodeAddress,
        start: i64,
        end: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            range_id,
            node,
            start,
            end,
            progress: start,
            status: RangeStatus::Pending,
            last_update: now,
            retries: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A WORKING range that has not reported within `timeout` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status == RangeStatus::Working && now - self.last_update > timeout
    }

    /// The completed prefix `[start, progress)` as a DONE range, or `None`
    /// when no progress was made.
    pub fn splinter(&self) -> Option<Range> {
        if self.progress <= self.start {
            return None;
        }
        Some(Range {
            range_id: format!("{}/{}", self.range_id, self.progress),
            node: self.node.clone(),
            start: self.start,
            end: self.progress,
            progress: self.progress,
            status: RangeStatus::Done,
            last_update: self.last_update,
            retries: self.retries,
        })
    }

    pub fn to_ref(&self) -> RangeRef {
        RangeRef {
            range_id: self.range_id.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// The part of a range sent along with an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRef {
    pub range_id: String,
    pub start: i64,
    pub end: i64,
}
