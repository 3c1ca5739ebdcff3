use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cluster::NodeAddress;
use crate::error::{PolarisError, Result};
use crate::job::range::Range;

/// Caller-supplied parameters for a new job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub ensure: bool,
}

impl JobOptions {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    pub fn with_ensure(mut self, ensure: bool) -> Self {
        self.ensure = ensure;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Number of points in `[start, end)`, or `None` when it does not fit
    /// in an `i64`.
    pub fn span(&self) -> Option<i64> {
        self.end.checked_sub(self.start)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(PolarisError::InvalidJob(format!(
                "start ({}) must be below end ({})",
                self.start, self.end
            )));
        }
        if self.span().is_none() {
            return Err(PolarisError::InvalidJob(format!(
                "interval [{}, {}) is too large",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// A job's full, serializable state. This is the value persisted to the store
/// and broadcast in `job:status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub ensure: bool,
    pub ranges: Vec<Range>,
    pub complete: bool,
}

impl Job {
    pub fn new(name: impl Into<String>, options: JobOptions) -> Self {
        Self::with_id(Uuid::new_v4(), name, options)
    }

    pub fn with_id(id: Uuid, name: impl Into<String>, options: JobOptions) -> Self {
        Self {
            id,
            name: name.into(),
            start: options.start,
            end: options.end,
            metadata: options.metadata,
            ensure: options.ensure,
            ranges: Vec::new(),
            complete: false,
        }
    }

    pub fn range(&self, range_id: &str) -> Option<&Range> {
        self.ranges.iter().find(|r| r.range_id == range_id)
    }

    pub fn range_mut(&mut self, range_id: &str) -> Option<&mut Range> {
        self.ranges.iter_mut().find(|r| r.range_id == range_id)
    }

    pub fn ranges_owned_by<'a>(&'a self, node: &'a NodeAddress) -> impl Iterator<Item = &'a Range> {
        self.ranges.iter().filter(move |r| &r.node == node)
    }

    /// Recompute `complete`: every range is DONE or ABORTED. A job that has
    /// not been partitioned yet is never complete.
    pub fn refresh_complete(&mut self) -> bool {
        self.complete = !self.ranges.is_empty() && self.ranges.iter().all(Range::is_terminal);
        self.complete
    }

    /// Units covered by DONE ranges.
    pub fn done_units(&self) -> i64 {
        self.ranges
            .iter()
            .filter(|r| r.status == crate::job::RangeStatus::Done)
            .map(|r| r.progress - r.start)
            .sum()
    }
}
