//! Work log for stability runs and its duplicate/missing analysis.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::cluster::NodeAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkEntry {
    pub node: NodeAddress,
    pub point: i64,
    pub at: DateTime<Utc>,
}

/// Shared, append-only record of executed work units.
#[derive(Debug, Clone, Default)]
pub struct WorkLog {
    entries: Arc<Mutex<Vec<WorkEntry>>>,
}

impl WorkLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: NodeAddress, point: i64) {
        self.lock().push(WorkEntry {
            node,
            point,
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> Vec<WorkEntry> {
        self.lock().clone()
    }

    pub fn points(&self) -> Vec<i64> {
        self.lock().iter().map(|e| e.point).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn report(&self, start: i64, end: i64) -> AuditReport {
        AuditReport::analyze(&self.lock(), start, end)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkEntry>> {
        // A panicking writer cannot leave a half-pushed entry behind.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Coverage of `[start, end)` by a work log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub total: i64,
    /// Points executed more than once
    pub duplicates: i64,
    /// Points never executed
    pub missing: i64,
    /// Units executed, by node
    pub per_node: BTreeMap<NodeAddress, usize>,
}

impl AuditReport {
    pub fn analyze(entries: &[WorkEntry], start: i64, end: i64) -> Self {
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        let mut per_node: BTreeMap<NodeAddress, usize> = BTreeMap::new();
        for entry in entries {
            *per_node.entry(entry.node.clone()).or_default() += 1;
            if (start..end).contains(&entry.point) {
                *counts.entry(entry.point).or_default() += 1;
            }
        }

        let total = end.saturating_sub(start).max(0);
        let duplicates = counts.values().filter(|c| **c > 1).count() as i64;
        let missing = total - counts.len() as i64;
        Self {
            total,
            duplicates,
            missing,
            per_node,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.missing == 0
    }

    fn percent(&self, n: i64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        n as f64 / self.total as f64 * 100.0
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} items of work total.", self.total)?;
        writeln!(
            f,
            "{} duplicates ({:.3}%)",
            self.duplicates,
            self.percent(self.duplicates)
        )?;
        write!(f, "{} missing ({:.3}%)", self.missing, self.percent(self.missing))?;
        for (node, units) in &self.per_node {
            write!(f, "\n  {}: {} units", node, units)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_duplicates_and_missing() {
        let log = WorkLog::new();
        for p in [0, 1, 1, 2, 4, 4, 4, 99] {
            log.record(NodeAddress::new("a"), p);
        }
        log.record(NodeAddress::new("b"), 3);

        let report = log.report(0, 6);
        assert_eq!(report.total, 6);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.missing, 1);
        assert_eq!(report.per_node[&NodeAddress::new("a")], 8);
        assert!(!report.is_clean());

        let text = report.to_string();
        assert!(text.contains("6 items of work total."));
        assert!(text.contains("1 missing (16.667%)"));
    }

    #[test]
    fn empty_log_misses_everything() {
        let report = WorkLog::new().report(10, 20);
        assert_eq!(report.missing, 10);
        assert_eq!(report.duplicates, 0);
    }

    #[test]
    fn complete_coverage_is_clean() {
        let log = WorkLog::new();
        (0..50).for_each(|p| log.record(NodeAddress::new("a"), p));
        assert!(log.report(0, 50).is_clean());
        assert_eq!(log.len(), 50);
    }

    #[test]
    fn extreme_bounds_do_not_overflow() {
        let log = WorkLog::new();
        log.record(NodeAddress::new("a"), 0);
        let report = log.report(i64::MIN, i64::MAX);
        assert_eq!(report.total, i64::MAX);
        assert_eq!(report.missing, i64::MAX - 1);
        assert_eq!(log.report(i64::MAX, i64::MIN).total, 0);
    }
}
