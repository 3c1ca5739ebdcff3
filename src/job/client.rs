use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cluster::NodeAddress;
use crate::job::range::{Range, RangeRef, RangeStatus};
use crate::job::registry::{JobBehavior, WorkContext};
use crate::job::state::Job;

/// A follower's projection of a job.
///
/// The full range set is kept for visibility, but only ranges owned by
/// `local` are executed or mutated here.
#[derive(Debug)]
pub struct ClientJob {
    job: Job,
    local: NodeAddress,
    /// Ranges changed since the last report
    touched: BTreeSet<String>,
}

impl ClientJob {
    pub fn new(job: Job, local: NodeAddress) -> Self {
        Self {
            job,
            local,
            touched: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.job.id
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    pub fn local(&self) -> &NodeAddress {
        &self.local
    }

    /// Ranges this node currently owns.
    pub fn own_ranges(&self) -> Vec<Range> {
        self.job.ranges_owned_by(&self.local).cloned().collect()
    }

    /// Take ownership of an assigned range.
    ///
    /// A duplicate assignment for a range already being worked here is a
    /// no-op, so local progress is never lost.
    pub fn assign(&mut self, assigned: RangeRef, now: DateTime<Utc>) {
        match self.job.range_mut(&assigned.range_id) {
            Some(range) if range.node == self.local && !range.is_terminal() => {
                range.status = RangeStatus::Working;
            }
            Some(range) => {
                range.node = self.local.clone();
                range.start = assigned.start;
                range.end = assigned.end;
                range.progress = assigned.start;
                range.status = RangeStatus::Working;
                range.last_update = now;
            }
            None => {
                let mut range = Range::new(
                    assigned.range_id.clone(),
                    self.local.clone(),
                    assigned.start,
                    assigned.end,
                    now,
                );
                range.status = RangeStatus::Working;
                self.job.ranges.push(range);
            }
        }
        tracing::debug!(job_id = %self.job.id, range_id = %assigned.range_id, "Range assigned");
        self.touched.insert(assigned.range_id);
    }

    /// Execute one unit of work on the first active range owned by this node.
    /// Returns the id of the range that was touched, if any.
    pub fn advance(&mut self, behavior: &dyn JobBehavior, now: DateTime<Utc>) -> Option<String> {
        let index = self.job.ranges.iter().position(|r| {
            r.node == self.local
                && matches!(r.status, RangeStatus::Working | RangeStatus::Pending)
        })?;

        let point = self.job.ranges[index].progress;
        let end = self.job.ranges[index].end;
        let outcome = if point < end {
            let ctx = WorkContext {
                job_id: self.job.id,
                name: &self.job.name,
                metadata: &self.job.metadata,
                node: &self.local,
            };
            Some(behavior.execute(&ctx, point))
        } else {
            None
        };

        let range = &mut self.job.ranges[index];
        range.last_update = now;
        match outcome {
            Some(Err(e)) => {
                tracing::warn!(
                    job_id = %self.job.id,
                    range_id = %range.range_id,
                    point,
                    error = %e,
                    "Work unit failed"
                );
                range.status = RangeStatus::Failed;
            }
            Some(Ok(())) => {
                range.progress += 1;
                range.status = RangeStatus::Working;
            }
            None => {}
        }
        if range.status != RangeStatus::Failed && range.progress >= range.end {
            range.status = RangeStatus::Done;
            tracing::debug!(job_id = %self.job.id, range_id = %range.range_id, "Range done");
        }

        let range_id = range.range_id.clone();
        self.touched.insert(range_id.clone());
        Some(range_id)
    }

    /// Ranges to report to the leader: everything changed since the last call,
    /// plus this node's still-active ranges as a liveness signal.
    pub fn take_updates(&mut self) -> Vec<Range> {
        let touched = std::mem::take(&mut self.touched);
        self.job
            .ranges
            .iter()
            .filter(|r| {
                touched.contains(&r.range_id)
                    || (r.node == self.local
                        && matches!(r.status, RangeStatus::Working | RangeStatus::Pending))
            })
            .cloned()
            .collect()
    }

    /// Put ranges back into the pending report set after a failed send.
    pub fn restore_updates(&mut self, range_ids: impl IntoIterator<Item = String>) {
        self.touched.extend(range_ids);
    }

    /// Overlay an authoritative snapshot from the leader.
    ///
    /// For ranges both copies assign to this node the local copy wins, since
    /// it carries fresher progress; a master-side abort always wins. All other
    /// ranges are replaced by the leader's view.
    pub fn update(&mut self, incoming: Job) {
        let mut merged = Vec::with_capacity(incoming.ranges.len());
        for remote in incoming.ranges {
            let keep_local = remote.node == self.local
                && remote.status != RangeStatus::Aborted
                && self
                    .job
                    .range(&remote.range_id)
                    .is_some_and(|local| local.node == self.local);
            if keep_local {
                if let Some(local) = self.job.range(&remote.range_id) {
                    merged.push(local.clone());
                    continue;
                }
            }
            merged.push(remote);
        }

        // Ranges created locally that the leader has not seen yet.
        for local in self.job.ranges_owned_by(&self.local) {
            if !merged.iter().any(|r| r.range_id == local.range_id) {
                merged.push(local.clone());
            }
        }

        self.job.ranges = merged;
        self.job.metadata = incoming.metadata;
        self.job.ensure = incoming.ensure;
        self.job.complete = incoming.complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::registry::WorkError;
    use crate::job::JobOptions;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        points: Mutex<Vec<i64>>,
        fail_at: Option<i64>,
    }

    impl JobBehavior for Recorder {
        fn execute(&self, _ctx: &WorkContext<'_>, point: i64) -> Result<(), WorkError> {
            if Some(point) == self.fail_at {
                return Err(WorkError::new("boom"));
            }
            self.points.lock().unwrap().push(point);
            Ok(())
        }
    }

    fn node(name: &str) -> NodeAddress {
        NodeAddress::new(name)
    }

    fn job_for(a_end: i64) -> Job {
        let now = Utc::now();
        let mut job = Job::new("test", JobOptions::new(0, 10));
        job.ranges.push(Range::new("r0".into(), node("a"), 0, a_end, now));
        job.ranges.push(Range::new("r1".into(), node("b"), a_end, 10, now));
        job
    }

    #[test]
    fn advance_executes_only_own_ranges() {
        let mut client = ClientJob::new(job_for(3), node("a"));
        let recorder = Recorder::default();
        let now = Utc::now();

        for _ in 0..5 {
            client.advance(&recorder, now);
        }

        assert_eq!(*recorder.points.lock().unwrap(), vec![0, 1, 2]);
        let r0 = client.job().range("r0").unwrap();
        assert_eq!(r0.progress, 3);
        assert_eq!(r0.status, RangeStatus::Done);
        let r1 = client.job().range("r1").unwrap();
        assert_eq!(r1.progress, 3);
        assert_eq!(r1.status, RangeStatus::Pending);
    }

    #[test]
    fn failing_unit_marks_range_failed() {
        let mut client = ClientJob::new(job_for(5), node("a"));
        let recorder = Recorder {
            fail_at: Some(2),
            ..Default::default()
        };
        let now = Utc::now();
        for _ in 0..4 {
            client.advance(&recorder, now);
        }
        let r0 = client.job().range("r0").unwrap();
        assert_eq!(r0.status, RangeStatus::Failed);
        assert_eq!(r0.progress, 2);
        assert_eq!(*recorder.points.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn take_updates_drains_touched_ranges() {
        let mut client = ClientJob::new(job_for(2), node("a"));
        let recorder = Recorder::default();
        let now = Utc::now();
        // An idle owned range is reported on every call as a liveness signal.
        for _ in 0..2 {
            let idle = client.take_updates();
            assert_eq!(idle.len(), 1);
            assert_eq!(idle[0].range_id, "r0");
        }

        client.advance(&recorder, now);
        client.advance(&recorder, now);
        let updates = client.take_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, RangeStatus::Done);

        assert!(client.take_updates().is_empty());
        client.restore_updates(vec!["r0".to_string()]);
        assert_eq!(client.take_updates().len(), 1);
    }

    #[test]
    fn update_keeps_local_progress_for_own_ranges() {
        let mut client = ClientJob::new(job_for(5), node("a"));
        let recorder = Recorder::default();
        let now = Utc::now();
        client.advance(&recorder, now);
        client.advance(&recorder, now);

        let mut remote = job_for(5);
        remote.ranges[1].progress = 8;
        remote.ranges[1].status = RangeStatus::Working;
        client.update(remote);

        assert_eq!(client.job().range("r0").unwrap().progress, 2);
        assert_eq!(client.job().range("r1").unwrap().progress, 8);
    }

    #[test]
    fn update_hands_off_reassigned_and_aborted_ranges() {
        let mut client = ClientJob::new(job_for(5), node("a"));
        let mut remote = job_for(5);
        remote.ranges[0].node = node("c");
        client.update(remote);
        assert_eq!(client.job().range("r0").unwrap().node, node("c"));
        assert!(client.own_ranges().is_empty());

        let mut client = ClientJob::new(job_for(5), node("a"));
        let mut remote = job_for(5);
        remote.ranges[0].status = RangeStatus::Aborted;
        client.update(remote);
        assert_eq!(client.job().range("r0").unwrap().status, RangeStatus::Aborted);
        assert!(client.advance(&Recorder::default(), Utc::now()).is_none());
    }

    #[test]
    fn assign_takes_over_a_range() {
        let mut client = ClientJob::new(job_for(5), node("b"));
        let now = Utc::now();
        client.assign(
            RangeRef {
                range_id: "r0".into(),
                start: 2,
                end: 5,
            },
            now,
        );
        let r0 = client.job().range("r0").unwrap();
        assert_eq!(r0.node, node("b"));
        assert_eq!((r0.start, r0.progress), (2, 2));
        assert_eq!(r0.status, RangeStatus::Working);

        let recorder = Recorder::default();
        client.advance(&recorder, now);
        assert_eq!(*recorder.points.lock().unwrap(), vec![2]);

        client.assign(
            RangeRef {
                range_id: "r0".into(),
                start: 2,
                end: 5,
            },
            now,
        );
        assert_eq!(client.job().range("r0").unwrap().progress, 3);
    }
}
