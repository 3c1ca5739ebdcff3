use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use uuid::Uuid;

use crate::cluster::NodeAddress;
use crate::config::JobConfig;
use crate::error::{PolarisError, Result};
use crate::job::range::{Range, RangeRef, RangeStatus};
use crate::job::state::Job;

/// Policy knobs the master applies on every tick.
#[derive(Debug, Clone)]
pub struct MasterPolicy {
    pub stale_timeout: chrono::Duration,
    pub max_retries: u32,
    pub divisions_per_worker: usize,
}

impl Default for MasterPolicy {
    fn default() -> Self {
        Self::from(&JobConfig::default())
    }
}

impl From<&JobConfig> for MasterPolicy {
    fn from(config: &JobConfig) -> Self {
        Self {
            stale_timeout: config.stale_timeout(),
            max_retries: config.max_retries,
            divisions_per_worker: config.divisions_per_worker,
        }
    }
}

/// A range handed to a worker on this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub node: NodeAddress,
    pub job_id: Uuid,
    pub range: RangeRef,
}

/// What happened to a FAILED range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    Aborted,
    Reassigned(NodeAddress),
    /// No eligible worker; the range stays FAILED until the next tick
    Deferred,
}

/// Result of one maintenance tick.
#[derive(Debug, Default)]
pub struct Tick {
    pub dispatches: Vec<Assignment>,
    pub reassigned: Vec<(String, NodeAddress)>,
    pub aborted: Vec<String>,
    pub complete: bool,
}

/// Authoritative job state held by the current leader.
///
/// All operations are synchronous mutations; the coordinator performs the
/// resulting sends and store writes.
#[derive(Debug)]
pub struct MasterJob {
    job: Job,
    leader: NodeAddress,
    policy: MasterPolicy,
    rng: StdRng,
}

impl MasterJob {
    pub fn new(job: Job, leader: NodeAddress, policy: MasterPolicy) -> Self {
        Self {
            job,
            leader,
            policy,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the reassignment picker.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Take over a job from a persisted snapshot without re-partitioning.
    ///
    /// WORKING ranges get their liveness clock reset to `now` so workers have a
    /// full stale timeout to report to the new leader, and any range the new
    /// leader itself owned is pushed back into the pool.
    pub fn recover(
        snapshot: Job,
        leader: NodeAddress,
        policy: MasterPolicy,
        workers: &[NodeAddress],
        now: DateTime<Utc>,
    ) -> Self {
        let mut master = Self::new(snapshot, leader, policy);
        master.resume(now);
        let leader = master.leader.clone();
        master.reassign_node(&leader, workers);
        master
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

    pub fn leader(&self) -> &NodeAddress {
        &self.leader
    }

    /// Divide `[start, end)` into sequential ranges over `workers`.
    ///
    /// The division count is `workers * divisions_per_worker`, capped at the
    /// number of units so no range is empty. Owners are assigned round-robin,
    /// so the same membership snapshot always yields the same partition.
    pub fn partition(&mut self, workers: &[NodeAddress], now: DateTime<Utc>) -> Result<()> {
        if !self.job.ranges.is_empty() {
            return Err(PolarisError::InvalidJob(format!(
                "job {} is already partitioned",
                self.job.id
            )));
        }
        let span = match self.job.end.checked_sub(self.job.start) {
            Some(span) if span > 0 => span,
            _ => {
                return Err(PolarisError::InvalidJob(format!(
                    "cannot partition [{}, {})",
                    self.job.start, self.job.end
                )))
            }
        };

        let eligible: Vec<&NodeAddress> = workers.iter().filter(|w| **w != self.leader).collect();
        if eligible.is_empty() {
            return Err(PolarisError::NoWorkersAvailable);
        }

        let per_worker = self.policy.divisions_per_worker.max(1);
        let divisions = (eligible.len().saturating_mul(per_worker) as i64).min(span);
        let range_size = span / divisions;

        let mut ranges = Vec::with_capacity(divisions as usize);
        for i in 0..divisions {
            let start = self.job.start + range_size * i;
            let end = if i == divisions - 1 {
                self.job.end
            } else {
                start + range_size
            };
            let node = eligible[i as usize % eligible.len()].clone();
            ranges.push(Range::new(
                format!("{}-{}", self.job.id, i),
                node,
                start,
                end,
                now,
            ));
        }

        tracing::debug!(
            job_id = %self.job.id,
            ranges = ranges.len(),
            workers = eligible.len(),
            "Partitioned job"
        );
        self.job.ranges = ranges;
        self.job.complete = false;
        Ok(())
    }

    /// Move the range at `index` to another worker, starting from its
    /// recorded progress. Returns the new owner, or `None` when no worker is
    /// eligible (the range is left untouched).
    pub fn reassign(&mut self, index: usize, workers: &[NodeAddress]) -> Option<NodeAddress> {
        let current = self.job.ranges.get(index)?.node.clone();

        let mut candidates: Vec<&NodeAddress> = workers
            .iter()
            .filter(|w| **w != self.leader && **w != current)
            .collect();
        if candidates.is_empty() {
            candidates = workers.iter().filter(|w| **w != self.leader).collect();
        }
        let Some(target) = candidates.choose(&mut self.rng).map(|w| (*w).clone()) else {
            tracing::warn!(
                job_id = %self.job.id,
                range_id = %self.job.ranges[index].range_id,
                "No eligible worker for reassignment"
            );
            return None;
        };

        let range = &mut self.job.ranges[index];
        let splinter = range.splinter();
        if splinter.is_some() {
            range.retries = 0;
        } else {
            range.retries += 1;
        }
        range.node = target.clone();
        range.start = range.progress;
        range.status = RangeStatus::Pending;

        tracing::debug!(
            job_id = %self.job.id,
            range_id = %range.range_id,
            from = %current,
            to = %target,
            start = range.start,
            retries = range.retries,
            "Range reassigned"
        );

        if let Some(done) = splinter {
            self.job.ranges.push(done);
        }
        Some(target)
    }

    /// Decide the fate of a FAILED range according to the job's ensure flag
    /// and the retry ceiling.
    pub fn process_failed(&mut self, index: usize, workers: &[NodeAddress]) -> FailureOutcome {
        let Some(range) = self.job.ranges.get_mut(index) else {
            return FailureOutcome::Deferred;
        };

        if !self.job.ensure {
            range.status = RangeStatus::Aborted;
            tracing::info!(
                job_id = %self.job.id,
                range_id = %range.range_id,
                node = %range.node,
                progress = range.progress,
                "Non-ensured job range aborted"
            );
            return FailureOutcome::Aborted;
        }

        if range.retries > self.policy.max_retries {
            range.status = RangeStatus::Aborted;
            let err = PolarisError::RangeRetriesExhausted {
                range_id: range.range_id.clone(),
                retries: range.retries,
            };
            tracing::error!(job_id = %self.job.id, error = %err, "Ensured job range aborted");
            return FailureOutcome::Aborted;
        }

        match self.reassign(index, workers) {
            Some(node) => FailureOutcome::Reassigned(node),
            None => FailureOutcome::Deferred,
        }
    }

    /// One maintenance pass: dispatch PENDING ranges, fail stale ones, route
    /// every FAILED range through `process_failed`, and recompute completion.
    ///
    /// Ranges reassigned during the pass stay PENDING and are dispatched on
    /// the next tick.
    pub fn heartbeat(&mut self, workers: &[NodeAddress], now: DateTime<Utc>) -> Tick {
        let mut tick = Tick::default();
        let count = self.job.ranges.len();

        for range in self.job.ranges.iter_mut().take(count) {
            if range.status == RangeStatus::Pending {
                range.status = RangeStatus::Working;
                range.last_update = now;
                tick.dispatches.push(Assignment {
                    node: range.node.clone(),
                    job_id: self.job.id,
                    range: range.to_ref(),
                });
            }
        }

        for index in 0..count {
            let range = &mut self.job.ranges[index];
            if range.is_stale(now, self.policy.stale_timeout) {
                let err = PolarisError::RangeStale {
                    range_id: range.range_id.clone(),
                };
                tracing::warn!(job_id = %self.job.id, node = %range.node, error = %err, "Range is stale");
                range.status = RangeStatus::Failed;
            }
            if range.status != RangeStatus::Failed {
                continue;
            }
            let range_id = range.range_id.clone();
            match self.process_failed(index, workers) {
                FailureOutcome::Reassigned(node) => tick.reassigned.push((range_id, node)),
                FailureOutcome::Aborted => tick.aborted.push(range_id),
                FailureOutcome::Deferred => {}
            }
        }

        tick.complete = self.job.refresh_complete();
        tick
    }

    /// Merge progress reported by workers.
    ///
    /// Progress never regresses: a report is applied only when its progress is
    /// at least the stored one, and then only the worker-owned fields
    /// (progress and status) are taken. Bounds, owner and retries stay with the
    /// master, terminal ranges keep their status, and a WORKING range is never
    /// sent back to PENDING. `last_update` is refreshed for every known range.
    pub fn update_range(&mut self, incoming: Vec<Range>, now: DateTime<Utc>) {
        for report in incoming {
            let Some(stored) = self.job.range_mut(&report.range_id) else {
                tracing::debug!(
                    job_id = %self.job.id,
                    range_id = %report.range_id,
                    "Appending range unknown to master"
                );
                let mut range = report;
                range.last_update = now;
                self.job.ranges.push(range);
                continue;
            };

            if report.progress >= stored.progress {
                stored.progress = report.progress.min(stored.end);
                let regresses = stored.status == RangeStatus::Working
                    && report.status == RangeStatus::Pending;
                if !stored.status.is_terminal() && !regresses {
                    stored.status = report.status;
                }
            } else {
                tracing::trace!(
                    range_id = %report.range_id,
                    stored = stored.progress,
                    reported = report.progress,
                    "Ignoring stale progress report"
                );
            }
            stored.last_update = now;
        }
    }

    /// Fail every non-terminal range owned by `node`. Returns how many ranges
    /// were affected.
    pub fn reassign_node(&mut self, node: &NodeAddress, workers: &[NodeAddress]) -> usize {
        let count = self.job.ranges.len();
        let mut affected = 0;
        for index in 0..count {
            let range = &mut self.job.ranges[index];
            if &range.node != node || range.is_terminal() {
                continue;
            }
            range.status = RangeStatus::Failed;
            self.process_failed(index, workers);
            affected += 1;
        }
        if affected > 0 {
            tracing::info!(job_id = %self.job.id, node = %node, ranges = affected, "Reassigned ranges of departed node");
        }
        affected
    }

    /// Abort every non-terminal range. The next heartbeat completes the job.
    pub fn cancel(&mut self) -> usize {
        let mut aborted = 0;
        for range in self.job.ranges.iter_mut().filter(|r| !r.is_terminal()) {
            range.status = RangeStatus::Aborted;
            aborted += 1;
        }
        tracing::info!(job_id = %self.job.id, ranges = aborted, "Job cancelled");
        aborted
    }

    /// Reset the liveness clock of WORKING ranges after a leadership change.
    pub(crate) fn resume(&mut self, now: DateTime<Utc>) {
        for range in self
            .job
            .ranges
            .iter_mut()
            .filter(|r| r.status == RangeStatus::Working)
        {
            range.last_update = now;
        }
        self.job.refresh_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;

    fn node(name: &str) -> NodeAddress {
        NodeAddress::new(name)
    }

    fn policy() -> MasterPolicy {
        MasterPolicy {
            stale_timeout: chrono::Duration::milliseconds(1000),
            max_retries: 2,
            divisions_per_worker: 1,
        }
    }

    fn master(start: i64, end: i64, ensure: bool) -> MasterJob {
        let job = Job::new("test", JobOptions::new(start, end).with_ensure(ensure));
        MasterJob::new(job, node("leader"), policy()).with_seed(7)
    }

    fn assert_covers(job: &Job) {
        let mut ranges: Vec<&Range> = job.ranges.iter().collect();
        ranges.sort_by_key(|r| r.start);
        assert_eq!(ranges.first().unwrap().start, job.start);
        assert_eq!(ranges.last().unwrap().end, job.end);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap");
        }
    }

    #[test]
    fn test_partition_two_workers() {
        let mut m = master(0, 100, false);
        m.partition(&[node("a"), node("b")], Utc::now()).unwrap();

        let ranges = &m.job().ranges;
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].start, ranges[0].end), (0, 50));
        assert_eq!((ranges[1].start, ranges[1].end), (50, 100));
        assert!(ranges.iter().all(|r| r.status == RangeStatus::Pending));
        assert!(ranges.iter().all(|r| r.progress == r.start && r.retries == 0));
        assert_eq!(ranges[0].node, node("a"));
        assert_eq!(ranges[1].node, node("b"));
        assert_eq!(ranges[0].range_id, format!("{}-0", m.id()));
    }

    #[test]
    fn test_partition_covers_interval() {
        for (start, end) in [(0, 1), (0, 7), (-20, 13), (5, 1000), (100, 103)] {
            for workers in 1..6 {
                for per_worker in [1, 3, 8] {
                    let nodes: Vec<NodeAddress> =
                        (0..workers).map(|i| node(&format!("w{}", i))).collect();
                    let mut m = master(start, end, true);
                    m.policy.divisions_per_worker = per_worker;
                    m.partition(&nodes, Utc::now()).unwrap();
                    assert_covers(m.job());
                    assert!(m.job().ranges.iter().all(|r| r.start < r.end));
                }
            }
        }
    }

    #[test]
    fn test_partition_is_deterministic() {
        let nodes = [node("a"), node("b"), node("c")];
        let now = Utc::now();
        let job = Job::new("test", JobOptions::new(0, 1000));
        let mut first = MasterJob::new(job.clone(), node("leader"), policy());
        let mut second = MasterJob::new(job, node("leader"), policy());
        first.policy.divisions_per_worker = 8;
        second.policy.divisions_per_worker = 8;
        first.partition(&nodes, now).unwrap();
        second.partition(&nodes, now).unwrap();
        assert_eq!(first.job().ranges, second.job().ranges);
        assert_eq!(first.job().ranges.len(), 24);
        assert_eq!(first.job().ranges[3].node, node("a"));
    }

    #[test]
    fn test_partition_skips_leader_and_needs_workers() {
        let mut m = master(0, 10, false);
        assert!(matches!(
            m.partition(&[node("leader")], Utc::now()),
            Err(PolarisError::NoWorkersAvailable)
        ));

        m.partition(&[node("leader"), node("a")], Utc::now()).unwrap();
        assert!(m.job().ranges.iter().all(|r| r.node == node("a")));
        assert!(m.partition(&[node("a")], Utc::now()).is_err());
    }

    #[test]
    fn test_partition_rejects_overflowing_interval() {
        let mut m = master(i64::MIN, i64::MAX, false);
        assert!(matches!(
            m.partition(&[node("a")], Utc::now()),
            Err(PolarisError::InvalidJob(_))
        ));
        assert!(m.job().ranges.is_empty());

        let mut m = master(i64::MIN, -1, false);
        m.partition(&[node("a"), node("b")], Utc::now()).unwrap();
        assert_covers(m.job());
    }

    #[test]
    fn test_heartbeat_dispatches_pending() {
        let mut m = master(0, 100, false);
        let workers = [node("a"), node("b")];
        let now = Utc::now();
        m.partition(&workers, now).unwrap();

        let tick = m.heartbeat(&workers, now);
        assert_eq!(tick.dispatches.len(), 2);
        assert_eq!(tick.dispatches[1].node, node("b"));
        assert_eq!(tick.dispatches[1].range.start, 50);
        assert!(m.job().ranges.iter().all(|r| r.status == RangeStatus::Working));
        assert!(!tick.complete);

        let tick = m.heartbeat(&workers, now);
        assert!(tick.dispatches.is_empty());
    }

    #[test]
    fn test_stale_range_splinters_with_ensure() {
        let mut m = master(0, 100, true);
        let workers = [node("a"), node("b")];
        let start = Utc::now();
        m.partition(&workers, start).unwrap();
        m.heartbeat(&workers, start);
        m.job.ranges[0].progress = 30;

        let later = start + chrono::Duration::milliseconds(1500);
        m.job.ranges[1].last_update = later;
        let tick = m.heartbeat(&workers, later);

        let id = format!("{}-0", m.id());
        assert_eq!(tick.reassigned, vec![(id.clone(), node("b"))]);
        let range = m.job().range(&id).unwrap();
        assert_eq!((range.start, range.end, range.progress), (30, 50, 30));
        assert_eq!(range.status, RangeStatus::Pending);
        assert_eq!(range.node, node("b"));
        assert_eq!(range.retries, 0);

        let splinter = m.job().range(&format!("{}/30", id)).unwrap();
        assert_eq!((splinter.start, splinter.end), (0, 30));
        assert_eq!(splinter.status, RangeStatus::Done);
        assert_covers(m.job());
    }

    #[test]
    fn test_stale_range_aborts_without_ensure() {
        let mut m = master(0, 100, false);
        let workers = [node("a"), node("b")];
        let start = Utc::now();
        m.partition(&workers, start).unwrap();
        m.heartbeat(&workers, start);
        m.job.ranges[0].progress = 30;
        m.job.ranges[1].status = RangeStatus::Done;
        m.job.ranges[1].progress = 100;

        let tick = m.heartbeat(&workers, start + chrono::Duration::milliseconds(1500));
        assert_eq!(tick.aborted.len(), 1);
        assert_eq!(m.job().ranges.len(), 2);
        assert_eq!(m.job().ranges[0].status, RangeStatus::Aborted);
        assert_eq!(m.job().ranges[0].retries, 0);
        assert!(tick.complete);
    }

    #[test]
    fn test_retries_increment_without_progress_then_abort() {
        let mut m = master(0, 10, true);
        let workers = [node("a"), node("b"), node("c")];
        m.partition(&workers, Utc::now()).unwrap();

        for expected in 1..=3 {
            m.job.ranges[0].status = RangeStatus::Failed;
            let previous = m.job.ranges[0].node.clone();
            let outcome = m.process_failed(0, &workers);
            let FailureOutcome::Reassigned(to) = outcome else {
                panic!("expected reassignment, got {:?}", outcome);
            };
            assert_ne!(to, previous);
            assert_ne!(to, node("leader"));
            assert_eq!(m.job().ranges[0].retries, expected);
        }

        m.job.ranges[0].status = RangeStatus::Failed;
        assert_eq!(m.process_failed(0, &workers), FailureOutcome::Aborted);
        assert_eq!(m.job().ranges[0].status, RangeStatus::Aborted);
    }

    #[test]
    fn test_reassign_never_targets_leader_or_previous_owner() {
        let workers = [node("leader"), node("a"), node("b"), node("c")];
        for seed in 0..50 {
            let mut m = master(0, 30, true).with_seed(seed);
            m.partition(&workers, Utc::now()).unwrap();
            for index in 0..m.job().ranges.len() {
                let previous = m.job().ranges[index].node.clone();
                let to = m.reassign(index, &workers).unwrap();
                assert_ne!(to, previous);
                assert_ne!(to, node("leader"));
            }
        }
    }

    #[test]
    fn test_reassign_falls_back_to_sole_worker() {
        let mut m = master(0, 10, true);
        let workers = [node("a")];
        m.partition(&workers, Utc::now()).unwrap();
        assert_eq!(m.reassign(0, &workers), Some(node("a")));

        m.job.ranges[0].status = RangeStatus::Failed;
        let retries = m.job().ranges[0].retries;
        assert_eq!(m.process_failed(0, &[]), FailureOutcome::Deferred);
        assert_eq!(m.job().ranges[0].status, RangeStatus::Failed);
        assert_eq!(m.job().ranges[0].retries, retries);
    }

    #[test]
    fn test_update_range_is_monotonic_and_idempotent() {
        let mut m = master(0, 100, true);
        let workers = [node("a"), node("b")];
        let now = Utc::now();
        m.partition(&workers, now).unwrap();
        m.heartbeat(&workers, now);

        let mut report = m.job().ranges[0].clone();
        report.progress = 20;
        m.update_range(vec![report.clone()], now);
        let once = m.job().clone();
        m.update_range(vec![report.clone()], now);
        assert_eq!(m.job(), &once);

        let mut behind = report.clone();
        behind.progress = 10;
        behind.status = RangeStatus::Failed;
        m.update_range(vec![behind], now);
        assert_eq!(m.job().ranges[0].progress, 20);
        assert_eq!(m.job().ranges[0].status, RangeStatus::Working);

        let mut progress = Vec::new();
        for p in [25, 22, 40, 39, 50] {
            let mut r = report.clone();
            r.progress = p;
            m.update_range(vec![r], now);
            progress.push(m.job().ranges[0].progress);
        }
        assert_eq!(progress, vec![25, 25, 40, 40, 50]);
    }

    #[test]
    fn test_update_range_keeps_master_owned_fields() {
        let mut m = master(0, 100, true);
        let workers = [node("a"), node("b")];
        let now = Utc::now();
        m.partition(&workers, now).unwrap();
        m.heartbeat(&workers, now);

        let mut report = m.job().ranges[0].clone();
        report.node = node("z");
        report.start = -5;
        report.retries = 9;
        report.progress = 50;
        report.status = RangeStatus::Done;
        let later = now + chrono::Duration::milliseconds(10);
        m.update_range(vec![report], later);

        let stored = &m.job().ranges[0];
        assert_eq!(stored.node, node("a"));
        assert_eq!(stored.start, 0);
        assert_eq!(stored.retries, 0);
        assert_eq!(stored.status, RangeStatus::Done);
        assert_eq!(stored.last_update, later);
    }

    #[test]
    fn test_update_range_appends_unknown() {
        let mut m = master(0, 100, true);
        m.partition(&[node("a")], Utc::now()).unwrap();
        let extra = Range::new("extra".to_string(), node("a"), 100, 110, Utc::now());
        m.update_range(vec![extra], Utc::now());
        assert!(m.job().range("extra").is_some());
        assert_eq!(m.job().ranges.len(), 2);
    }

    #[test]
    fn test_reassign_node_moves_only_that_nodes_ranges() {
        let mut m = master(0, 90, true);
        let workers = [node("a"), node("b"), node("c")];
        let now = Utc::now();
        m.partition(&workers, now).unwrap();
        m.heartbeat(&workers, now);
        m.job.ranges[1].progress = 40;

        let remaining = [node("a"), node("c")];
        assert_eq!(m.reassign_node(&node("b"), &remaining), 1);
        let moved = &m.job().ranges[1];
        assert_ne!(moved.node, node("b"));
        assert_eq!(moved.start, 40);
        assert_eq!(moved.status, RangeStatus::Pending);
        assert_eq!(m.job().ranges[0].node, node("a"));
        assert_eq!(m.job().ranges[2].node, node("c"));
        assert_eq!(m.reassign_node(&node("b"), &remaining), 0);
    }

    #[test]
    fn test_recover_does_not_repartition() {
        let mut m = master(0, 90, true);
        let workers = [node("a"), node("b"), node("c")];
        let now = Utc::now();
        m.partition(&workers, now).unwrap();
        m.heartbeat(&workers, now);
        m.job.ranges[0].status = RangeStatus::Done;
        m.job.ranges[0].progress = 30;
        let snapshot = m.into_job();

        let later = now + chrono::Duration::milliseconds(5000);
        let mut recovered =
            MasterJob::recover(snapshot.clone(), node("b"), policy(), &[node("a"), node("c")], later);
        assert_eq!(recovered.job().ranges.len(), 3);
        assert_eq!(recovered.job().ranges[0], snapshot.ranges[0]);
        assert_ne!(recovered.job().ranges[1].node, node("b"));
        assert_eq!(recovered.job().ranges[2].last_update, later);

        let tick = recovered.heartbeat(&[node("a"), node("c")], later);
        assert!(tick.aborted.is_empty());
        assert_eq!(tick.dispatches.len(), 1);
    }

    #[test]
    fn test_cancel_completes_on_next_heartbeat() {
        let mut m = master(0, 100, true);
        let workers = [node("a"), node("b")];
        m.partition(&workers, Utc::now()).unwrap();
        m.job.ranges[0].status = RangeStatus::Done;
        assert_eq!(m.cancel(), 1);
        assert!(m.heartbeat(&workers, Utc::now()).complete);
    }
}
