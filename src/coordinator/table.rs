use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use crate::job::{Job, JobRole};

/// How many finished jobs are remembered for late-message suppression and
/// status queries.
const FINISHED_CAPACITY: usize = 256;

/// Jobs held by one node, keyed by id, plus a bounded record of jobs that
/// already finished here.
#[derive(Debug, Default)]
pub struct JobTable {
    live: HashMap<Uuid, JobRole>,
    finished: HashMap<Uuid, Job>,
    finished_order: VecDeque<Uuid>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut JobRole> {
        self.live.get_mut(id)
    }

    pub fn insert(&mut self, role: JobRole) {
        self.live.insert(role.id(), role);
    }

    /// Live job ids in a stable order.
    pub fn ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.live.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut JobRole> {
        self.live.values_mut()
    }

    /// Remove every live role, for in-place role conversion.
    pub fn drain(&mut self) -> Vec<JobRole> {
        self.live.drain().map(|(_, role)| role).collect()
    }

    /// Current state of a live or recently finished job.
    pub fn job(&self, id: &Uuid) -> Option<Job> {
        self.live
            .get(id)
            .map(|role| role.job().clone())
            .or_else(|| self.finished.get(id).cloned())
    }

    pub fn is_finished(&self, id: &Uuid) -> bool {
        self.finished.contains_key(id)
    }

    /// Drop a job from the live set and remember its final state.
    /// `final_state` overrides the live copy when the leader sent one.
    pub fn finish(&mut self, id: Uuid, final_state: Option<Job>) {
        let live = self.live.remove(&id).map(|role| match role {
            JobRole::Master(m) => m.into_job(),
            JobRole::Client(c) => c.into_job(),
        });
        let Some(job) = final_state.or(live) else {
            return;
        };
        if self.finished.insert(id, job).is_none() {
            self.finished_order.push_back(id);
        }
        while self.finished_order.len() > FINISHED_CAPACITY {
            if let Some(old) = self.finished_order.pop_front() {
                self.finished.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeAddress;
    use crate::job::{ClientJob, JobOptions};

    fn client_role() -> JobRole {
        let job = Job::new("test", JobOptions::new(0, 10));
        JobRole::Client(ClientJob::new(job, NodeAddress::new("a")))
    }

    #[test]
    fn finish_moves_job_out_of_live_set() {
        let mut table = JobTable::new();
        let role = client_role();
        let id = role.id();
        table.insert(role);
        assert_eq!(table.ids(), vec![id]);

        table.finish(id, None);
        assert!(table.ids().is_empty());
        assert!(table.is_finished(&id));
        assert_eq!(table.job(&id).map(|j| j.id), Some(id));
    }

    #[test]
    fn final_state_overrides_live_copy() {
        let mut table = JobTable::new();
        let role = client_role();
        let id = role.id();
        table.insert(role);

        let mut last = table.job(&id).unwrap();
        last.complete = true;
        table.finish(id, Some(last));
        assert!(table.job(&id).unwrap().complete);
    }

    #[test]
    fn finished_record_is_bounded() {
        let mut table = JobTable::new();
        let first = Job::new("test", JobOptions::new(0, 1));
        let first_id = first.id;
        table.finish(first_id, Some(first));
        for _ in 0..FINISHED_CAPACITY {
            let job = Job::new("test", JobOptions::new(0, 1));
            table.finish(job.id, Some(job));
        }
        assert!(!table.is_finished(&first_id));
    }

    #[test]
    fn finishing_unknown_job_without_state_is_noop() {
        let mut table = JobTable::new();
        let id = Uuid::new_v4();
        table.finish(id, None);
        assert!(!table.is_finished(&id));
    }
}
