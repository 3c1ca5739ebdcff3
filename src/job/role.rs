use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cluster::NodeAddress;
use crate::job::client::ClientJob;
use crate::job::master::{MasterJob, MasterPolicy};
use crate::job::state::Job;

/// A job as held by one node: the leader holds the master, everyone else a
/// client. Role changes convert between the two in place.
#[derive(Debug)]
pub enum JobRole {
    Master(MasterJob),
    Client(ClientJob),
}

impl JobRole {
    pub fn job(&self) -> &Job {
        match self {
            JobRole::Master(m) => m.job(),
            JobRole::Client(c) => c.job(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.job().id
    }

    pub fn is_master(&self) -> bool {
        matches!(self, JobRole::Master(_))
    }

    pub fn as_master_mut(&mut self) -> Option<&mut MasterJob> {
        match self {
            JobRole::Master(m) => Some(m),
            JobRole::Client(_) => None,
        }
    }

    pub fn as_client_mut(&mut self) -> Option<&mut ClientJob> {
        match self {
            JobRole::Client(c) => Some(c),
            JobRole::Master(_) => None,
        }
    }
}

/// Turn a client into the master after this node won leadership.
///
/// The persisted snapshot is the base when there is one; otherwise the
/// client's last broadcast view is used. The node's own local progress is
/// merged on top, then ranges it still owns are pushed to other workers.
pub fn promote(
    client: ClientJob,
    snapshot: Option<Job>,
    leader: NodeAddress,
    policy: MasterPolicy,
    workers: &[NodeAddress],
    now: DateTime<Utc>,
) -> MasterJob {
    let own = client.own_ranges();
    let base = snapshot.unwrap_or_else(|| client.into_job());
    let mut master = MasterJob::new(base, leader, policy);
    master.resume(now);
    master.update_range(own, now);
    let leader = master.leader().clone();
    master.reassign_node(&leader, workers);
    tracing::info!(job_id = %master.id(), "Promoted job to master");
    master
}

/// Turn a master into a client after this node lost leadership.
pub fn demote(master: MasterJob, local: NodeAddress) -> ClientJob {
    tracing::info!(job_id = %master.id(), "Demoted job to client");
    ClientJob::new(master.into_job(), local)
}
