//! Per-node coordinator.
//!
//! Owns this node's jobs and drives them from three independent triggers:
//! cluster events (role changes, departures, inbound messages), the heartbeat
//! timer, and the work timer. Sends and store writes produced by a tick are
//! handed to a publisher task so the loop never waits on them.

pub mod table;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::{Cluster, ClusterEvent, Message, NodeAddress, Target};
use crate::config::JobConfig;
use crate::error::{PolarisError, Result};
use crate::job::{
    demote, promote, ClientJob, Job, JobOptions, JobRegistry, JobRole, MasterJob, MasterPolicy,
    RangeRef, Tick,
};
use crate::store::{JobSnapshots, Store};

pub use table::JobTable;

/// Role of this node as last reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Leader,
    Follower,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Leader => write!(f, "leader"),
            NodeRole::Follower => write!(f, "follower"),
        }
    }
}

/// Result of a creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Created and partitioned on this node, which leads
    Created(Uuid),
    /// Sent to the leader, which assigns the id
    Forwarded,
}

/// Requests into the coordinator loop.
#[derive(Debug)]
pub enum CoordinatorCommand {
    CreateJob {
        name: String,
        options: JobOptions,
        response_tx: oneshot::Sender<Result<CreateOutcome>>,
    },
    CancelJob {
        job_id: Uuid,
        response_tx: oneshot::Sender<Result<()>>,
    },
}

/// Side effects of a tick, applied in order by the publisher.
#[derive(Debug)]
enum Outbound {
    Send { target: Target, message: Message },
    Save(Job),
    Remove(Uuid),
}

/// Cloneable access to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    local: NodeAddress,
    command_tx: mpsc::Sender<CoordinatorCommand>,
    jobs: Arc<RwLock<JobTable>>,
    role: Arc<RwLock<NodeRole>>,
}

impl CoordinatorHandle {
    pub fn local(&self) -> &NodeAddress {
        &self.local
    }

    pub async fn create_job(&self, name: impl Into<String>, options: JobOptions) -> Result<CreateOutcome> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(CoordinatorCommand::CreateJob {
                name: name.into(),
                options,
                response_tx,
            })
            .await
            .map_err(|_| PolarisError::CoordinatorStopped)?;
        response_rx.await.map_err(|_| PolarisError::CoordinatorStopped)?
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(CoordinatorCommand::CancelJob { job_id, response_tx })
            .await
            .map_err(|_| PolarisError::CoordinatorStopped)?;
        response_rx.await.map_err(|_| PolarisError::CoordinatorStopped)?
    }

    /// Ids of jobs currently live on this node.
    pub async fn job_ids(&self) -> Vec<Uuid> {
        self.jobs.read().await.ids()
    }

    /// This node's view of a live or recently finished job.
    pub async fn job(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.read().await.job(&job_id)
    }

    pub async fn is_finished(&self, job_id: Uuid) -> bool {
        self.jobs.read().await.is_finished(&job_id)
    }

    pub async fn role(&self) -> NodeRole {
        *self.role.read().await
    }
}

pub struct Coordinator {
    local: NodeAddress,
    config: JobConfig,
    policy: MasterPolicy,
    registry: Arc<JobRegistry>,
    cluster: Arc<dyn Cluster>,
    snapshots: JobSnapshots,
    jobs: Arc<RwLock<JobTable>>,
    role: Arc<RwLock<NodeRole>>,
    command_tx: mpsc::Sender<CoordinatorCommand>,
    outbox: mpsc::UnboundedSender<Vec<Outbound>>,
    outbox_rx: Option<mpsc::UnboundedReceiver<Vec<Outbound>>>,
    seed: Option<u64>,
}

impl Coordinator {
    pub fn new(
        config: JobConfig,
        registry: Arc<JobRegistry>,
        cluster: Arc<dyn Cluster>,
        store: Arc<dyn Store>,
    ) -> (Self, mpsc::Receiver<CoordinatorCommand>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            local: cluster.local().clone(),
            policy: MasterPolicy::from(&config),
            config,
            registry,
            cluster,
            snapshots: JobSnapshots::new(store),
            jobs: Arc::new(RwLock::new(JobTable::new())),
            role: Arc::new(RwLock::new(NodeRole::Follower)),
            command_tx,
            outbox,
            outbox_rx: Some(outbox_rx),
            seed: None,
        };
        (coordinator, command_rx)
    }

    /// Seed reassignment randomness of every master created here.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            local: self.local.clone(),
            command_tx: self.command_tx.clone(),
            jobs: self.jobs.clone(),
            role: self.role.clone(),
        }
    }

    /// Run until `shutdown` fires or the cluster event stream closes.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CoordinatorCommand>,
        mut events: mpsc::UnboundedReceiver<ClusterEvent>,
        shutdown: CancellationToken,
    ) {
        let publisher = self.outbox_rx.take().map(|rx| {
            let cluster = self.cluster.clone();
            let snapshots = self.snapshots.clone();
            tokio::spawn(publish_loop(cluster, snapshots, rx))
        });

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut work = tokio::time::interval(self.config.work_interval());
        work.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(node = %self.local, "Coordinator started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node = %self.local, "Coordinator shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            tracing::info!(node = %self.local, "Cluster event stream closed");
                            break;
                        }
                    }
                }
                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                }
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
                _ = work.tick() => {
                    self.work().await;
                }
            }
        }

        // Closing the outbox lets the publisher drain what is queued and exit.
        drop(self);
        if let Some(publisher) = publisher {
            let _ = publisher.await;
        }
    }

    async fn handle_event(&mut self, event: ClusterEvent) {
        match event {
            ClusterEvent::BecameLeader => self.become_leader().await,
            ClusterEvent::BecameFollower => self.become_follower().await,
            ClusterEvent::NodeLeft(node) => self.node_left(node).await,
            ClusterEvent::Message { from, payload } => match Message::decode(&payload) {
                Ok(message) => self.handle_message(from, message).await,
                Err(e) => {
                    tracing::warn!(from = %from, error = %e, "Dropping undecodable message");
                }
            },
        }
    }

    async fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::CreateJob {
                name,
                options,
                response_tx,
            } => {
                let result = self.create_job(name, options).await;
                let _ = response_tx.send(result);
            }
            CoordinatorCommand::CancelJob { job_id, response_tx } => {
                let result = self.cancel_job(job_id).await;
                let _ = response_tx.send(result);
            }
        }
    }

    async fn is_leader(&self) -> bool {
        *self.role.read().await == NodeRole::Leader
    }

    fn new_master(&self, master: MasterJob) -> MasterJob {
        match self.seed {
            Some(seed) => master.with_seed(seed),
            None => master,
        }
    }

    fn publish(&self, batch: Vec<Outbound>) {
        if batch.is_empty() {
            return;
        }
        if self.outbox.send(batch).is_err() {
            tracing::warn!(node = %self.local, "Publisher stopped, dropping outbound batch");
        }
    }

    /// Promote every client job and take over stored jobs nobody holds yet.
    async fn become_leader(&mut self) {
        if self.is_leader().await {
            return;
        }
        tracing::info!(node = %self.local, "Became leader");

        let workers = self.cluster.workers().await;
        let mut stored = self.load_snapshots().await;
        let now = Utc::now();
        let mut batch = Vec::new();

        let mut jobs = self.jobs.write().await;
        for role in jobs.drain() {
            let master = match role {
                JobRole::Master(master) => master,
                JobRole::Client(client) => {
                    let snapshot = stored.remove(&client.id());
                    promote(
                        client,
                        snapshot,
                        self.local.clone(),
                        self.policy.clone(),
                        &workers,
                        now,
                    )
                }
            };
            jobs.insert(JobRole::Master(self.new_master(master)));
        }

        for (id, job) in stored {
            if job.complete || jobs.is_finished(&id) {
                batch.push(Outbound::Remove(id));
                continue;
            }
            if let Err(e) = self.registry.resolve(&job.name) {
                tracing::warn!(job_id = %id, error = %e, "Not recovering stored job");
                continue;
            }
            tracing::info!(job_id = %id, ranges = job.ranges.len(), "Recovering job from store");
            let master = MasterJob::recover(job, self.local.clone(), self.policy.clone(), &workers, now);
            jobs.insert(JobRole::Master(self.new_master(master)));
        }
        drop(jobs);

        *self.role.write().await = NodeRole::Leader;
        self.publish(batch);
    }

    /// Demote masters and pick up stored jobs as clients.
    async fn become_follower(&mut self) {
        tracing::info!(node = %self.local, "Became follower");
        *self.role.write().await = NodeRole::Follower;

        let stored = self.load_snapshots().await;
        let mut jobs = self.jobs.write().await;
        for role in jobs.drain() {
            let client = match role {
                JobRole::Master(master) => demote(master, self.local.clone()),
                JobRole::Client(client) => client,
            };
            jobs.insert(JobRole::Client(client));
        }

        for (id, job) in stored {
            if job.complete || jobs.is_finished(&id) {
                continue;
            }
            match jobs.get_mut(&id).and_then(JobRole::as_client_mut) {
                Some(client) => client.update(job),
                None => match self.registry.client(job, self.local.clone()) {
                    Ok(client) => {
                        tracing::debug!(job_id = %id, "Loaded stored job as client");
                        jobs.insert(JobRole::Client(client));
                    }
                    Err(e) => tracing::warn!(job_id = %id, error = %e, "Ignoring stored job"),
                },
            }
        }
    }

    async fn load_snapshots(&self) -> HashMap<Uuid, Job> {
        match self.snapshots.load_all().await {
            Ok(jobs) => jobs.into_iter().map(|job| (job.id, job)).collect(),
            Err(e) => {
                tracing::warn!(node = %self.local, error = %e, "Failed to load job snapshots");
                HashMap::new()
            }
        }
    }

    async fn node_left(&mut self, node: NodeAddress) {
        if !self.is_leader().await {
            return;
        }
        let workers = self.cluster.workers().await;
        let mut jobs = self.jobs.write().await;
        for role in jobs.iter_mut() {
            if let Some(master) = role.as_master_mut() {
                master.reassign_node(&node, &workers);
            }
        }
    }

    async fn handle_message(&mut self, from: NodeAddress, message: Message) {
        tracing::trace!(from = %from, event = message.event_name(), "Received message");
        let leader = self.is_leader().await;
        let now = Utc::now();

        match message {
            Message::Create { name, options } => {
                if !leader {
                    tracing::debug!(from = %from, "Ignoring job creation sent to a follower");
                    return;
                }
                if let Err(e) = self.start_job(name, options).await {
                    tracing::warn!(from = %from, error = %e, "Forwarded job creation failed");
                }
            }
            Message::Assign { job, range } => {
                if leader {
                    return;
                }
                self.accept_assignment(job, range).await;
            }
            Message::Report(reports) => {
                if !leader {
                    return;
                }
                let mut jobs = self.jobs.write().await;
                for (id, ranges) in reports {
                    match jobs.get_mut(&id).and_then(JobRole::as_master_mut) {
                        Some(master) => master.update_range(ranges, now),
                        None => tracing::debug!(job_id = %id, from = %from, "Report for unknown job"),
                    }
                }
            }
            Message::Status(job) => {
                if leader {
                    return;
                }
                let id = job.id;
                let mut jobs = self.jobs.write().await;
                if job.complete {
                    jobs.finish(id, Some(job));
                    return;
                }
                if jobs.is_finished(&id) {
                    return;
                }
                match jobs.get_mut(&id).and_then(JobRole::as_client_mut) {
                    Some(client) => client.update(job),
                    None => {
                        if let Ok(client) = self.registry.client(job, self.local.clone()) {
                            jobs.insert(JobRole::Client(client));
                        }
                    }
                }
            }
            Message::Complete(id) => {
                if leader {
                    return;
                }
                tracing::debug!(job_id = %id, "Job complete");
                self.jobs.write().await.finish(id, None);
            }
        }
    }

    async fn accept_assignment(&mut self, job: Job, range: RangeRef) {
        let id = job.id;
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        if jobs.is_finished(&id) {
            return;
        }
        if let Some(client) = jobs.get_mut(&id).and_then(JobRole::as_client_mut) {
            client.assign(range, now);
            return;
        }
        match self.registry.client(job, self.local.clone()) {
            Ok(mut client) => {
                client.assign(range, now);
                jobs.insert(JobRole::Client(client));
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Rejecting assignment"),
        }
    }

    async fn create_job(&mut self, name: String, options: JobOptions) -> Result<CreateOutcome> {
        self.registry.check(&name, &options)?;

        if !self.is_leader().await {
            let Some(leader) = self.cluster.leader().await else {
                return Err(PolarisError::NotLeader(None));
            };
            self.cluster
                .write_to(Target::Leader, &Message::Create { name, options })
                .await?;
            tracing::info!(leader = %leader, "Forwarded job creation to leader");
            return Ok(CreateOutcome::Forwarded);
        }

        let id = self.start_job(name, options).await?;
        Ok(CreateOutcome::Created(id))
    }

    /// Partition a new job over the current workers and dispatch it.
    async fn start_job(&mut self, name: String, options: JobOptions) -> Result<Uuid> {
        let master = self
            .registry
            .master(&name, options, self.local.clone(), self.policy.clone())?;
        let mut master = self.new_master(master);

        let workers = self.cluster.workers().await;
        let now = Utc::now();
        master.partition(&workers, now)?;
        let tick = master.heartbeat(&workers, now);

        let id = master.id();
        tracing::info!(
            job_id = %id,
            name = %name,
            ranges = master.job().ranges.len(),
            "Job started"
        );
        let batch = outbound_for(master.job(), &tick);
        self.jobs.write().await.insert(JobRole::Master(master));
        self.publish(batch);
        Ok(id)
    }

    async fn cancel_job(&mut self, job_id: Uuid) -> Result<()> {
        if !self.is_leader().await {
            return Err(PolarisError::NotLeader(self.cluster.leader().await));
        }
        let mut jobs = self.jobs.write().await;
        let master = jobs
            .get_mut(&job_id)
            .and_then(JobRole::as_master_mut)
            .ok_or(PolarisError::JobNotFound(job_id))?;
        master.cancel();
        Ok(())
    }

    async fn heartbeat(&mut self) {
        let batch = if self.is_leader().await {
            self.leader_heartbeat().await
        } else {
            self.follower_heartbeat().await;
            Vec::new()
        };
        // Sent even when empty: every tick retries failed snapshot deletions.
        if self.outbox.send(batch).is_err() {
            tracing::warn!(node = %self.local, "Publisher stopped, dropping outbound batch");
        }
    }

    /// Tick every master job and return what it needs published.
    async fn leader_heartbeat(&mut self) -> Vec<Outbound> {
        let workers = self.cluster.workers().await;
        let now = Utc::now();
        let mut batch = Vec::new();
        let mut completed = Vec::new();

        let mut jobs = self.jobs.write().await;
        for id in jobs.ids() {
            let Some(master) = jobs.get_mut(&id).and_then(JobRole::as_master_mut) else {
                continue;
            };
            let tick = master.heartbeat(&workers, now);
            tracing::trace!(
                job_id = %id,
                dispatched = tick.dispatches.len(),
                reassigned = tick.reassigned.len(),
                aborted = tick.aborted.len(),
                "Master tick"
            );
            batch.extend(outbound_for(master.job(), &tick));
            if tick.complete {
                let job = master.job();
                tracing::info!(
                    job_id = %id,
                    done = job.done_units(),
                    total = job.end.saturating_sub(job.start),
                    "Job complete"
                );
                completed.push(id);
            }
        }
        for id in completed {
            jobs.finish(id, None);
        }
        batch
    }

    async fn follower_heartbeat(&mut self) {
        let mut reports = HashMap::new();
        {
            let mut jobs = self.jobs.write().await;
            for role in jobs.iter_mut() {
                if let Some(client) = role.as_client_mut() {
                    let updates = client.take_updates();
                    if !updates.is_empty() {
                        reports.insert(client.id(), updates);
                    }
                }
            }
        }
        if reports.is_empty() {
            return;
        }

        let message = Message::Report(reports);
        let Err(e) = self.cluster.write_to(Target::Leader, &message).await else {
            return;
        };
        tracing::warn!(node = %self.local, error = %e, "Failed to send progress report");

        let Message::Report(reports) = message else {
            return;
        };
        let mut jobs = self.jobs.write().await;
        for (id, ranges) in reports {
            if let Some(client) = jobs.get_mut(&id).and_then(JobRole::as_client_mut) {
                client.restore_updates(ranges.into_iter().map(|r| r.range_id));
            }
        }
    }

    /// Execute one unit on every client job.
    async fn work(&mut self) {
        if self.is_leader().await {
            return;
        }
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        for role in jobs.iter_mut() {
            let Some(client) = role.as_client_mut() else {
                continue;
            };
            advance(&self.registry, client, now);
        }
    }
}

fn advance(registry: &JobRegistry, client: &mut ClientJob, now: chrono::DateTime<Utc>) {
    match registry.resolve(&client.job().name) {
        Ok(behavior) => {
            client.advance(behavior.as_ref(), now);
        }
        Err(e) => tracing::trace!(job_id = %client.id(), error = %e, "No behavior for job"),
    }
}

/// Messages and store writes announcing the outcome of a master tick.
fn outbound_for(job: &Job, tick: &Tick) -> Vec<Outbound> {
    let mut batch: Vec<Outbound> = tick
        .dispatches
        .iter()
        .map(|assignment| Outbound::Send {
            target: Target::Node(assignment.node.clone()),
            message: Message::Assign {
                job: job.clone(),
                range: assignment.range.clone(),
            },
        })
        .collect();

    if tick.complete {
        batch.push(Outbound::Remove(job.id));
        batch.push(Outbound::Send {
            target: Target::Followers,
            message: Message::Status(job.clone()),
        });
        batch.push(Outbound::Send {
            target: Target::Followers,
            message: Message::Complete(job.id),
        });
    } else {
        batch.push(Outbound::Save(job.clone()));
        batch.push(Outbound::Send {
            target: Target::Followers,
            message: Message::Status(job.clone()),
        });
    }
    batch
}

/// Apply outbound batches in arrival order. Failed snapshot deletions are
/// retried before each later batch, and the heartbeat sends one every tick;
/// failed saves and sends are left for the next tick, which carries fresher
/// state anyway.
async fn publish_loop(
    cluster: Arc<dyn Cluster>,
    snapshots: JobSnapshots,
    mut outbox: mpsc::UnboundedReceiver<Vec<Outbound>>,
) {
    let mut pending_removes: Vec<Uuid> = Vec::new();

    while let Some(batch) = outbox.recv().await {
        let mut still_pending = Vec::new();
        for id in pending_removes.drain(..) {
            if snapshots.remove(id).await.is_err() {
                still_pending.push(id);
            }
        }
        pending_removes = still_pending;

        for outbound in batch {
            match outbound {
                Outbound::Send { target, message } => {
                    if let Err(e) = cluster.write_to(target.clone(), &message).await {
                        tracing::warn!(
                            event = message.event_name(),
                            target = ?target,
                            error = %e,
                            "Send failed"
                        );
                    }
                }
                Outbound::Save(job) => {
                    if let Err(e) = snapshots.save(&job).await {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to persist job snapshot");
                    }
                }
                Outbound::Remove(id) => {
                    if let Err(e) = snapshots.remove(id).await {
                        tracing::warn!(job_id = %id, error = %e, "Failed to delete job snapshot, will retry");
                        pending_removes.push(id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeAddress;
    use crate::job::Range;

    #[test]
    fn outbound_saves_and_broadcasts_running_job() {
        let mut job = Job::new("test", JobOptions::new(0, 4));
        job.ranges.push(Range::new(
            "r0".into(),
            NodeAddress::new("a"),
            0,
            4,
            Utc::now(),
        ));
        let tick = Tick {
            dispatches: vec![crate::job::Assignment {
                node: NodeAddress::new("a"),
                job_id: job.id,
                range: job.ranges[0].to_ref(),
            }],
            ..Default::default()
        };

        let batch = outbound_for(&job, &tick);
        assert_eq!(batch.len(), 3);
        assert!(matches!(
            &batch[0],
            Outbound::Send { target: Target::Node(n), message: Message::Assign { .. } } if n.as_str() == "a"
        ));
        assert!(matches!(&batch[1], Outbound::Save(_)));
        assert!(matches!(
            &batch[2],
            Outbound::Send { target: Target::Followers, message: Message::Status(_) }
        ));
    }

    #[test]
    fn outbound_for_complete_job_removes_snapshot() {
        let job = Job::new("test", JobOptions::new(0, 4));
        let tick = Tick {
            complete: true,
            ..Default::default()
        };
        let batch = outbound_for(&job, &tick);
        assert!(matches!(&batch[0], Outbound::Remove(id) if *id == job.id));
        assert!(matches!(
            &batch[2],
            Outbound::Send { message: Message::Complete(id), .. } if *id == job.id
        ));
    }

    #[test]
    fn node_role_display() {
        assert_eq!(NodeRole::Leader.to_string(), "leader");
        assert_eq!(
            serde_json::to_string(&NodeRole::Follower).unwrap(),
            "\"follower\""
        );
    }
}
