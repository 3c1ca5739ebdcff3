use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::WorkLog;
use crate::cluster::NodeAddress;
use crate::error::{PolarisError, Result};
use crate::job::client::ClientJob;
use crate::job::master::{MasterJob, MasterPolicy};
use crate::job::state::{Job, JobOptions};

/// What a job behavior sees when executing a unit.
#[derive(Debug)]
pub struct WorkContext<'a> {
    pub job_id: Uuid,
    pub name: &'a str,
    pub metadata: &'a HashMap<String, Value>,
    pub node: &'a NodeAddress,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct WorkError(String);

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Executable behavior of a job type.
pub trait JobBehavior: Send + Sync {
    /// Perform the unit of work at `point`. An error fails the whole range.
    fn execute(&self, ctx: &WorkContext<'_>, point: i64) -> std::result::Result<(), WorkError>;

    /// Reject options this job type cannot run with.
    fn validate(&self, _options: &JobOptions) -> Result<()> {
        Ok(())
    }
}

/// Job types known to this process, keyed by name. Built once at startup and
/// shared read-only.
#[derive(Default)]
pub struct JobRegistry {
    behaviors: HashMap<String, Arc<dyn JobBehavior>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, behavior: Arc<dyn JobBehavior>) -> &mut Self {
        let name = name.into();
        tracing::debug!(job_type = %name, "Job type registered");
        self.behaviors.insert(name, behavior);
        self
    }

    pub fn with(mut self, name: impl Into<String>, behavior: Arc<dyn JobBehavior>) -> Self {
        self.register(name, behavior);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobBehavior>> {
        self.behaviors
            .get(name)
            .cloned()
            .ok_or_else(|| PolarisError::UnknownJobType(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.behaviors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate a creation request.
    pub fn check(&self, name: &str, options: &JobOptions) -> Result<()> {
        let behavior = self.resolve(name)?;
        options.validate()?;
        behavior.validate(options)
    }

    /// Build the master role for a new job.
    pub fn master(
        &self,
        name: &str,
        options: JobOptions,
        leader: NodeAddress,
        policy: MasterPolicy,
    ) -> Result<MasterJob> {
        self.check(name, &options)?;
        Ok(MasterJob::new(Job::new(name, options), leader, policy))
    }

    /// Build the client role for a job received from the leader.
    pub fn client(&self, job: Job, local: NodeAddress) -> Result<ClientJob> {
        self.resolve(&job.name)?;
        Ok(ClientJob::new(job, local))
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("types", &self.names())
            .finish()
    }
}

/// The `test` job: records every executed point into a shared work log.
#[derive(Debug, Clone)]
pub struct RecordingJob {
    log: WorkLog,
}

impl RecordingJob {
    pub const NAME: &'static str = "test";

    pub fn new(log: WorkLog) -> Self {
        Self { log }
    }
}

impl JobBehavior for RecordingJob {
    fn execute(&self, ctx: &WorkContext<'_>, point: i64) -> std::result::Result<(), WorkError> {
        tracing::trace!(job_id = %ctx.job_id, node = %ctx.node, point, "Worked on point");
        self.log.record(ctx.node.clone(), point);
        Ok(())
    }

    fn validate(&self, options: &JobOptions) -> Result<()> {
        if options.span().map_or(true, |span| span > 10_000_000) {
            return Err(PolarisError::InvalidJob(
                "test jobs are limited to 10,000,000 points".to_string(),
            ));
        }
        Ok(())
    }
}
