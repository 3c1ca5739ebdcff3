use thiserror::Error;
use uuid::Uuid;

use crate::cluster::{ClusterError, NodeAddress};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PolarisError {
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("No workers available")]
    NoWorkersAvailable,

    #[error("Not the leader, current leader is {0:?}")]
    NotLeader(Option<NodeAddress>),

    #[error("Range {range_id} stopped reporting")]
    RangeStale { range_id: String },

    #[error("Range {range_id} aborted after {retries} retries")]
    RangeRetriesExhausted { range_id: String, retries: u32 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Coordinator is not running")]
    CoordinatorStopped,
}

pub type Result<T> = std::result::Result<T, PolarisError>;
