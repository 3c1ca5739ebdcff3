use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cluster::NodeAddress;

/// Timing and policy knobs for range jobs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Interval of the coordinator heartbeat (master maintenance / follower reports)
    pub heartbeat_interval_ms: u64,
    /// A WORKING range silent for longer than this is presumed dead
    pub stale_timeout_ms: u64,
    /// Ensured ranges are aborted once their retry count exceeds this
    pub max_retries: u32,
    /// Partition divides a job into `workers * divisions_per_worker` ranges
    pub divisions_per_worker: usize,
    /// Interval of the client execution tick (one unit of work per tick)
    pub work_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            stale_timeout_ms: 5000,
            max_retries: 5,
            divisions_per_worker: 1,
            work_interval_ms: 10,
        }
    }
}

impl JobConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn work_interval(&self) -> Duration {
        Duration::from_millis(self.work_interval_ms)
    }

    pub fn stale_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stale_timeout_ms as i64)
    }
}

/// Durable snapshot store selection.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Directory for the file store. `None` keeps snapshots in memory.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub address: NodeAddress,
    pub api_addr: Option<SocketAddr>,
    pub job: JobConfig,
    pub store: StoreConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: NodeAddress::new("node-1"),
            api_addr: None,
            job: JobConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn with_api_addr(mut self, addr: SocketAddr) -> Self {
        self.api_addr = Some(addr);
        self
    }

    pub fn with_job_config(mut self, job: JobConfig) -> Self {
        self.job = job;
        self
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.store.data_dir = Some(dir);
        self
    }
}
