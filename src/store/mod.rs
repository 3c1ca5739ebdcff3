//! Durable key/value storage for job snapshots.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::job::Job;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Namespace for job snapshot keys.
pub const JOB_KEY_PREFIX: &str = "polaris:job:";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable")]
    Unavailable,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Every entry whose key starts with `prefix`.
    async fn get_all(&self, prefix: &str) -> Result<BTreeMap<String, Value>, StoreError>;
}

/// Open the store selected by `config`.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match &config.data_dir {
        Some(dir) => Ok(Arc::new(FileStore::open(dir).await?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Typed access to job snapshots under [`JOB_KEY_PREFIX`].
#[derive(Clone)]
pub struct JobSnapshots {
    store: Arc<dyn Store>,
}

impl JobSnapshots {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn key(job_id: Uuid) -> String {
        format!("{}{}", JOB_KEY_PREFIX, job_id)
    }

    pub async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let value = serde_json::to_value(job)?;
        self.store.set(&Self::key(job.id), value).await
    }

    pub async fn load(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        match self.store.get(&Self::key(job_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Every stored job. Records that fail to decode are skipped.
    pub async fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        let entries = self.store.get_all(JOB_KEY_PREFIX).await?;
        let mut jobs = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_value::<Job>(value) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping undecodable job snapshot"),
            }
        }
        Ok(jobs)
    }

    pub async fn remove(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.store.delete(&Self::key(job_id)).await
    }
}
