//! File persistent store
//!
//! One JSON document per key, written to a temporary file and renamed into
//! place so a crash never leaves a torn record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use super::{Store, StoreError};

#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    value: Value,
}

pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
            tracing::info!("Created data directory: {:?}", data_dir);
        }
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c == ':' || c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.data_dir.join(format!("{}.json", name))
    }

    async fn read_record(path: &Path) -> Result<Option<Record>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let content = serde_json::to_string(&Record {
            key: key.to_string(),
            value,
        })?;

        let temp_path = self.data_dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, &content).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(Self::read_record(&self.path_for(key))
            .await?
            .filter(|record| record.key == key)
            .map(|record| record.value))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all(&self, prefix: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        let mut entries = BTreeMap::new();
        let mut dir = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) if record.key.starts_with(prefix) => {
                    entries.insert(record.key, record.value);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(path = ?path, error = %e, "Skipping unreadable record"),
            }
        }
        Ok(entries)
    }
}
