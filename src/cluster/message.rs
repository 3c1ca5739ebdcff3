use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{Job, JobOptions, Range, RangeRef};

/// Job-layer wire messages. Encoded as `{"event": ..., "payload": ...}` JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Message {
    /// Follower to leader: create a job on the caller's behalf
    #[serde(rename = "job:create")]
    Create { name: String, options: JobOptions },

    /// Leader to worker: take ownership of a range
    #[serde(rename = "job:assign", alias = "job:new")]
    Assign { job: Job, range: RangeRef },

    /// Worker to leader: ranges touched since the last report, by job
    #[serde(rename = "job:report")]
    Report(HashMap<Uuid, Vec<Range>>),

    /// Leader to followers: authoritative job snapshot
    #[serde(rename = "job:status")]
    Status(Job),

    #[serde(rename = "job:complete")]
    Complete(Uuid),
}

impl Message {
    pub fn event_name(&self) -> &'static str {
        match self {
            Message::Create { .. } => "job:create",
            Message::Assign { .. } => "job:assign",
            Message::Report(_) => "job:report",
            Message::Status(_) => "job:status",
            Message::Complete(_) => "job:complete",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
