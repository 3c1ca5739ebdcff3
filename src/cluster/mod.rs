//! Cluster membership and messaging as seen by the job layer.
//!
//! The job layer only needs to know who it is, whether it leads, who the
//! workers are, and how to send a message to a target. Leader election and
//! transport live behind [`Cluster`].

pub mod memory;
pub mod message;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{MemoryCluster, MemoryNetwork};
pub use message::Message;

/// Stable identity of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(NodeAddress),
    Leader,
    /// Every member except the leader and the sender
    Followers,
    /// Every member except the sender
    All,
}

/// Notifications delivered to a member by the cluster layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    BecameLeader,
    BecameFollower,
    NodeLeft(NodeAddress),
    Message { from: NodeAddress, payload: String },
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("No leader elected")]
    NoLeader,

    #[error("Unknown node: {0}")]
    UnknownNode(NodeAddress),

    #[error("Node is disconnected from the cluster")]
    Disconnected,

    #[error("Message encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Cluster: Send + Sync {
    fn local(&self) -> &NodeAddress;

    async fn is_leader(&self) -> bool;

    async fn leader(&self) -> Option<NodeAddress>;

    /// Current members, excluding the leader.
    async fn workers(&self) -> Vec<NodeAddress>;

    async fn write_to(&self, target: Target, message: &Message) -> Result<(), ClusterError>;
}
