//! In-process cluster transport.
//!
//! Every member gets an unbounded channel of [`ClusterEvent`]s. Leadership is
//! decided by whoever drives the network (`elect`), and a departing leader is
//! replaced by the lowest remaining address.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use super::{Cluster, ClusterError, ClusterEvent, Message, NodeAddress, Target};

#[derive(Default)]
struct NetworkState {
    members: BTreeMap<NodeAddress, mpsc::UnboundedSender<ClusterEvent>>,
    leader: Option<NodeAddress>,
}

impl NetworkState {
    fn notify(&self, node: &NodeAddress, event: ClusterEvent) {
        if let Some(tx) = self.members.get(node) {
            // Receiver dropped means the node is shutting down.
            let _ = tx.send(event);
        }
    }

    fn announce_leader(&self) {
        let Some(leader) = &self.leader else {
            return;
        };
        for node in self.members.keys() {
            let event = if node == leader {
                ClusterEvent::BecameLeader
            } else {
                ClusterEvent::BecameFollower
            };
            self.notify(node, event);
        }
    }
}

/// Shared in-memory network connecting [`MemoryCluster`] members.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<RwLock<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. If a leader is already elected the newcomer is told it
    /// is a follower right away.
    pub async fn join(
        &self,
        address: NodeAddress,
    ) -> (MemoryCluster, mpsc::UnboundedReceiver<ClusterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        if state.leader.is_some() {
            let _ = tx.send(ClusterEvent::BecameFollower);
        }
        state.members.insert(address.clone(), tx);
        tracing::info!(node = %address, members = state.members.len(), "Node joined");
        drop(state);

        let cluster = MemoryCluster {
            local: address,
            network: self.clone(),
        };
        (cluster, rx)
    }

    /// Make `address` the leader and tell every member its new role.
    pub async fn elect(&self, address: &NodeAddress) -> Result<(), ClusterError> {
        let mut state = self.state.write().await;
        if !state.members.contains_key(address) {
            return Err(ClusterError::UnknownNode(address.clone()));
        }
        state.leader = Some(address.clone());
        tracing::info!(leader = %address, "Leader elected");
        state.announce_leader();
        Ok(())
    }

    /// Remove a member. Remaining members see `NodeLeft`; if the leader left,
    /// the lowest remaining address takes over.
    pub async fn leave(&self, address: &NodeAddress) {
        let mut state = self.state.write().await;
        if state.members.remove(address).is_none() {
            return;
        }
        tracing::info!(node = %address, "Node left");

        let was_leader = state.leader.as_ref() == Some(address);
        if was_leader {
            state.leader = state.members.keys().next().cloned();
            if let Some(leader) = &state.leader {
                tracing::info!(leader = %leader, "New leader after departure");
            }
        }
        for node in state.members.keys() {
            state.notify(node, ClusterEvent::NodeLeft(address.clone()));
        }
        if was_leader {
            state.announce_leader();
        }
    }

    pub async fn leader(&self) -> Option<NodeAddress> {
        self.state.read().await.leader.clone()
    }

    pub async fn members(&self) -> Vec<NodeAddress> {
        self.state.read().await.members.keys().cloned().collect()
    }
}

/// One member's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryCluster {
    local: NodeAddress,
    network: MemoryNetwork,
}

#[async_trait]
impl Cluster for MemoryCluster {
    fn local(&self) -> &NodeAddress {
        &self.local
    }

    async fn is_leader(&self) -> bool {
        self.network.state.read().await.leader.as_ref() == Some(&self.local)
    }

    async fn leader(&self) -> Option<NodeAddress> {
        self.network.leader().await
    }

    async fn workers(&self) -> Vec<NodeAddress> {
        let state = self.network.state.read().await;
        state
            .members
            .keys()
            .filter(|n| Some(*n) != state.leader.as_ref())
            .cloned()
            .collect()
    }

    async fn write_to(&self, target: Target, message: &Message) -> Result<(), ClusterError> {
        let payload = message.encode()?;
        let state = self.network.state.read().await;
        if !state.members.contains_key(&self.local) {
            return Err(ClusterError::Disconnected);
        }

        let recipients: Vec<&NodeAddress> = match &target {
            Target::Node(node) => {
                if !state.members.contains_key(node) {
                    return Err(ClusterError::UnknownNode(node.clone()));
                }
                vec![node]
            }
            Target::Leader => match &state.leader {
                Some(leader) => vec![leader],
                None => return Err(ClusterError::NoLeader),
            },
            Target::Followers => state
                .members
                .keys()
                .filter(|n| **n != self.local && Some(*n) != state.leader.as_ref())
                .collect(),
            Target::All => state.members.keys().filter(|n| **n != self.local).collect(),
        };

        tracing::trace!(
            from = %self.local,
            event = message.event_name(),
            recipients = recipients.len(),
            "Sending message"
        );
        for node in recipients {
            state.notify(
                node,
                ClusterEvent::Message {
                    from: self.local.clone(),
                    payload: payload.clone(),
                },
            );
        }
        Ok(())
    }
}
