use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{self, ApiState};
use crate::cluster::{Cluster, ClusterError, MemoryNetwork, NodeAddress};
use crate::config::{JobConfig, NodeConfig};
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::job::JobRegistry;
use crate::store::Store;

/// A running node: cluster membership, coordinator loop and optional API.
pub struct Node {
    config: NodeConfig,
    handle: CoordinatorHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Join `network` and spawn this node's subsystems:
    /// 1. the coordinator loop (role changes, messages, heartbeat, work)
    /// 2. the HTTP API, when `config.api_addr` is set
    pub async fn start(
        config: NodeConfig,
        network: &MemoryNetwork,
        registry: Arc<JobRegistry>,
        store: Arc<dyn Store>,
        seed: Option<u64>,
    ) -> Self {
        let (cluster, events) = network.join(config.address.clone()).await;
        let cluster: Arc<dyn Cluster> = Arc::new(cluster);

        let (mut coordinator, commands) =
            Coordinator::new(config.job.clone(), registry, cluster.clone(), store);
        if let Some(seed) = seed {
            coordinator = coordinator.with_seed(seed);
        }
        let handle = coordinator.handle();
        let shutdown = CancellationToken::new();

        let mut tasks = Vec::new();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            coordinator.run(commands, events, token).await;
        }));

        if let Some(api_addr) = config.api_addr {
            let state = ApiState {
                handle: handle.clone(),
                cluster,
            };
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = api::serve(api_addr, state, token).await {
                    tracing::error!(addr = %api_addr, error = %e, "API server failed");
                }
            }));
        }

        Self {
            config,
            handle,
            shutdown,
            tasks,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.config.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    /// Stop every subsystem and wait for them to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Several nodes sharing one in-process network and one store.
pub struct LocalCluster {
    network: MemoryNetwork,
    registry: Arc<JobRegistry>,
    store: Arc<dyn Store>,
    job: JobConfig,
    nodes: BTreeMap<NodeAddress, Node>,
    seed: Option<u64>,
}

impl LocalCluster {
    pub fn new(job: JobConfig, registry: Arc<JobRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            network: MemoryNetwork::new(),
            registry,
            store,
            job,
            nodes: BTreeMap::new(),
            seed: None,
        }
    }

    /// Seed reassignment randomness on every node (offset by node count).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Start `count` nodes named `node-1..=node-N` and elect `node-1`.
    /// `api_addr`, if given, is served by `node-1`.
    pub async fn boot(&mut self, count: usize, api_addr: Option<SocketAddr>) -> Result<(), ClusterError> {
        for i in 1..=count {
            let address = NodeAddress::new(format!("node-{}", i));
            let mut config = NodeConfig::new(address).with_job_config(self.job.clone());
            if i == 1 {
                config.api_addr = api_addr;
            }
            self.start_node(config).await;
        }
        self.network.elect(&NodeAddress::new("node-1")).await
    }

    pub async fn start_node(&mut self, config: NodeConfig) -> CoordinatorHandle {
        let seed = self.seed.map(|s| s.wrapping_add(self.nodes.len() as u64));
        let node = Node::start(
            config,
            &self.network,
            self.registry.clone(),
            self.store.clone(),
            seed,
        )
        .await;
        let handle = node.handle().clone();
        self.nodes.insert(node.address().clone(), node);
        handle
    }

    /// Crash a node: it leaves the network and its in-memory state is lost.
    /// Returns the node's config so it can be restarted.
    pub async fn kill(&mut self, address: &NodeAddress) -> Option<NodeConfig> {
        let node = self.nodes.remove(address)?;
        tracing::info!(node = %address, "Killing node");
        self.network.leave(address).await;
        let config = node.config().clone();
        node.stop().await;
        Some(config)
    }

    /// Kill a node and start a fresh one under the same address.
    pub async fn restart(&mut self, address: &NodeAddress) -> Option<CoordinatorHandle> {
        let config = self.kill(address).await?;
        Some(self.start_node(config).await)
    }

    pub fn handle(&self, address: &NodeAddress) -> Option<CoordinatorHandle> {
        self.nodes.get(address).map(|n| n.handle().clone())
    }

    pub async fn leader_handle(&self) -> Option<CoordinatorHandle> {
        let leader = self.network.leader().await?;
        self.handle(&leader)
    }

    /// Whether any running node has seen the job finish.
    pub async fn is_finished(&self, job_id: Uuid) -> bool {
        for node in self.nodes.values() {
            if node.handle().is_finished(job_id).await {
                return true;
            }
        }
        false
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.nodes.keys().cloned().collect()
    }

    /// Restart one randomly chosen node that does not serve the API.
    pub async fn chronic_tick<R: Rng>(&mut self, rng: &mut R) -> Option<NodeAddress> {
        let candidates: Vec<NodeAddress> = self
            .nodes
            .values()
            .filter(|n| n.config().api_addr.is_none())
            .map(|n| n.address().clone())
            .collect();
        let victim = candidates.choose(rng)?.clone();
        tracing::info!(node = %victim, "Worker died of a chronic condition");
        self.restart(&victim).await?;
        Some(victim)
    }

    pub async fn shutdown(mut self) {
        let addresses: Vec<NodeAddress> = self.nodes.keys().cloned().collect();
        for address in addresses {
            if let Some(node) = self.nodes.remove(&address) {
                node.stop().await;
            }
        }
    }
}
