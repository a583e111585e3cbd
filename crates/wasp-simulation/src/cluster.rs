//! A whole committee in one process.
//!
//! [`Cluster`] runs N nodes on a [`LocalHub`] against one shared
//! [`InMemoryLedger`], all serving the same dev counter contract.

use crate::network::LocalHub;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::info;
use wasp_app::{ConfigBuilder, DevContract, InMemoryLedger, Node, NodeContext};
use wasp_common::{Address, TxId};
use wasp_state::{persist, RequestBlock, ScTransaction};
use wasp_vm::builtin::inccounter;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub size: u16,
    pub quorum: u16,
    pub seed: String,
    /// Nodes that never start. Their peers see them as unreachable.
    pub silent: Vec<u16>,
    pub confirm_delay: Duration,
    pub timer_tick_ms: u64,
    pub starting_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            size: 4,
            quorum: 3,
            seed: "simulation".to_string(),
            silent: Vec::new(),
            confirm_delay: Duration::from_millis(20),
            timer_tick_ms: 10,
            starting_timeout_ms: 1_000,
        }
    }
}

pub struct Cluster {
    pub hub: Arc<LocalHub>,
    pub ledger: InMemoryLedger,
    pub contract: DevContract,
    pub nodes: Vec<Node>,
    running: Vec<bool>,
    client: Address,
    nonce: u64,
}

impl Cluster {
    pub async fn start(config: ClusterConfig) -> Result<Self> {
        let hub = LocalHub::new();
        let ledger = InMemoryLedger::new(config.confirm_delay);
        let locations: Vec<String> = (0..config.size).map(location).collect();
        let contract = DevContract::generate(&config.seed, locations.clone(), config.quorum)?;

        let mut nodes = Vec::with_capacity(locations.len());
        for (i, loc) in locations.iter().enumerate() {
            let node_config = ConfigBuilder::new()
                .node_name(format!("sim-{}", i))
                .location(loc.clone())
                .in_memory_database()
                .timer_tick_ms(config.timer_tick_ms)
                .starting_timeout_ms(config.starting_timeout_ms)
                .build();
            let store = NodeContext::open_store(&node_config.database)?;
            let node = Node::with_network(node_config, store, hub.network(loc.clone()), &ledger)?;
            contract.install(&node.context().registry, i as u16, true)?;
            nodes.push(node);
        }

        let mut running = vec![false; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            if config.silent.contains(&(i as u16)) {
                continue;
            }
            hub.attach(&locations[i], node.router());
            node.start().await?;
            running[i] = true;
        }
        info!(
            address = %contract.address().short(),
            size = config.size,
            quorum = config.quorum,
            silent = config.silent.len(),
            "Cluster started"
        );
        Ok(Self {
            hub,
            ledger,
            contract,
            nodes,
            running,
            client: Address::from_key_material(format!("{}/client", config.seed).as_bytes()),
            nonce: 0,
        })
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn location(&self, index: u16) -> String {
        location(index)
    }

    pub fn is_running(&self, index: u16) -> bool {
        self.running.get(index as usize).copied().unwrap_or(false)
    }

    /// Post one counter increment to the ledger.
    pub fn post_increment(&mut self) -> Result<TxId> {
        self.nonce += 1;
        let tx = ScTransaction {
            state_block: None,
            requests: vec![RequestBlock::new(self.address(), self.client, inccounter::CODE_INC)
                .with_arg("nonce", self.nonce.to_le_bytes().to_vec())],
            signature: None,
        };
        self.ledger.post_request(tx)
    }

    /// Latest confirmed state index on the ledger.
    pub fn ledger_index(&self) -> Option<u32> {
        self.ledger.state_index(&self.address())
    }

    /// Solid state index stored by node `index`.
    pub fn solid_index(&self, index: u16) -> Option<u32> {
        let node = self.nodes.get(index as usize)?;
        persist::load_solid_state_index(&node.context().partition(&self.address()))
            .ok()
            .flatten()
    }

    /// Counter value in the solid state of node `index`.
    pub fn counter(&self, index: u16) -> Option<i64> {
        let node = self.nodes.get(index as usize)?;
        let state = persist::load_solid_state(&node.context().partition(&self.address()))
            .ok()
            .flatten()?;
        Some(state.get_i64(inccounter::VAR_COUNTER).ok().flatten().unwrap_or(0))
    }

    pub async fn wait_for_ledger_index(&self, index: u32, limit: Duration) -> Result<()> {
        self.wait_until(limit, || self.ledger_index().is_some_and(|i| i >= index))
            .await
            .map_err(|_| anyhow!("ledger did not reach state {} (at {:?})", index, self.ledger_index()))
    }

    /// Wait until every running node holds `value` in its solid state.
    pub async fn wait_for_counter(&self, value: i64, limit: Duration) -> Result<()> {
        let running: Vec<u16> = (0..self.nodes.len() as u16).filter(|i| self.is_running(*i)).collect();
        self.wait_until(limit, || running.iter().all(|i| self.counter(*i) == Some(value)))
            .await
            .map_err(|_| {
                let seen: Vec<Option<i64>> = running.iter().map(|i| self.counter(*i)).collect();
                anyhow!("counter {} not reached, nodes at {:?}", value, seen)
            })
    }

    pub async fn wait_for_solid_index(&self, node: u16, index: u32, limit: Duration) -> Result<()> {
        self.wait_until(limit, || self.solid_index(node).is_some_and(|i| i >= index))
            .await
            .map_err(|_| anyhow!("node {} stuck at {:?}", node, self.solid_index(node)))
    }

    async fn wait_until<F: Fn() -> bool>(&self, limit: Duration, done: F) -> Result<(), ()> {
        timeout(limit, async {
            while !done() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| ())
    }

    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
        self.hub.detach_all();
    }
}

fn location(index: u16) -> String {
    format!("127.0.0.1:{}", 5000 + index)
}
