//! Run command implementation for rs-wasp.
//!
//! The run command starts a node, activates its committees and keeps it
//! running until a shutdown signal arrives. It handles:
//!
//! - Store opening and schema checks
//! - Peer connections
//! - Committee activation from the registry
//! - Periodic status logging
//!
//! With a dev cluster it instead runs a whole committee in one process:
//! N nodes on consecutive local ports sharing one in-memory ledger, a
//! counter contract derived from a seed, and a steady stream of requests.
//!
//! ## Usage
//!
//! ```text
//! rs-wasp run                          # Run a single node
//! rs-wasp run --dev-cluster 4          # Run a 4-node committee locally
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use wasp_common::Address;
use wasp_state::{persist, RequestBlock, ScTransaction};
use wasp_vm::builtin::inccounter;

use crate::config::AppConfig;
use crate::dev::DevContract;
use crate::ledger::InMemoryLedger;
use crate::node::Node;

/// Options for a local multi-node committee.
#[derive(Debug, Clone)]
pub struct DevClusterOptions {
    /// Committee size N.
    pub size: u16,
    /// Quorum T. Defaults to the largest minority-proof value, 2N/3 + 1.
    pub quorum: Option<u16>,
    /// Seed the contract and key shares are derived from.
    pub seed: String,
    /// Time between counter requests. Zero disables requests.
    pub request_interval: Duration,
}

impl Default for DevClusterOptions {
    fn default() -> Self {
        Self {
            size: 4,
            quorum: None,
            seed: "rs-wasp dev".to_string(),
            request_interval: Duration::from_secs(5),
        }
    }
}

impl DevClusterOptions {
    pub fn quorum(&self) -> u16 {
        self.quorum.unwrap_or(self.size * 2 / 3 + 1).min(self.size)
    }
}

/// Options for the run command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run a local committee instead of a single node.
    pub dev_cluster: Option<DevClusterOptions>,
    /// How often the status of every committee is logged.
    pub status_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dev_cluster: None,
            status_interval: Duration::from_secs(30),
        }
    }
}

/// Run with the given configuration and options.
pub async fn run_node(config: AppConfig, options: RunOptions) -> anyhow::Result<()> {
    tracing::info!(
        node_name = %config.node.name,
        location = %config.node.location,
        dev_cluster = options.dev_cluster.as_ref().map(|d| d.size).unwrap_or(0),
        "Starting rs-wasp"
    );
    config.validate()?;

    let ledger = InMemoryLedger::new(Duration::from_millis(config.ledger.confirm_delay_ms));
    let (nodes, contract) = match &options.dev_cluster {
        Some(dev) => {
            let (nodes, contract) = start_dev_cluster(&config, dev, &ledger).await?;
            (nodes, Some(contract))
        }
        None => {
            let node = Node::new(config, &ledger)?;
            node.start().await?;
            (vec![node], None)
        }
    };
    let nodes: Vec<Arc<Node>> = nodes.into_iter().map(Arc::new).collect();

    for node in &nodes {
        print!("{}", node.info());
    }

    let requests = match (&contract, &options.dev_cluster) {
        (Some(contract), Some(dev)) if !dev.request_interval.is_zero() => Some(tokio::spawn(
            post_counter_requests(ledger.clone(), contract.address(), dev.request_interval),
        )),
        _ => None,
    };

    let mut status = interval(options.status_interval.max(Duration::from_secs(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);
    status.tick().await;
    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = status.tick() => log_status(&nodes, contract.as_ref()),
        }
    }

    tracing::info!("Shutdown signal received");
    if let Some(handle) = requests {
        handle.abort();
    }
    for node in &nodes {
        node.shutdown().await;
    }
    tracing::info!("Node stopped gracefully");
    Ok(())
}

/// Start `dev.size` nodes on consecutive ports from the configured listen
/// port, install the dev contract on each and start them.
pub async fn start_dev_cluster(
    config: &AppConfig,
    dev: &DevClusterOptions,
    ledger: &InMemoryLedger,
) -> anyhow::Result<(Vec<Node>, DevContract)> {
    if dev.size == 0 {
        anyhow::bail!("dev cluster needs at least one node");
    }
    let listen: std::net::SocketAddr = config.peering.listen_addr.parse()?;
    let base_port = listen.port();
    let locations: Vec<String> = (0..dev.size)
        .map(|i| format!("127.0.0.1:{}", base_port + i))
        .collect();
    let contract = DevContract::generate(&dev.seed, locations.clone(), dev.quorum())?;

    let mut nodes = Vec::with_capacity(locations.len());
    for (i, location) in locations.iter().enumerate() {
        let mut node_config = config.clone();
        node_config.node.name = format!("{}-{}", config.node.name, i);
        node_config.node.location = location.clone();
        node_config.peering.listen_addr = location.clone();
        node_config.database.in_memory = true;
        let node = Node::new(node_config, ledger)?;
        contract.install(&node.context().registry, i as u16, true)?;
        nodes.push(node);
    }
    for node in &nodes {
        node.start().await?;
    }
    tracing::info!(
        address = %contract.address(),
        size = dev.size,
        quorum = dev.quorum(),
        "Dev cluster running"
    );
    Ok((nodes, contract))
}

/// Post an increment request to `address` every `period`.
async fn post_counter_requests(ledger: InMemoryLedger, address: Address, period: Duration) {
    let sender = Address::from_key_material(b"rs-wasp dev client");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut nonce: u64 = 0;
    loop {
        ticker.tick().await;
        nonce += 1;
        let tx = ScTransaction {
            state_block: None,
            requests: vec![RequestBlock::new(address, sender, inccounter::CODE_INC)
                .with_arg("nonce", nonce.to_le_bytes().to_vec())],
            signature: None,
        };
        match ledger.post_request(tx) {
            Ok(txid) => tracing::debug!(txid = %txid, nonce, "Posted counter request"),
            Err(e) => tracing::warn!(error = %e, "Failed to post counter request"),
        }
    }
}

fn log_status(nodes: &[Arc<Node>], contract: Option<&DevContract>) {
    for node in nodes {
        for c in node.info().committees {
            tracing::info!(
                node = %node.location(),
                address = %c.address.short(),
                state_index = ?c.status.solid_index,
                stage = %c.status.stage,
                leader = c.status.leader,
                backlog = c.status.backlog,
                alive = c.alive_peers,
                "Committee status"
            );
        }
    }
    let (Some(contract), Some(node)) = (contract, nodes.first()) else {
        return;
    };
    let partition = node.context().partition(&contract.address());
    match persist::load_solid_state(&partition) {
        Ok(Some(state)) => {
            let counter = state.get_i64(inccounter::VAR_COUNTER).ok().flatten().unwrap_or(0);
            tracing::info!(state_index = state.state_index(), counter, "Counter");
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read contract state"),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
