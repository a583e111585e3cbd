//! A running rs-wasp node.
//!
//! [`Node`] ties the store, the peer network, the ledger connection and the
//! committee registry together. It is created either with TCP peering from
//! the configuration ([`Node::new`]) or on top of any [`PeerNetwork`]
//! ([`Node::with_network`]), which in-process clusters use.

use crate::committees::Committees;
use crate::config::AppConfig;
use crate::context::NodeContext;
use crate::ledger::{EventSink, InMemoryLedger, LedgerHandle};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use wasp_committee::{Committee, CommitteeImpl, CommitteeStatus};
use wasp_common::Address;
use wasp_db::KvStore;
use wasp_peering::{MessageRouter, PeerNetwork, PeeringManager};

pub struct Node {
    ctx: Arc<NodeContext>,
    committees: Arc<Committees>,
    ledger: Arc<LedgerHandle>,
    peering: Option<Arc<PeeringManager>>,
}

impl Node {
    /// Node with TCP peering and a store opened from the configuration.
    pub fn new(config: AppConfig, ledger: &InMemoryLedger) -> anyhow::Result<Self> {
        config.validate()?;
        let store = NodeContext::open_store(&config.database)?;
        let peering = Arc::new(PeeringManager::new(config.peering_config()));
        let mut node = Self::with_network(config, store, peering.clone(), ledger)?;
        peering.set_router(node.committees.clone());
        node.peering = Some(peering);
        Ok(node)
    }

    /// Node on top of an existing network. The caller routes inbound
    /// messages to [`Node::router`].
    pub fn with_network(
        config: AppConfig,
        store: Arc<dyn KvStore>,
        network: Arc<dyn PeerNetwork>,
        ledger: &InMemoryLedger,
    ) -> anyhow::Result<Self> {
        let handle = ledger.connect();
        let ctx = Arc::new(NodeContext::new(config, store, network, handle.clone())?);
        let committees = Arc::new(Committees::new(ctx.clone()));
        let sink: Arc<dyn EventSink> = committees.clone();
        handle.set_sink(Arc::downgrade(&sink));
        Ok(Self {
            ctx,
            committees,
            ledger: handle,
            peering: None,
        })
    }

    /// Start peering, seed the ledger with stored origins and start every
    /// active committee.
    pub async fn start(&self) -> anyhow::Result<usize> {
        if let Some(peering) = &self.peering {
            peering.start().await?;
        }
        self.seed_ledger()?;
        let running = self.committees.activate_all()?;
        info!(
            node = %self.ctx.config.node.name,
            location = %self.location(),
            committees = running,
            "Node started"
        );
        Ok(running)
    }

    /// Register the origin of every stored contract the ledger does not
    /// know yet.
    fn seed_ledger(&self) -> anyhow::Result<()> {
        let ledger = self.ledger.ledger();
        for bootup in self.ctx.registry.bootup_records()? {
            if ledger.state_index(&bootup.address).is_some() {
                continue;
            }
            let Some(origin) = self.ctx.registry.get_origin_transaction(&bootup.address)? else {
                continue;
            };
            let key_set = self
                .ctx
                .registry
                .get_dkshare(&bootup.address)?
                .map(|share| share.key_set().clone());
            let mut balances = wasp_state::Balances::new();
            balances.insert(bootup.color, crate::dev::DEV_SUPPLY);
            if let Err(e) = ledger.create_contract(origin, key_set, balances) {
                warn!(address = %bootup.address.short(), error = %e, "Could not seed ledger");
            }
        }
        Ok(())
    }

    /// Activate a stored contract and start its committee.
    pub fn activate(&self, address: &Address) -> anyhow::Result<Arc<CommitteeImpl>> {
        let bootup = self.ctx.registry.set_active(address, true)?;
        self.committees.activate(&bootup)
    }

    /// Deactivate a stored contract and dismiss its committee.
    pub async fn deactivate(&self, address: &Address) -> anyhow::Result<bool> {
        self.ctx.registry.set_active(address, false)?;
        Ok(self.committees.dismiss(address).await)
    }

    pub async fn shutdown(&self) {
        self.committees.dismiss_all().await;
        if let Some(peering) = &self.peering {
            peering.shutdown().await;
        }
        info!(node = %self.ctx.config.node.name, "Node stopped");
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn committees(&self) -> &Arc<Committees> {
        &self.committees
    }

    pub fn committee(&self, address: &Address) -> Option<Arc<CommitteeImpl>> {
        self.committees.get(address)
    }

    /// Inbound side for networks that do not route by themselves.
    pub fn router(&self) -> Arc<dyn MessageRouter> {
        self.committees.clone()
    }

    pub fn ledger(&self) -> &InMemoryLedger {
        self.ledger.ledger()
    }

    pub fn location(&self) -> &str {
        self.ctx.network.my_location()
    }

    pub fn info(&self) -> NodeInfo {
        let committees = self
            .committees
            .addresses()
            .into_iter()
            .filter_map(|address| self.committees.get(&address))
            .map(|c| CommitteeInfo {
                address: *c.address(),
                own_index: c.own_peer_index(),
                size: c.size(),
                quorum: c.quorum(),
                alive_peers: (0..c.size()).filter(|i| c.is_alive_peer(*i)).count() as u16,
                status: c.status(),
            })
            .collect();
        NodeInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            node_name: self.ctx.config.node.name.clone(),
            location: self.location().to_string(),
            database: if self.ctx.config.database.in_memory {
                "in-memory".to_string()
            } else {
                self.ctx.config.database.path.display().to_string()
            },
            connected_peers: self.peering.as_ref().map(|p| p.connected_count()),
            committees,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("location", &self.location())
            .field("committees", &self.committees.len())
            .finish()
    }
}

/// One committee as shown by [`NodeInfo`].
#[derive(Debug, Clone)]
pub struct CommitteeInfo {
    pub address: Address,
    pub own_index: u16,
    pub size: u16,
    pub quorum: u16,
    pub alive_peers: u16,
    pub status: CommitteeStatus,
}

/// Printable summary of a node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub version: String,
    pub node_name: String,
    pub location: String,
    pub database: String,
    pub connected_peers: Option<usize>,
    pub committees: Vec<CommitteeInfo>,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rs-wasp {}", self.version)?;
        writeln!(f)?;
        writeln!(f, "Node: {}", self.node_name)?;
        writeln!(f, "Location: {}", self.location)?;
        writeln!(f, "Database: {}", self.database)?;
        if let Some(peers) = self.connected_peers {
            writeln!(f, "Connected peers: {}", peers)?;
        }
        writeln!(f, "Committees: {}", self.committees.len())?;
        for c in &self.committees {
            writeln!(
                f,
                "  {} peer #{} of {} (quorum {}, {} alive) state {} stage {} leader #{} backlog {}",
                c.address.short(),
                c.own_index,
                c.size,
                c.quorum,
                c.alive_peers,
                c.status
                    .solid_index
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                c.status.stage,
                c.status.leader,
                c.status.backlog,
            )?;
        }
        Ok(())
    }
}
