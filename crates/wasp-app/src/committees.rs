//! The committees a node runs, keyed by contract address.
//!
//! [`Committees`] starts a committee for every active bootup record with
//! a key share, dismisses committees on deactivation and routes inbound
//! peer messages and ledger events to the committee of their address.

use crate::context::NodeContext;
use crate::ledger::EventSink;
use anyhow::Context;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use wasp_committee::{BootupData, Committee, CommitteeEvent, CommitteeImpl, CommitteeParams};
use wasp_common::Address;
use wasp_peering::{MessageRouter, PeerMessage};

pub struct Committees {
    ctx: Arc<NodeContext>,
    committees: DashMap<Address, Arc<CommitteeImpl>>,
}

impl Committees {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            committees: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Start the committee described by `bootup`. Starting a committee that
    /// already runs returns the running one.
    pub fn activate(&self, bootup: &BootupData) -> anyhow::Result<Arc<CommitteeImpl>> {
        // The entry stays locked until the committee is in the map, so the
        // ledger events it subscribes to on start cannot miss it.
        let entry = self.committees.entry(bootup.address);
        if let Entry::Occupied(existing) = &entry {
            if !existing.get().is_dismissed() {
                return Ok(existing.get().clone());
            }
        }
        let share = self
            .ctx
            .registry
            .get_dkshare(&bootup.address)?
            .with_context(|| format!("no key share for {}", bootup.address))?;
        let committee = CommitteeImpl::start(CommitteeParams {
            bootup: bootup.clone(),
            signer: Arc::new(share),
            network: self.ctx.network.clone(),
            node_conn: self.ctx.node_conn.clone(),
            runner: self.ctx.runner.clone(),
            partition: self.ctx.partition(&bootup.address),
            config: self.ctx.committee_config(),
        })
        .with_context(|| format!("starting committee {}", bootup.address))?;
        entry.insert(committee.clone());
        Ok(committee)
    }

    /// Start committees for all active bootup records. A committee that
    /// fails to start is logged and skipped. Returns how many run.
    pub fn activate_all(&self) -> anyhow::Result<usize> {
        let records = self.ctx.registry.bootup_records()?;
        for bootup in records.iter().filter(|b| b.active) {
            if bootup.peer_index(self.ctx.network.my_location()).is_none() {
                debug!(address = %bootup.address.short(), "Not a committee member, skipping");
                continue;
            }
            if let Err(e) = self.activate(bootup) {
                error!(address = %bootup.address.short(), error = %format!("{:#}", e), "Failed to start committee");
            }
        }
        let running = self.committees.len();
        info!(running, records = records.len(), "Committees activated");
        Ok(running)
    }

    /// Dismiss the committee of `address` and wait for its task to stop.
    /// Returns false if none ran.
    pub async fn dismiss(&self, address: &Address) -> bool {
        let Some((_, committee)) = self.committees.remove(address) else {
            return false;
        };
        committee.dismiss();
        committee.join().await;
        true
    }

    pub async fn dismiss_all(&self) {
        let addresses = self.addresses();
        for address in &addresses {
            self.dismiss(address).await;
        }
        if !addresses.is_empty() {
            info!(count = addresses.len(), "All committees dismissed");
        }
    }

    pub fn get(&self, address: &Address) -> Option<Arc<CommitteeImpl>> {
        self.committees.get(address).map(|e| e.value().clone())
    }

    /// Running committees, ordered by address.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.committees.iter().map(|e| *e.key()).collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.committees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committees.is_empty()
    }
}

impl MessageRouter for Committees {
    fn route(&self, from: &str, message: PeerMessage) {
        match self.get(&message.address) {
            Some(committee) => committee.receive_peer_message(from, message),
            None => trace!(
                from,
                address = %message.address.short(),
                "Message for a contract without a committee"
            ),
        }
    }
}

impl EventSink for Committees {
    fn deliver(&self, address: &Address, event: CommitteeEvent) {
        match self.get(address) {
            Some(committee) => committee.receive_message(event),
            None => debug!(
                address = %address.short(),
                event = event.name(),
                "Ledger event for a contract without a committee"
            ),
        }
    }
}

impl std::fmt::Debug for Committees {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committees")
            .field("running", &self.committees.len())
            .finish()
    }
}
