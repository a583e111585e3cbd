//! In-process ledger for development nodes and tests.
//!
//! [`InMemoryLedger`] stands in for the value-transfer ledger: it accepts
//! transactions, confirms them after a configurable delay and reports
//! inclusion levels, balances and confirmed transactions. Each node talks
//! to it through its own [`LedgerHandle`], which implements
//! [`NodeConnection`] and hands answers to an [`EventSink`] asynchronously.
//!
//! A state transaction is accepted only if its state index is exactly one
//! above the contract's last accepted index and, when the contract was
//! registered with a public key set, its joint signature verifies against
//! the transaction essence. Everything else is rejected.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use wasp_committee::{CommitteeEvent, InclusionLevel, NodeConnection, RequestMsg};
use wasp_common::{Address, TxId};
use wasp_crypto::PublicKeySet;
use wasp_state::{Balances, ScTransaction};

/// Receives ledger events addressed to one contract.
pub trait EventSink: Send + Sync {
    fn deliver(&self, address: &Address, event: CommitteeEvent);
}

#[derive(Debug, Clone)]
struct TxRecord {
    tx: Arc<ScTransaction>,
    level: InclusionLevel,
}

#[derive(Debug, Clone)]
struct ContractRecord {
    /// Highest state index accepted so far, confirmed or not.
    last_state_index: u32,
    key_set: Option<PublicKeySet>,
    balances: Balances,
}

struct Inner {
    confirm_delay: Duration,
    txs: RwLock<HashMap<TxId, TxRecord>>,
    contracts: Mutex<HashMap<Address, ContractRecord>>,
    /// Confirmed request blocks by target address.
    requests: RwLock<HashMap<Address, Vec<(Arc<ScTransaction>, u16)>>>,
    handles: RwLock<Vec<Weak<LedgerHandle>>>,
}

/// Shared ledger. Clones refer to the same ledger.
#[derive(Clone)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    pub fn new(confirm_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                confirm_delay,
                txs: RwLock::new(HashMap::new()),
                contracts: Mutex::new(HashMap::new()),
                requests: RwLock::new(HashMap::new()),
                handles: RwLock::new(Vec::new()),
            }),
        }
    }

    /// A new connection for one node.
    pub fn connect(&self) -> Arc<LedgerHandle> {
        let handle = Arc::new(LedgerHandle {
            ledger: self.clone(),
            sink: RwLock::new(None),
            subscriptions: RwLock::new(HashSet::new()),
        });
        let mut handles = self.inner.handles.write();
        handles.retain(|h| h.strong_count() > 0);
        handles.push(Arc::downgrade(&handle));
        handle
    }

    /// Register a contract by its origin transaction, which is confirmed
    /// immediately. Returns the origin transaction id, the contract color.
    pub fn create_contract(
        &self,
        origin: ScTransaction,
        key_set: Option<PublicKeySet>,
        balances: Balances,
    ) -> anyhow::Result<TxId> {
        let Some(sb) = origin.state_block.as_ref() else {
            anyhow::bail!("origin transaction has no state block");
        };
        if sb.state_index != 0 {
            anyhow::bail!("origin transaction must commit to state index 0");
        }
        let address = sb.address;
        {
            let mut contracts = self.inner.contracts.lock();
            if contracts.contains_key(&address) {
                anyhow::bail!("contract {} already exists", address);
            }
            contracts.insert(
                address,
                ContractRecord {
                    last_state_index: 0,
                    key_set,
                    balances,
                },
            );
        }
        let tx = Arc::new(origin);
        let txid = tx.id();
        self.inner.txs.write().insert(
            txid,
            TxRecord {
                tx: tx.clone(),
                level: InclusionLevel::Confirmed,
            },
        );
        self.record_requests(&tx);
        info!(address = %address.short(), color = %txid, "Contract created");
        Ok(txid)
    }

    /// Post a transaction carrying requests only.
    pub fn post_request(&self, tx: ScTransaction) -> anyhow::Result<TxId> {
        if tx.state_block.is_some() {
            anyhow::bail!("request transactions may not carry a state block");
        }
        if tx.requests.is_empty() {
            anyhow::bail!("request transaction without requests");
        }
        let txid = tx.id();
        if self.book(Arc::new(tx)) != InclusionLevel::Booked {
            anyhow::bail!("request transaction {} was not accepted", txid);
        }
        Ok(txid)
    }

    pub fn inclusion_level(&self, txid: &TxId) -> InclusionLevel {
        self.inner
            .txs
            .read()
            .get(txid)
            .map(|r| r.level)
            .unwrap_or(InclusionLevel::Unknown)
    }

    pub fn transaction(&self, txid: &TxId) -> Option<Arc<ScTransaction>> {
        self.inner.txs.read().get(txid).map(|r| r.tx.clone())
    }

    /// Highest state index accepted for `address`.
    pub fn state_index(&self, address: &Address) -> Option<u32> {
        self.inner
            .contracts
            .lock()
            .get(address)
            .map(|c| c.last_state_index)
    }

    /// Confirmed state transactions of `address`, by state index.
    pub fn state_transactions(&self, address: &Address) -> Vec<Arc<ScTransaction>> {
        let mut txs: Vec<_> = self
            .inner
            .txs
            .read()
            .values()
            .filter(|r| r.level == InclusionLevel::Confirmed)
            .filter(|r| r.tx.state_block.as_ref().is_some_and(|sb| sb.address == *address))
            .map(|r| r.tx.clone())
            .collect();
        txs.sort_by_key(|tx| tx.state_index());
        txs
    }

    /// Validate and book a transaction, then schedule its confirmation.
    fn book(&self, tx: Arc<ScTransaction>) -> InclusionLevel {
        let txid = tx.id();
        if let Some(existing) = self.inner.txs.read().get(&txid) {
            trace!(txid = %txid, "Transaction already known");
            return existing.level;
        }
        let verdict = self.check_state_block(&tx);
        let level = match verdict {
            Ok(()) => InclusionLevel::Booked,
            Err(reason) => {
                warn!(txid = %txid, reason, "Transaction rejected");
                InclusionLevel::Rejected
            }
        };
        self.inner.txs.write().insert(
            txid,
            TxRecord {
                tx: tx.clone(),
                level,
            },
        );
        if level == InclusionLevel::Booked {
            debug!(txid = %txid, "Transaction booked");
            let ledger = self.clone();
            let delay = self.inner.confirm_delay;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                ledger.confirm(&txid);
            });
        }
        level
    }

    fn check_state_block(&self, tx: &ScTransaction) -> Result<(), &'static str> {
        let Some(sb) = tx.state_block.as_ref() else {
            return Ok(());
        };
        let mut contracts = self.inner.contracts.lock();
        let contract = contracts.get_mut(&sb.address).ok_or("unknown contract")?;
        if sb.state_index != contract.last_state_index + 1 {
            return Err("state index does not follow the last accepted one");
        }
        if let Some(key_set) = contract.key_set.as_ref() {
            let signature = tx.signature.as_ref().ok_or("missing signature")?;
            key_set
                .verify_joint(&tx.essence_hash(), signature)
                .map_err(|_| "invalid signature")?;
        }
        contract.last_state_index = sb.state_index;
        Ok(())
    }

    fn confirm(&self, txid: &TxId) {
        let tx = {
            let mut txs = self.inner.txs.write();
            let Some(record) = txs.get_mut(txid) else {
                return;
            };
            if record.level != InclusionLevel::Booked {
                return;
            }
            record.level = InclusionLevel::Confirmed;
            record.tx.clone()
        };
        if let Some(sb) = tx.state_block.as_ref() {
            info!(address = %sb.address.short(), state_index = sb.state_index, txid = %txid, "State transaction confirmed");
            for handle in self.subscribers(&sb.address) {
                handle.deliver_now(&sb.address, CommitteeEvent::StateTransaction(tx.clone()));
            }
        }
        self.record_requests(&tx);
    }

    /// Remember confirmed requests and deliver them to subscribers.
    fn record_requests(&self, tx: &Arc<ScTransaction>) {
        let mut targets: Vec<Address> = tx.requests.iter().map(|r| r.target).collect();
        targets.sort();
        targets.dedup();
        for target in targets {
            let indices: Vec<u16> = tx.requests_to(&target).collect();
            {
                let mut requests = self.inner.requests.write();
                let list = requests.entry(target).or_default();
                for index in &indices {
                    list.push((tx.clone(), *index));
                }
            }
            for handle in self.subscribers(&target) {
                for index in &indices {
                    handle.deliver_now(
                        &target,
                        CommitteeEvent::Request(RequestMsg {
                            tx: tx.clone(),
                            index: *index,
                        }),
                    );
                }
            }
        }
    }

    fn subscribers(&self, address: &Address) -> Vec<Arc<LedgerHandle>> {
        self.inner
            .handles
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|h| h.is_subscribed(address))
            .collect()
    }

    fn requests_for(&self, address: &Address) -> Vec<(Arc<ScTransaction>, u16)> {
        self.inner
            .requests
            .read()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    fn balances(&self, address: &Address) -> Option<Balances> {
        self.inner
            .contracts
            .lock()
            .get(address)
            .map(|c| c.balances.clone())
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("transactions", &self.inner.txs.read().len())
            .field("contracts", &self.inner.contracts.lock().len())
            .finish()
    }
}

/// One node's connection to the [`InMemoryLedger`].
pub struct LedgerHandle {
    ledger: InMemoryLedger,
    sink: RwLock<Option<Weak<dyn EventSink>>>,
    subscriptions: RwLock<HashSet<Address>>,
}

impl LedgerHandle {
    /// Where events for subscribed contracts go.
    pub fn set_sink(&self, sink: Weak<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }

    pub fn is_subscribed(&self, address: &Address) -> bool {
        self.subscriptions.read().contains(address)
    }

    /// Hand `event` to the sink from a fresh task, never from the caller's.
    fn deliver_now(&self, address: &Address, event: CommitteeEvent) {
        let Some(sink) = self.sink.read().as_ref().and_then(Weak::upgrade) else {
            trace!(event = event.name(), "No sink for ledger event");
            return;
        };
        let address = *address;
        tokio::spawn(async move {
            sink.deliver(&address, event);
        });
    }
}

impl NodeConnection for LedgerHandle {
    fn subscribe(&self, address: &Address) {
        if !self.subscriptions.write().insert(*address) {
            return;
        }
        let outstanding = self.ledger.requests_for(address);
        debug!(address = %address.short(), requests = outstanding.len(), "Subscribed to ledger");
        for (tx, index) in outstanding {
            self.deliver_now(address, CommitteeEvent::Request(RequestMsg { tx, index }));
        }
    }

    fn unsubscribe(&self, address: &Address) {
        self.subscriptions.write().remove(address);
    }

    fn post_transaction(&self, tx: &ScTransaction) {
        let level = self.ledger.book(Arc::new(tx.clone()));
        trace!(txid = %tx.id(), ?level, "Transaction posted");
    }

    fn request_inclusion_level(&self, txid: &TxId, address: &Address) {
        let level = self.ledger.inclusion_level(txid);
        self.deliver_now(address, CommitteeEvent::InclusionLevel { txid: *txid, level });
    }

    fn request_confirmed_transaction(&self, txid: &TxId, address: &Address) {
        if self.ledger.inclusion_level(txid) != InclusionLevel::Confirmed {
            return;
        }
        if let Some(tx) = self.ledger.transaction(txid) {
            self.deliver_now(address, CommitteeEvent::StateTransaction(tx));
        }
    }

    fn request_balances(&self, address: &Address) {
        if let Some(balances) = self.ledger.balances(address) {
            self.deliver_now(address, CommitteeEvent::Balances(balances));
        }
    }
}
