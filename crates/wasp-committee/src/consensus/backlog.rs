//! Requests waiting to be processed and who has seen them.

use crate::messages::NotifyReqMsg;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use wasp_common::{time, RequestId};
use wasp_state::{RequestBlock, ScTransaction};

#[derive(Debug, Clone)]
pub(crate) struct RequestEntry {
    pub id: RequestId,
    /// `None` until the request itself arrives from the ledger.
    pub tx: Option<Arc<ScTransaction>>,
    /// Arrival order, for fair selection.
    pub arrival: u64,
    /// Per peer: has notified this request for the current state index.
    pub notifications: Vec<bool>,
    /// When the entry was created.
    pub first_seen: Instant,
}

impl RequestEntry {
    pub fn block(&self) -> Option<&RequestBlock> {
        self.tx
            .as_ref()
            .and_then(|tx| tx.requests.get(self.id.index as usize))
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.iter().filter(|n| **n).count()
    }
}

/// Ids notified by peers but not held locally are capped at this many.
pub(crate) const MAX_UNKNOWN_NOTIFIED: usize = 4096;

/// Notifications kept for state indices not reached yet.
pub(crate) const MAX_FUTURE_NOTIFICATIONS: usize = 256;

pub(crate) struct Backlog {
    size: u16,
    own_index: u16,
    requests: HashMap<RequestId, RequestEntry>,
    /// Entries without the request itself.
    unknown: usize,
    /// Notifications for state indices the operator has not reached yet.
    future_notifications: Vec<NotifyReqMsg>,
    next_arrival: u64,
    mirror: Arc<RwLock<HashSet<RequestId>>>,
}

impl Backlog {
    pub fn new(size: u16, own_index: u16, mirror: Arc<RwLock<HashSet<RequestId>>>) -> Self {
        Self {
            size,
            own_index,
            requests: HashMap::new(),
            unknown: 0,
            future_notifications: Vec::new(),
            next_arrival: 0,
            mirror,
        }
    }

    fn entry(&mut self, id: RequestId, now: Instant) -> &mut RequestEntry {
        let size = self.size as usize;
        self.requests.entry(id).or_insert_with(|| RequestEntry {
            id,
            tx: None,
            arrival: u64::MAX,
            notifications: vec![false; size],
            first_seen: now,
        })
    }

    /// Record the request itself. Returns false if it was already known.
    pub fn add_request(&mut self, id: RequestId, tx: Arc<ScTransaction>) -> bool {
        match self.requests.get(&id) {
            Some(entry) if entry.tx.is_some() => return false,
            Some(_) => self.unknown -= 1,
            None => {}
        }
        let arrival = self.next_arrival;
        let own = self.own_index as usize;
        let entry = self.entry(id, Instant::now());
        entry.tx = Some(tx);
        entry.arrival = arrival;
        if let Some(bit) = entry.notifications.get_mut(own) {
            *bit = true;
        }
        self.next_arrival += 1;
        self.mirror.write().insert(id);
        true
    }

    /// `peer` has seen `ids`. Idempotent. Ids not held locally are tracked
    /// only while fewer than [`MAX_UNKNOWN_NOTIFIED`] such entries exist.
    pub fn mark_notified(&mut self, peer: u16, ids: &[RequestId], now: Instant) {
        let mut dropped = 0usize;
        for id in ids {
            if !self.requests.contains_key(id) {
                if self.unknown >= MAX_UNKNOWN_NOTIFIED {
                    dropped += 1;
                    continue;
                }
                self.unknown += 1;
            }
            if let Some(bit) = self.entry(*id, now).notifications.get_mut(peer as usize) {
                *bit = true;
            }
        }
        if dropped > 0 {
            debug!(peer, dropped, "Too many unknown notified requests, ignoring the rest");
        }
    }

    pub fn remove(&mut self, ids: &[RequestId]) {
        let mut mirror = self.mirror.write();
        for id in ids {
            if let Some(entry) = self.requests.remove(id) {
                if entry.tx.is_none() {
                    self.unknown -= 1;
                }
            }
            mirror.remove(id);
        }
    }

    /// Drop notified ids whose request has not arrived within `ttl`.
    /// Returns how many were dropped.
    pub fn prune_unknown(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.requests.len();
        self.requests
            .retain(|_, e| e.tx.is_some() || now.saturating_duration_since(e.first_seen) < ttl);
        let pruned = before - self.requests.len();
        self.unknown -= pruned;
        pruned
    }

    pub fn unknown_count(&self) -> usize {
        self.unknown
    }

    /// Forget all peer notifications; only own knowledge survives a state change.
    pub fn reset_notifications(&mut self) {
        let own = self.own_index as usize;
        self.requests.retain(|_, e| e.tx.is_some());
        self.unknown = 0;
        for entry in self.requests.values_mut() {
            entry.notifications.iter_mut().for_each(|n| *n = false);
            if let Some(bit) = entry.notifications.get_mut(own) {
                *bit = true;
            }
        }
    }

    /// Keep `msg` until its state index is reached. The oldest stored
    /// message goes once [`MAX_FUTURE_NOTIFICATIONS`] are held.
    pub fn store_future_notification(&mut self, msg: NotifyReqMsg) {
        if self.future_notifications.len() >= MAX_FUTURE_NOTIFICATIONS {
            self.future_notifications.remove(0);
        }
        self.future_notifications.push(msg);
    }

    /// Remove and return stored notifications for `state_index`, dropping older ones.
    pub fn take_notifications_for(&mut self, state_index: u32) -> Vec<NotifyReqMsg> {
        let (ready, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.future_notifications)
            .into_iter()
            .filter(|m| m.state_index >= state_index)
            .partition(|m| m.state_index == state_index);
        self.future_notifications = keep;
        ready
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.requests.get(id).is_some_and(|e| e.tx.is_some())
    }

    pub fn get(&self, id: &RequestId) -> Option<&RequestEntry> {
        self.requests.get(id)
    }

    /// Ids of requests this node holds.
    pub fn known_ids(&self) -> Vec<RequestId> {
        let mut known: Vec<&RequestEntry> = self.requests.values().filter(|e| e.tx.is_some()).collect();
        known.sort_by_key(|e| (e.arrival, e.id));
        known.into_iter().map(|e| e.id).collect()
    }

    pub fn has_work(&self) -> bool {
        self.requests.values().any(|e| e.tx.is_some())
    }

    /// Requests ready for a batch at `timestamp`: held locally, notified
    /// by at least `quorum` peers and not time locked. Ordered by arrival,
    /// then id, and capped at `max`.
    pub fn select_batch(&self, quorum: u16, timestamp: i64, max: usize) -> Vec<RequestEntry> {
        let secs = time::nanos_to_secs(timestamp);
        let mut ready: Vec<&RequestEntry> = self
            .requests
            .values()
            .filter(|e| e.notification_count() >= quorum as usize)
            .filter(|e| e.block().is_some_and(|b| !b.is_time_locked(secs)))
            .collect();
        ready.sort_by_key(|e| (e.arrival, e.id));
        ready.into_iter().take(max).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::{Address, Hash256};

    fn tx(n: u8, timelock: u32) -> Arc<ScTransaction> {
        let target = Address::from_key_material(b"sc");
        Arc::new(ScTransaction {
            state_block: None,
            requests: vec![RequestBlock::new(target, Address::from_key_material(&[n]), 1)
                .with_timelock(timelock)],
            signature: None,
        })
    }

    fn now() -> Instant {
        Instant::now()
    }

    fn backlog() -> (Backlog, Arc<RwLock<HashSet<RequestId>>>) {
        let mirror = Arc::new(RwLock::new(HashSet::new()));
        (Backlog::new(4, 0, mirror.clone()), mirror)
    }

    #[test]
    fn test_notifications_are_idempotent() {
        let (mut b, _) = backlog();
        let t = tx(1, 0);
        let id = RequestId::new(t.id(), 0);
        b.add_request(id, t);
        b.mark_notified(1, &[id], now());
        b.mark_notified(1, &[id], now());
        assert_eq!(b.get(&id).unwrap().notification_count(), 2);
        assert!(b.select_batch(3, 0, 10).is_empty());
        b.mark_notified(2, &[id], now());
        assert_eq!(b.select_batch(3, 0, 10).len(), 1);
    }

    #[test]
    fn test_notification_without_request_is_not_selectable() {
        let (mut b, mirror) = backlog();
        let id = RequestId::new(Hash256::hash(b"unknown"), 0);
        b.mark_notified(1, &[id], now());
        b.mark_notified(2, &[id], now());
        b.mark_notified(3, &[id], now());
        assert!(!b.contains(&id));
        assert!(b.select_batch(3, 0, 10).is_empty());
        assert!(mirror.read().is_empty());
        b.reset_notifications();
        assert_eq!(b.len(), 0);
        assert_eq!(b.unknown_count(), 0);
    }

    #[test]
    fn test_unknown_notifications_expire() {
        let (mut b, _) = backlog();
        let start = now();
        let t = tx(1, 0);
        let held = RequestId::new(t.id(), 0);
        let late_tx = tx(2, 0);
        let late = RequestId::new(late_tx.id(), 0);
        let never = RequestId::new(Hash256::hash(b"never arrives"), 0);
        b.add_request(held, t);
        b.mark_notified(1, &[held, late, never], start);
        assert_eq!(b.unknown_count(), 2);

        assert!(b.add_request(late, late_tx));
        assert_eq!(b.unknown_count(), 1);
        assert_eq!(b.get(&late).unwrap().notification_count(), 2);

        let ttl = Duration::from_secs(30);
        assert_eq!(b.prune_unknown(start + Duration::from_secs(10), ttl), 0);
        assert_eq!(b.prune_unknown(start + Duration::from_secs(31), ttl), 1);
        assert_eq!(b.unknown_count(), 0);
        assert!(b.get(&never).is_none());
        assert!(b.contains(&held));
        assert!(b.contains(&late));
    }

    #[test]
    fn test_unknown_notifications_are_capped() {
        let (mut b, _) = backlog();
        let ids: Vec<RequestId> = (0..MAX_UNKNOWN_NOTIFIED as u32 + 10)
            .map(|i| RequestId::new(Hash256::hash(&i.to_le_bytes()), 0))
            .collect();
        b.mark_notified(1, &ids, now());
        assert_eq!(b.unknown_count(), MAX_UNKNOWN_NOTIFIED);
        assert_eq!(b.len(), MAX_UNKNOWN_NOTIFIED);

        // Ids already tracked still collect notifications past the cap.
        b.mark_notified(2, &ids[..5], now());
        assert_eq!(b.get(&ids[0]).unwrap().notification_count(), 2);
        assert!(b.get(&ids[ids.len() - 1]).is_none());

        b.remove(&ids[..5]);
        assert_eq!(b.unknown_count(), MAX_UNKNOWN_NOTIFIED - 5);
    }

    #[test]
    fn test_selection_order_and_time_lock() {
        let (mut b, _) = backlog();
        let t1 = tx(1, 0);
        let t2 = tx(2, 100);
        let t3 = tx(3, 0);
        let ids: Vec<RequestId> = [&t1, &t2, &t3].iter().map(|t| RequestId::new(t.id(), 0)).collect();
        b.add_request(ids[0], t1);
        b.add_request(ids[1], t2);
        b.add_request(ids[2], t3);
        for peer in 1..3 {
            b.mark_notified(peer, &ids, now());
        }
        let at_50s = 50 * time::NANOS_PER_SEC;
        let selected: Vec<RequestId> = b.select_batch(3, at_50s, 10).iter().map(|e| e.id).collect();
        assert_eq!(selected, vec![ids[0], ids[2]]);

        let at_100s = 100 * time::NANOS_PER_SEC;
        assert_eq!(b.select_batch(3, at_100s, 10).len(), 3);
        assert_eq!(b.select_batch(3, at_100s, 1)[0].id, ids[0]);
    }

    #[test]
    fn test_mirror_and_removal() {
        let (mut b, mirror) = backlog();
        let t = tx(1, 0);
        let id = RequestId::new(t.id(), 0);
        assert!(b.add_request(id, t.clone()));
        assert!(!b.add_request(id, t));
        assert!(mirror.read().contains(&id));
        b.remove(&[id]);
        assert!(!mirror.read().contains(&id));
        assert!(!b.has_work());
    }

    #[test]
    fn test_future_notifications() {
        let (mut b, _) = backlog();
        for idx in [3, 5, 5, 7] {
            b.store_future_notification(NotifyReqMsg {
                sender_index: 1,
                state_index: idx,
                request_ids: vec![],
            });
        }
        assert_eq!(b.take_notifications_for(5).len(), 2);
        assert_eq!(b.take_notifications_for(7).len(), 1);
        assert!(b.take_notifications_for(7).is_empty());

        for idx in 0..MAX_FUTURE_NOTIFICATIONS as u32 + 1 {
            b.store_future_notification(NotifyReqMsg {
                sender_index: 1,
                state_index: 10 + idx,
                request_ids: vec![],
            });
        }
        assert!(b.take_notifications_for(10).is_empty(), "oldest dropped");
        assert_eq!(b.take_notifications_for(11).len(), 1);
    }
}
