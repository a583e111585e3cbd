mod common;

use common::{RecordingCommittee, RecordingNodeConn, Setup};
use std::sync::Arc;
use wasp_committee::messages::{BatchHeaderMsg, GetBatchMsg, StateIndexPingPongMsg, StateUpdateMsg};
use wasp_committee::{CommitteeEvent, CommitteeMsg, StateManager, StateSyncConfig};
use wasp_common::{Hash256, RequestId};
use wasp_state::origin::origin_state;
use wasp_state::{persist, Batch, ScTransaction, StateBlock, StateUpdate, VirtualState};

fn counter_batch(state_index: u32, value: i64) -> Batch {
    let mut update = StateUpdate::new(RequestId::new(Hash256::hash(&state_index.to_le_bytes()), 0));
    update.set("counter", value.to_le_bytes().to_vec());
    Batch::new(state_index, 1_000 + state_index as i64, vec![update])
}

fn approving_tx(setup: &Setup, state: &VirtualState) -> Arc<ScTransaction> {
    Arc::new(ScTransaction {
        state_block: Some(StateBlock {
            address: setup.address,
            color: setup.origin_tx.id(),
            state_index: state.state_index(),
            timestamp: state.timestamp(),
            state_hash: state.hash(),
        }),
        requests: vec![],
        signature: None,
    })
}

fn transitions(committee: &RecordingCommittee) -> Vec<u32> {
    committee
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            CommitteeEvent::StateTransition(msg) => Some(msg.state.state_index()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_fresh_node_applies_origin_once_confirmed() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 1);
    let node_conn = Arc::new(RecordingNodeConn::default());
    let partition = setup.partition();
    let mut sm = StateManager::new(committee.clone(), node_conn.clone(), partition.clone(), StateSyncConfig::default());

    assert_eq!(sm.solid_index(), None);
    assert_eq!(node_conn.confirmed_requests.lock().as_slice(), &[setup.origin_tx.id()]);

    sm.event_state_transaction(setup.origin_tx.clone());
    assert_eq!(sm.solid_index(), Some(0));
    assert!(sm.is_synced());
    assert_eq!(transitions(&committee), vec![0]);
    assert_eq!(persist::load_solid_state_index(&partition).unwrap(), Some(0));

    // The same confirmation again changes nothing.
    sm.event_state_transaction(setup.origin_tx.clone());
    assert!(transitions(&committee).is_empty());
}

#[tokio::test]
async fn test_pending_batch_waits_for_ledger() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 0);
    let node_conn = Arc::new(RecordingNodeConn::default());
    let mut sm = StateManager::new(committee.clone(), node_conn.clone(), setup.partition(), StateSyncConfig::default());
    sm.event_state_transaction(setup.origin_tx.clone());
    transitions(&committee);

    let state0 = origin_state(&setup.address);
    let batch = counter_batch(1, 1);
    let state1 = state0.with_batch(&batch).unwrap();
    let tx1 = approving_tx(&setup, &state1);

    sm.event_pending_batch(batch.with_state_txid(tx1.id()));
    assert_eq!(sm.solid_index(), Some(0));
    assert!(node_conn.confirmed_requests.lock().contains(&tx1.id()));

    sm.event_state_transaction(tx1);
    assert_eq!(sm.solid_index(), Some(1));
    assert_eq!(sm.solid_state().unwrap().get_i64("counter").unwrap(), Some(1));
    assert_eq!(transitions(&committee), vec![1]);
}

#[tokio::test]
async fn test_batch_with_wrong_result_is_not_applied() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 0);
    let node_conn = Arc::new(RecordingNodeConn::default());
    let mut sm = StateManager::new(committee.clone(), node_conn, setup.partition(), StateSyncConfig::default());
    sm.event_state_transaction(setup.origin_tx.clone());

    let state1 = origin_state(&setup.address).with_batch(&counter_batch(1, 1)).unwrap();
    let tx1 = approving_tx(&setup, &state1);
    sm.event_pending_batch(counter_batch(1, 99).with_state_txid(tx1.id()));
    sm.event_state_transaction(tx1);
    assert_eq!(sm.solid_index(), Some(0));
}

#[tokio::test]
async fn test_catch_up_from_peer() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 2);
    let node_conn = Arc::new(RecordingNodeConn::default());
    let mut sm = StateManager::new(committee.clone(), node_conn, setup.partition(), StateSyncConfig::default());
    sm.event_state_transaction(setup.origin_tx.clone());
    transitions(&committee);
    committee.take_sent();

    let batch = counter_batch(1, 7);
    let state1 = origin_state(&setup.address).with_batch(&batch).unwrap();
    let tx1 = approving_tx(&setup, &state1);
    sm.event_state_transaction(tx1.clone());
    assert!(!sm.is_synced());
    assert_eq!(sm.largest_evidenced(), 1);

    let sent = committee.take_sent();
    let (peer, request) = sent.last().expect("batch requested").clone();
    assert_ne!(peer, 2);
    assert_eq!(
        request,
        CommitteeMsg::GetBatch(GetBatchMsg {
            sender_index: 2,
            batch_index: 1
        })
    );

    sm.event_batch_header(BatchHeaderMsg {
        sender_index: peer,
        state_index: 1,
        size: 1,
        state_txid: tx1.id(),
        timestamp: batch.timestamp,
    });
    assert_eq!(sm.solid_index(), Some(0));
    sm.event_state_update(StateUpdateMsg {
        sender_index: peer,
        state_index: 1,
        batch_index: 0,
        state_update: batch.updates[0].clone(),
    });
    assert_eq!(sm.solid_index(), Some(1));
    assert!(sm.is_synced());
    assert_eq!(transitions(&committee), vec![1]);
}

#[tokio::test]
async fn test_serves_stored_batch_and_pong() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 0);
    let node_conn = Arc::new(RecordingNodeConn::default());
    let mut sm = StateManager::new(committee.clone(), node_conn, setup.partition(), StateSyncConfig::default());
    sm.event_state_transaction(setup.origin_tx.clone());

    let batch = counter_batch(1, 3);
    let state1 = origin_state(&setup.address).with_batch(&batch).unwrap();
    let tx1 = approving_tx(&setup, &state1);
    sm.event_pending_batch(batch.with_state_txid(tx1.id()));
    sm.event_state_transaction(tx1.clone());
    committee.take_sent();

    sm.event_get_batch(&GetBatchMsg {
        sender_index: 3,
        batch_index: 1,
    });
    let sent = committee.take_sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(peer, _)| *peer == 3));
    match &sent[0].1 {
        CommitteeMsg::BatchHeader(h) => {
            assert_eq!(h.state_index, 1);
            assert_eq!(h.size, 1);
            assert_eq!(h.state_txid, tx1.id());
        }
        other => panic!("unexpected {other:?}"),
    }

    sm.event_get_batch(&GetBatchMsg {
        sender_index: 3,
        batch_index: 9,
    });
    assert!(committee.take_sent().is_empty());

    sm.event_state_index_ping_pong(&StateIndexPingPongMsg {
        sender_index: 1,
        state_index: 0,
        request_pong: true,
    });
    let sent = committee.take_sent();
    assert_eq!(
        sent,
        vec![(
            1,
            CommitteeMsg::StateIndexPingPong(StateIndexPingPongMsg {
                sender_index: 0,
                state_index: 1,
                request_pong: false
            })
        )]
    );
}

#[tokio::test]
async fn test_restart_loads_solid_state() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 0);
    let partition = setup.partition();
    {
        let node_conn = Arc::new(RecordingNodeConn::default());
        let mut sm = StateManager::new(committee.clone(), node_conn, partition.clone(), StateSyncConfig::default());
        sm.event_state_transaction(setup.origin_tx.clone());
    }
    let node_conn = Arc::new(RecordingNodeConn::default());
    let sm = StateManager::new(committee, node_conn.clone(), partition, StateSyncConfig::default());
    assert_eq!(sm.solid_index(), Some(0));
    assert!(!sm.is_synced());
    assert_eq!(node_conn.confirmed_requests.lock().len(), 1);
}

fn header_and_updates(sm: &mut StateManager, peer: u16, batch: &Batch) {
    sm.event_batch_header(BatchHeaderMsg {
        sender_index: peer,
        state_index: batch.state_index,
        size: batch.updates.len() as u16,
        state_txid: batch.state_txid,
        timestamp: batch.timestamp,
    });
    for (i, update) in batch.updates.iter().enumerate() {
        sm.event_state_update(StateUpdateMsg {
            sender_index: peer,
            state_index: batch.state_index,
            batch_index: i as u16,
            state_update: update.clone(),
        });
    }
}

fn requested_batch(committee: &RecordingCommittee) -> Option<(u16, u32)> {
    committee.take_sent().into_iter().rev().find_map(|(peer, msg)| match msg {
        CommitteeMsg::GetBatch(get) => Some((peer, get.batch_index)),
        _ => None,
    })
}

#[tokio::test]
async fn test_catch_up_two_batches_in_order() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 2);
    let node_conn = Arc::new(RecordingNodeConn::default());
    let partition = setup.partition();

    let mut state = origin_state(&setup.address);
    let mut batches = vec![];
    let mut txs = vec![setup.origin_tx.clone()];
    for index in 1..=7u32 {
        let batch = counter_batch(index, index as i64);
        state = state.with_batch(&batch).unwrap();
        let tx = approving_tx(&setup, &state);
        batches.push(batch.with_state_txid(tx.id()));
        txs.push(tx);
        if index == 5 {
            persist::save_solid_state(&partition, &state, &batches[4]).unwrap();
        }
    }

    let mut sm = StateManager::new(committee.clone(), node_conn.clone(), partition.clone(), StateSyncConfig::default());
    assert_eq!(sm.solid_index(), Some(5));
    assert!(node_conn.confirmed_requests.lock().contains(&txs[5].id()));
    sm.event_state_transaction(txs[5].clone());
    assert!(sm.is_synced());
    assert_eq!(transitions(&committee), vec![5]);
    committee.take_sent();

    // The ledger shows a state two steps ahead.
    sm.event_state_transaction(txs[7].clone());
    assert!(!sm.is_synced());
    assert_eq!(sm.largest_evidenced(), 7);
    let (peer, index) = requested_batch(&committee).expect("batch 6 requested");
    assert_eq!(index, 6);
    assert_ne!(peer, 2);

    header_and_updates(&mut sm, peer, &batches[5]);
    assert_eq!(sm.solid_index(), Some(5), "batch 6 waits for its approving transaction");
    assert!(node_conn.confirmed_requests.lock().contains(&txs[6].id()));
    assert!(requested_batch(&committee).is_none());

    sm.event_state_transaction(txs[6].clone());
    assert_eq!(sm.solid_index(), Some(6));
    let (peer, index) = requested_batch(&committee).expect("batch 7 requested");
    assert_eq!(index, 7);

    header_and_updates(&mut sm, peer, &batches[6]);
    assert_eq!(sm.solid_index(), Some(7));
    assert!(sm.is_synced());
    assert_eq!(sm.solid_state().unwrap().get_i64("counter").unwrap(), Some(7));
    assert_eq!(transitions(&committee), vec![6, 7]);
    assert_eq!(persist::load_solid_state_index(&partition).unwrap(), Some(7));
}

#[tokio::test]
async fn test_restart_applies_stored_pending_batch() {
    let setup = Setup::new(4, 3);
    let committee = RecordingCommittee::new(&setup, 0);
    let partition = setup.partition();
    let batch = counter_batch(1, 4);
    let state1 = origin_state(&setup.address).with_batch(&batch).unwrap();
    let tx1 = approving_tx(&setup, &state1);
    {
        let node_conn = Arc::new(RecordingNodeConn::default());
        let mut sm = StateManager::new(committee.clone(), node_conn, partition.clone(), StateSyncConfig::default());
        sm.event_state_transaction(setup.origin_tx.clone());
        persist::save_pending_batch(&partition, &batch.with_state_txid(tx1.id())).unwrap();
    }
    transitions(&committee);

    // No peer ever answers; the batch comes from the store.
    committee.dead.lock().extend([1, 2, 3]);
    let node_conn = Arc::new(RecordingNodeConn::default());
    let mut sm = StateManager::new(committee.clone(), node_conn, partition.clone(), StateSyncConfig::default());
    sm.event_state_transaction(setup.origin_tx.clone());
    sm.event_state_transaction(tx1.clone());
    assert_eq!(sm.solid_index(), Some(1));
    assert!(sm.is_synced());
    assert_eq!(transitions(&committee), vec![0, 1]);
    assert_eq!(persist::load_pending_batch(&partition, &tx1.id()).unwrap(), None);
}
