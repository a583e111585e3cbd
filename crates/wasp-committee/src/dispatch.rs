//! Routing of queued events to the state manager and the operator.

use crate::committee::Committee;
use crate::committee_impl::CommitteeImpl;
use crate::consensus::Operator;
use crate::events::CommitteeEvent;
use crate::messages::CommitteeMsg;
use crate::statemgr::StateManager;
use tracing::{debug, trace};

impl CommitteeImpl {
    /// Interpret one event. Runs on the committee task only.
    pub(crate) fn dispatch(&self, state_mgr: &mut StateManager, operator: &mut Operator, event: CommitteeEvent) {
        trace!(event = event.name(), "Dispatch");
        operator.set_state_synced(state_mgr.is_synced());
        match event {
            CommitteeEvent::Peer(msg) => self.dispatch_peer_message(state_mgr, operator, msg),
            CommitteeEvent::StateTransaction(tx) => state_mgr.event_state_transaction(tx),
            CommitteeEvent::PendingBatch(batch) => state_mgr.event_pending_batch(batch),
            CommitteeEvent::StateTransition(msg) => operator.event_state_transition(msg),
            CommitteeEvent::InclusionLevel { txid, level } => operator.event_inclusion_level(txid, level),
            CommitteeEvent::Balances(balances) => operator.event_balances(balances),
            CommitteeEvent::Request(msg) => operator.event_request(msg),
            CommitteeEvent::ProcessorReady(hash) => operator.event_processor_ready(hash),
            CommitteeEvent::ResultCalculated(task) => {
                if self.is_dismissed() {
                    debug!("Dropping VM result after dismissal");
                    return;
                }
                operator.event_result_calculated(*task);
            }
            CommitteeEvent::Timer(tick) => {
                if tick % 2 == 0 {
                    state_mgr.event_timer(tick / 2);
                } else {
                    operator.event_timer(tick / 2);
                }
            }
        }
    }

    fn dispatch_peer_message(&self, state_mgr: &mut StateManager, operator: &mut Operator, msg: CommitteeMsg) {
        if let Some(index) = msg.state_index() {
            state_mgr.evidence_state_index(index);
        }
        match msg {
            CommitteeMsg::StateIndexPingPong(msg) => state_mgr.event_state_index_ping_pong(&msg),
            CommitteeMsg::GetBatch(msg) => state_mgr.event_get_batch(&msg),
            CommitteeMsg::BatchHeader(msg) => state_mgr.event_batch_header(msg),
            CommitteeMsg::StateUpdate(msg) => state_mgr.event_state_update(msg),
            CommitteeMsg::NotifyRequests(msg) => operator.event_notify_requests(msg),
            CommitteeMsg::NotifyFinalResultPosted(msg) => operator.event_notify_final_result_posted(msg),
            CommitteeMsg::StartProcessingBatch(msg) => operator.event_start_processing_batch(msg),
            CommitteeMsg::SignedHash(msg) => operator.event_signed_hash(msg),
            CommitteeMsg::TestTrace(msg) => self.handle_test_trace(msg),
        }
    }
}
