use wasp_common::{Address, TxId};
use wasp_state::ScTransaction;

/// Client of the underlying ledger.
///
/// Every call is fire-and-forget. Answers come back later as
/// [`CommitteeEvent`](crate::CommitteeEvent)s for the contract address
/// they concern.
pub trait NodeConnection: Send + Sync {
    /// Deliver requests and state transactions for `address` from now on.
    fn subscribe(&self, address: &Address);

    fn unsubscribe(&self, address: &Address);

    fn post_transaction(&self, tx: &ScTransaction);

    fn request_inclusion_level(&self, txid: &TxId, address: &Address);

    fn request_confirmed_transaction(&self, txid: &TxId, address: &Address);

    fn request_balances(&self, address: &Address);
}
