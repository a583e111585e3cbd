//! The program's view of the world while processing one request.

use crate::{Result, VmError};
use std::collections::BTreeMap;
use tracing::info;
use wasp_common::{digest, time, Address, Color, Hash256, RequestId};
use wasp_state::{vars, Balances, RequestBlock, StateUpdate, VirtualState};

/// Everything a contract program may observe or change.
pub trait Sandbox {
    /// True while the contract has not been initialized yet.
    fn is_origin_state(&self) -> bool;

    fn address(&self) -> &Address;

    fn owner_address(&self) -> &Address;

    fn reward_address(&self) -> &Address;

    /// Contract balance of `color` as seen by the leader when the batch was built.
    fn balance(&self, color: &Color) -> i64;

    /// Batch timestamp, unix nanoseconds.
    fn timestamp(&self) -> i64;

    /// Deterministic per-request randomness.
    fn entropy(&self) -> Hash256;

    fn request_id(&self) -> RequestId;

    fn request_code(&self) -> u16;

    fn request_sender(&self) -> &Address;

    fn request_arg(&self, name: &str) -> Option<&[u8]>;

    fn get_var(&self, name: &str) -> Option<Vec<u8>>;

    fn set_var(&mut self, name: &str, value: Vec<u8>) -> Result<()>;

    fn del_var(&mut self, name: &str) -> Result<()>;

    /// Queue a request to this contract, runnable `delay_secs` after the batch timestamp.
    fn send_request_to_self(&mut self, code: u16, args: BTreeMap<String, Vec<u8>>, delay_secs: u32);

    /// Emit a message to the node log.
    fn publish(&self, message: &str);

    /// Drop every change made so far for this request.
    fn rollback(&mut self);

    fn request_arg_i64(&self, name: &str) -> Option<i64> {
        self.request_arg(name)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(i64::from_le_bytes)
    }

    fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_var(name)
            .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
            .map(i64::from_le_bytes)
    }

    fn set_i64(&mut self, name: &str, value: i64) -> Result<()> {
        self.set_var(name, value.to_le_bytes().to_vec())
    }

    fn set_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.set_var(name, value.as_bytes().to_vec())
    }

    fn get_string(&self, name: &str) -> Option<String> {
        self.get_var(name).and_then(|b| String::from_utf8(b).ok())
    }

    fn get_hash(&self, name: &str) -> Option<Hash256> {
        self.get_var(name)
            .and_then(|b| <[u8; 32]>::try_from(b.as_slice()).ok())
            .map(Hash256::from_bytes)
    }

    fn set_hash(&mut self, name: &str, value: &Hash256) -> Result<()> {
        self.set_var(name, value.as_bytes().to_vec())
    }
}

/// Shared per-task inputs visible to every request's context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskView<'a> {
    pub address: &'a Address,
    pub owner_address: &'a Address,
    pub reward_address: &'a Address,
    pub balances: &'a Balances,
    pub timestamp: i64,
    pub entropy: Hash256,
}

/// [`Sandbox`] implementation over an accumulating batch state.
pub struct VmContext<'a> {
    task: TaskView<'a>,
    state: &'a VirtualState,
    request_id: RequestId,
    request: &'a RequestBlock,
    privileged: bool,
    update: StateUpdate,
    overlay: BTreeMap<String, Option<Vec<u8>>>,
    outgoing: Vec<RequestBlock>,
}

impl<'a> VmContext<'a> {
    pub(crate) fn new(
        task: TaskView<'a>,
        state: &'a VirtualState,
        request_id: RequestId,
        request: &'a RequestBlock,
    ) -> Self {
        let entropy = digest(&(task.entropy, request_id));
        Self {
            task: TaskView { entropy, ..task },
            state,
            request_id,
            request,
            privileged: vars::is_reserved_code(request.code),
            update: StateUpdate::new(request_id),
            overlay: BTreeMap::new(),
            outgoing: Vec::new(),
        }
    }

    /// The state update and outgoing requests produced so far.
    pub fn finish(self) -> (StateUpdate, Vec<RequestBlock>) {
        (self.update, self.outgoing)
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if vars::is_reserved_var(name) && !self.privileged {
            return Err(VmError::ReservedVariable(name.to_string()));
        }
        Ok(())
    }
}

impl Sandbox for VmContext<'_> {
    fn is_origin_state(&self) -> bool {
        self.state.get(vars::VAR_PROGRAM_HASH).is_none()
            && !self.overlay.contains_key(vars::VAR_PROGRAM_HASH)
    }

    fn address(&self) -> &Address {
        self.task.address
    }

    fn owner_address(&self) -> &Address {
        self.task.owner_address
    }

    fn reward_address(&self) -> &Address {
        self.task.reward_address
    }

    fn balance(&self, color: &Color) -> i64 {
        self.task.balances.get(color).copied().unwrap_or(0)
    }

    fn timestamp(&self) -> i64 {
        self.task.timestamp
    }

    fn entropy(&self) -> Hash256 {
        self.task.entropy
    }

    fn request_id(&self) -> RequestId {
        self.request_id
    }

    fn request_code(&self) -> u16 {
        self.request.code
    }

    fn request_sender(&self) -> &Address {
        &self.request.sender
    }

    fn request_arg(&self, name: &str) -> Option<&[u8]> {
        self.request.args.get(name).map(Vec::as_slice)
    }

    fn get_var(&self, name: &str) -> Option<Vec<u8>> {
        match self.overlay.get(name) {
            Some(v) => v.clone(),
            None => self.state.get(name).map(<[u8]>::to_vec),
        }
    }

    fn set_var(&mut self, name: &str, value: Vec<u8>) -> Result<()> {
        self.check_writable(name)?;
        self.overlay.insert(name.to_string(), Some(value.clone()));
        self.update.set(name, value);
        Ok(())
    }

    fn del_var(&mut self, name: &str) -> Result<()> {
        self.check_writable(name)?;
        self.overlay.insert(name.to_string(), None);
        self.update.delete(name);
        Ok(())
    }

    fn send_request_to_self(&mut self, code: u16, args: BTreeMap<String, Vec<u8>>, delay_secs: u32) {
        let timelock = if delay_secs == 0 {
            0
        } else {
            let secs = time::nanos_to_secs(self.task.timestamp) + i64::from(delay_secs);
            u32::try_from(secs).unwrap_or(u32::MAX)
        };
        let mut block = RequestBlock::new(*self.task.address, *self.task.address, code)
            .with_timelock(timelock);
        block.args = args;
        self.outgoing.push(block);
    }

    fn publish(&self, message: &str) {
        info!(
            address = %self.task.address.short(),
            request = %self.request_id.short(),
            "{}",
            message
        );
    }

    fn rollback(&mut self) {
        self.update = StateUpdate::new(self.request_id);
        self.overlay.clear();
        self.outgoing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_state::Batch;

    fn state() -> VirtualState {
        let mut vs = VirtualState::new();
        let mut su = StateUpdate::new(RequestId::new(Hash256::ZERO, 0));
        su.set("counter", 5i64.to_le_bytes().to_vec());
        vs.apply_batch(&Batch::new(0, 0, vec![su])).unwrap();
        vs
    }

    static NO_BALANCES: Balances = Balances::new();

    fn view(address: &Address) -> TaskView<'_> {
        TaskView {
            address,
            owner_address: address,
            reward_address: address,
            balances: &NO_BALANCES,
            timestamp: 10 * time::NANOS_PER_SEC,
            entropy: Hash256::hash(b"entropy"),
        }
    }

    #[test]
    fn test_reads_see_own_writes() {
        let address = Address::from_key_material(b"sc");
        let vs = state();
        let req = RequestBlock::new(address, address, 1);
        let id = RequestId::new(Hash256::hash(b"r"), 0);
        let mut ctx = VmContext::new(view(&address), &vs, id, &req);

        assert_eq!(ctx.get_i64("counter"), Some(5));
        ctx.set_i64("counter", 6).unwrap();
        assert_eq!(ctx.get_i64("counter"), Some(6));
        ctx.del_var("counter").unwrap();
        assert_eq!(ctx.get_var("counter"), None);

        let (update, outgoing) = ctx.finish();
        assert_eq!(update.mutations.len(), 2);
        assert!(outgoing.is_empty());
    }

    #[test]
    fn test_reserved_vars_need_reserved_code() {
        let address = Address::from_key_material(b"sc");
        let vs = state();
        let id = RequestId::new(Hash256::hash(b"r"), 0);

        let req = RequestBlock::new(address, address, 1);
        let mut ctx = VmContext::new(view(&address), &vs, id, &req);
        assert!(matches!(
            ctx.set_var(vars::VAR_PROGRAM_HASH, vec![]),
            Err(VmError::ReservedVariable(_))
        ));

        let init = RequestBlock::new(address, address, vars::REQ_INIT);
        let mut ctx = VmContext::new(view(&address), &vs, id, &init);
        assert!(ctx.is_origin_state());
        ctx.set_var(vars::VAR_PROGRAM_HASH, vec![0; 32]).unwrap();
        assert!(!ctx.is_origin_state());
    }

    #[test]
    fn test_send_to_self_and_rollback() {
        let address = Address::from_key_material(b"sc");
        let vs = state();
        let req = RequestBlock::new(address, address, 1);
        let id = RequestId::new(Hash256::hash(b"r"), 0);
        let mut ctx = VmContext::new(view(&address), &vs, id, &req);

        ctx.send_request_to_self(2, BTreeMap::new(), 5);
        ctx.set_i64("x", 1).unwrap();
        let (_, outgoing) = VmContext::finish(ctx);
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].timelock, 15);
        assert_eq!(outgoing[0].target, address);

        let mut ctx = VmContext::new(view(&address), &vs, id, &req);
        ctx.send_request_to_self(2, BTreeMap::new(), 0);
        ctx.set_i64("x", 1).unwrap();
        ctx.rollback();
        let (update, outgoing) = ctx.finish();
        assert!(update.is_empty());
        assert!(outgoing.is_empty());
    }

    #[test]
    fn test_entropy_differs_per_request() {
        let address = Address::from_key_material(b"sc");
        let vs = state();
        let req = RequestBlock::new(address, address, 1);
        let a = VmContext::new(view(&address), &vs, RequestId::new(Hash256::hash(b"a"), 0), &req);
        let b = VmContext::new(view(&address), &vs, RequestId::new(Hash256::hash(b"b"), 0), &req);
        assert_ne!(a.entropy(), b.entropy());
    }
}
