//! Running tasks to completion.

use crate::processor::{Processor, ProcessorRegistry, ProgramSource};
use crate::sandbox::{Sandbox, TaskView, VmContext};
use crate::task::{VmResult, VmTask};
use crate::{Result, VmError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use wasp_common::{Hash256, RequestId};
use wasp_state::{vars, Batch, RequestBlock, ScTransaction, StateBlock, StateUpdate, VirtualState};

/// Run every request of `task` in order and store the result in the task.
///
/// Each request sees the state left by the requests before it. A request
/// that fails, panics or is not authorized contributes an empty update.
/// Errors are returned only when the batch as a whole cannot be built.
pub fn run_task(registry: &ProcessorRegistry, task: &mut VmTask) -> Result<()> {
    let mut state = task.virtual_state.clone();
    let mut updates = Vec::with_capacity(task.requests.len());
    let mut outgoing: Vec<RequestBlock> = Vec::new();

    let view = TaskView {
        address: &task.address,
        owner_address: &task.owner_address,
        reward_address: &task.reward_address,
        balances: &task.balances,
        timestamp: task.timestamp,
        entropy: task.entropy,
    };

    for req in &task.requests {
        let id = req.id();
        let Some(block) = req.block() else {
            warn!(request = %id.short(), "Request index out of range, skipping");
            updates.push(StateUpdate::new(id));
            continue;
        };

        let (update, sent) = run_request(registry, task, view, &state, id, block);
        state.apply_state_update(&update);
        outgoing.extend(sent);
        updates.push(update);
    }

    let current = task.virtual_state.state_index();
    let next_index = current
        .checked_add(1)
        .ok_or(wasp_state::StateError::IndexOverflow(current))?;
    let batch = Batch::new(next_index, task.timestamp, updates);
    let next_state = task.virtual_state.with_batch(&batch)?;

    let result_tx = ScTransaction {
        state_block: Some(StateBlock {
            address: task.address,
            color: task.color,
            state_index: next_index,
            timestamp: task.timestamp,
            state_hash: next_state.hash(),
        }),
        requests: outgoing,
        signature: None,
    };
    debug!(
        state_index = next_index,
        requests = batch.size(),
        essence = %result_tx.essence_hash(),
        "Task calculated"
    );
    task.set_result(VmResult {
        result_tx,
        result_batch: batch,
    })
}

fn run_request(
    registry: &ProcessorRegistry,
    task: &VmTask,
    view: TaskView<'_>,
    state: &VirtualState,
    id: RequestId,
    block: &RequestBlock,
) -> (StateUpdate, Vec<RequestBlock>) {
    let mut ctx = VmContext::new(view, state, id, block);

    let outcome = if vars::is_reserved_code(block.code) {
        run_reserved(&mut ctx)
    } else if block.deposit < task.minimum_reward {
        debug!(
            request = %id.short(),
            deposit = block.deposit,
            minimum = task.minimum_reward,
            "Reward too small, request ignored"
        );
        Ok(())
    } else {
        match resolve_processor(registry, task, &ctx) {
            Some(processor) => run_program(processor.as_ref(), &mut ctx),
            None => Ok(()),
        }
    };

    if let Err(e) = outcome {
        warn!(request = %id.short(), code = block.code, error = %e, "Request failed, state update voided");
        ctx.rollback();
    }
    ctx.finish()
}

fn resolve_processor(
    registry: &ProcessorRegistry,
    task: &VmTask,
    ctx: &VmContext<'_>,
) -> Option<Arc<dyn Processor>> {
    let hash = task
        .program_hash
        .or_else(|| ctx.get_hash(vars::VAR_PROGRAM_HASH))?;
    let processor = registry.get(&hash);
    if processor.is_none() {
        debug!(program = %hash, "No processor loaded, request has no effect");
    }
    processor
}

fn run_program(processor: &dyn Processor, ctx: &mut VmContext<'_>) -> Result<()> {
    let code = ctx.request_code();
    let entry = processor
        .entry_point(code)
        .ok_or(VmError::EntryPointNotFound(code))?;
    match panic::catch_unwind(AssertUnwindSafe(|| entry.run(ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(VmError::Panicked(msg))
        }
    }
}

/// Requests handled by the node itself.
fn run_reserved(ctx: &mut VmContext<'_>) -> Result<()> {
    let code = ctx.request_code();
    if code == vars::REQ_NOP {
        return Ok(());
    }
    if ctx.request_sender() != ctx.owner_address() {
        return Err(VmError::Unauthorized(format!(
            "code {code:#06x} accepted only from the owner"
        )));
    }
    match code {
        vars::REQ_INIT => {
            if !ctx.is_origin_state() {
                return Err(VmError::Unauthorized("contract already initialized".into()));
            }
            let program_hash = ctx
                .request_arg(vars::ARG_PROGRAM_HASH)
                .and_then(|b| <[u8; 32]>::try_from(b).ok())
                .map(Hash256::from_bytes)
                .ok_or_else(|| VmError::Program("init without program hash".into()))?;
            ctx.set_hash(vars::VAR_PROGRAM_HASH, &program_hash)?;
            if let Some(desc) = ctx.request_arg(vars::ARG_DESCRIPTION).map(<[u8]>::to_vec) {
                ctx.set_var(vars::VAR_DESCRIPTION, desc)?;
            }
            if let Some(reward) = ctx.request_arg_i64(vars::ARG_MINIMUM_REWARD) {
                ctx.set_i64(vars::VAR_MINIMUM_REWARD, reward)?;
            }
            ctx.publish("contract initialized");
            Ok(())
        }
        vars::REQ_SET_MINIMUM_REWARD => {
            let reward = ctx
                .request_arg_i64(vars::ARG_MINIMUM_REWARD)
                .ok_or_else(|| VmError::Program("missing minimum reward".into()))?;
            ctx.set_i64(vars::VAR_MINIMUM_REWARD, reward)
        }
        vars::REQ_SET_DESCRIPTION => {
            let desc = ctx
                .request_arg(vars::ARG_DESCRIPTION)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| VmError::Program("missing description".into()))?;
            ctx.set_var(vars::VAR_DESCRIPTION, desc)
        }
        other => Err(VmError::EntryPointNotFound(other)),
    }
}

/// Runs tasks on the blocking thread pool.
///
/// At most `max_concurrent` tasks compute at once; the rest wait for a
/// permit. Completion is reported through a callback so callers can feed
/// the finished task back into their own event queue.
#[derive(Clone)]
pub struct VmRunner {
    registry: Arc<ProcessorRegistry>,
    source: Option<Arc<dyn ProgramSource>>,
    permits: Arc<Semaphore>,
}

impl VmRunner {
    pub fn new(registry: Arc<ProcessorRegistry>, max_concurrent: usize) -> Self {
        Self {
            registry,
            source: None,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn with_program_source(mut self, source: Arc<dyn ProgramSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    /// Compute `task` in the background, then hand it to `on_complete`.
    ///
    /// The callback is skipped if the computation itself fails.
    pub fn run_task_async<F>(&self, mut task: VmTask, on_complete: F)
    where
        F: FnOnce(VmTask) + Send + 'static,
    {
        let registry = self.registry.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let joined = tokio::task::spawn_blocking(move || {
                run_task(&registry, &mut task).map(|()| task)
            })
            .await;
            match joined {
                Ok(Ok(task)) => on_complete(task),
                Ok(Err(e)) => warn!(error = %e, "VM task failed"),
                Err(e) => warn!(error = %e, "VM task aborted"),
            }
        });
    }

    /// Make sure the processor for `program_hash` is loaded, then call `on_ready`.
    pub fn load_processor_async<F>(&self, program_hash: Hash256, on_ready: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.registry.is_loaded(&program_hash) {
            on_ready();
            return;
        }
        let Some(source) = self.source.clone() else {
            warn!(program = %program_hash, "No program source configured");
            return;
        };
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || {
            match registry.load_from(&program_hash, source.as_ref()) {
                Ok(_) => on_ready(),
                Err(e) => warn!(program = %program_hash, error = %e, "Failed to load processor"),
            }
        });
    }
}

impl std::fmt::Debug for VmRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmRunner")
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
