//! Execution of request batches against a virtual state snapshot.
//!
//! A [`VmTask`] carries everything a run needs: the state snapshot, the
//! ordered requests, the batch timestamp and an entropy value agreed by the
//! committee. [`run_task`] turns it into a result batch plus the skeleton of
//! the result transaction, deterministically: the same task always yields the
//! same essence hash on every node.
//!
//! Programs implement [`Processor`] and see the world only through the
//! [`Sandbox`] trait. A failing request contributes an empty state update.
//! [`VmRunner`] runs tasks on the blocking pool with bounded concurrency.

pub mod builtin;
mod error;
mod processor;
mod runner;
mod sandbox;
mod task;

pub use error::VmError;
pub use processor::{EntryPoint, Processor, ProcessorConstructor, ProcessorRegistry, ProgramSource};
pub use runner::{run_task, VmRunner};
pub use sandbox::{Sandbox, VmContext};
pub use task::{batch_hash, RequestRef, VmResult, VmTask};

/// Result type for VM operations.
pub type Result<T> = std::result::Result<T, VmError>;
