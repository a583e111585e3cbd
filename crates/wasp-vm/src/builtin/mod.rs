//! Programs compiled into the node.
//!
//! Built-in programs are identified by the hash of their name and are
//! registered under the `builtin` VM type, whose program binary is simply
//! the name. They serve development clusters and tests.

pub mod inccounter;
pub mod nil;

use crate::processor::{Processor, ProcessorRegistry};
use crate::{Result, VmError};
use std::sync::Arc;
use wasp_common::Hash256;

pub const VM_TYPE: &str = "builtin";

pub const NIL: &str = "nil";
pub const INCCOUNTER: &str = "inccounter";

/// Program hash of a built-in program.
pub fn program_hash(name: &str) -> Hash256 {
    Hash256::hash(name.as_bytes())
}

fn construct(binary: &[u8]) -> Result<Arc<dyn Processor>> {
    match binary {
        b"nil" => Ok(Arc::new(nil::NilProcessor::default())),
        b"inccounter" => Ok(Arc::new(inccounter::IncCounter::default())),
        other => Err(VmError::InvalidProgram(format!(
            "unknown builtin {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Register the `builtin` VM type and preload every built-in program.
pub fn register_builtins(registry: &ProcessorRegistry) -> Result<()> {
    registry.register_vm_type(VM_TYPE, construct)?;
    for name in [NIL, INCCOUNTER] {
        registry.load(program_hash(name), VM_TYPE, name.as_bytes())?;
    }
    Ok(())
}
