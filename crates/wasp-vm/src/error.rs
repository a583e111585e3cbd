use thiserror::Error;
use wasp_common::Hash256;

/// VM errors. Program-level errors only ever void one request's update.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("entry point {0:#06x} not found")]
    EntryPointNotFound(u16),

    #[error("processor for program {0} not found")]
    ProcessorNotFound(Hash256),

    #[error("VM type {0} already registered")]
    DuplicateVmType(String),

    #[error("unknown VM type {0}")]
    UnknownVmType(String),

    #[error("invalid program binary: {0}")]
    InvalidProgram(String),

    #[error("program may not write reserved variable {0}")]
    ReservedVariable(String),

    #[error("request not authorized: {0}")]
    Unauthorized(String),

    #[error("program error: {0}")]
    Program(String),

    #[error("program panicked: {0}")]
    Panicked(String),

    #[error("task result already set")]
    ResultAlreadySet,

    #[error("state error: {0}")]
    State(#[from] wasp_state::StateError),
}
