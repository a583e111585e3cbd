//! Reserved variable names and request codes.
//!
//! Names starting with `$` are owned by the node itself; programs must not
//! write them. Request codes at or above [`RESERVED_CODE_START`] are handled
//! by the node without invoking the contract program.

pub const VAR_ADDRESS: &str = "$address$";
pub const VAR_PROGRAM_HASH: &str = "$program_hash$";
pub const VAR_DESCRIPTION: &str = "$description$";
pub const VAR_MINIMUM_REWARD: &str = "$minimum_reward$";

pub const RESERVED_CODE_START: u16 = 0xFF00;

/// Initializes a fresh contract: program hash, description, minimum reward.
pub const REQ_INIT: u16 = 0xFF00;
pub const REQ_SET_MINIMUM_REWARD: u16 = 0xFF01;
pub const REQ_SET_DESCRIPTION: u16 = 0xFF02;
/// Does nothing; useful to force a state transition.
pub const REQ_NOP: u16 = 0xFFFF;

pub const ARG_PROGRAM_HASH: &str = "program_hash";
pub const ARG_DESCRIPTION: &str = "description";
pub const ARG_MINIMUM_REWARD: &str = "minimum_reward";

pub fn is_reserved_code(code: u16) -> bool {
    code >= RESERVED_CODE_START
}

pub fn is_reserved_var(name: &str) -> bool {
    name.starts_with('$')
}
