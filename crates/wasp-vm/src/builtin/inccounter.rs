//! Counter program.
//!
//! - [`CODE_INC`] adds one to [`VAR_COUNTER`]
//! - [`CODE_INC_AND_REPEAT`] adds one and schedules a [`CODE_INC`] to itself
//!   [`REPEAT_DELAY_SECS`] later
//! - [`CODE_INC_REPEAT_MANY`] adds one and, while [`VAR_NUM_REPEATS`] is
//!   positive, decrements it and schedules itself again

use crate::processor::{EntryPoint, Processor};
use crate::sandbox::Sandbox;
use crate::Result;
use std::collections::BTreeMap;

pub const CODE_INC: u16 = 1;
pub const CODE_INC_AND_REPEAT: u16 = 2;
pub const CODE_INC_REPEAT_MANY: u16 = 3;

pub const VAR_COUNTER: &str = "counter";
pub const VAR_NUM_REPEATS: &str = "num_repeats";
/// Request argument seeding [`VAR_NUM_REPEATS`].
pub const ARG_NUM_REPEATS: &str = "num_repeats";

pub const REPEAT_DELAY_SECS: u32 = 5;

#[derive(Debug, Default)]
pub struct IncCounter {
    inc: Inc,
    inc_and_repeat: IncAndRepeat,
    repeat_many: RepeatMany,
}

impl Processor for IncCounter {
    fn entry_point(&self, code: u16) -> Option<&dyn EntryPoint> {
        match code {
            CODE_INC => Some(&self.inc),
            CODE_INC_AND_REPEAT => Some(&self.inc_and_repeat),
            CODE_INC_REPEAT_MANY => Some(&self.repeat_many),
            _ => None,
        }
    }
}

fn increment(ctx: &mut dyn Sandbox) -> Result<i64> {
    let value = ctx.get_i64(VAR_COUNTER).unwrap_or(0) + 1;
    ctx.set_i64(VAR_COUNTER, value)?;
    Ok(value)
}

#[derive(Debug, Default)]
struct Inc;

impl EntryPoint for Inc {
    fn run(&self, ctx: &mut dyn Sandbox) -> Result<()> {
        let value = increment(ctx)?;
        ctx.publish(&format!("inccounter: counter = {value}"));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct IncAndRepeat;

impl EntryPoint for IncAndRepeat {
    fn run(&self, ctx: &mut dyn Sandbox) -> Result<()> {
        increment(ctx)?;
        ctx.send_request_to_self(CODE_INC, BTreeMap::new(), REPEAT_DELAY_SECS);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RepeatMany;

impl EntryPoint for RepeatMany {
    fn run(&self, ctx: &mut dyn Sandbox) -> Result<()> {
        increment(ctx)?;
        let remaining = match ctx.request_arg_i64(ARG_NUM_REPEATS) {
            Some(n) => n,
            None => ctx.get_i64(VAR_NUM_REPEATS).unwrap_or(0),
        };
        if remaining <= 0 {
            ctx.publish("inccounter: finished repeating");
            return ctx.del_var(VAR_NUM_REPEATS);
        }
        ctx.set_i64(VAR_NUM_REPEATS, remaining - 1)?;
        ctx.send_request_to_self(CODE_INC_REPEAT_MANY, BTreeMap::new(), REPEAT_DELAY_SECS);
        Ok(())
    }
}
