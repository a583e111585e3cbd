//! A program that accepts every request and changes nothing.

use crate::processor::{EntryPoint, Processor};
use crate::sandbox::Sandbox;
use crate::Result;

#[derive(Debug, Default)]
pub struct NilProcessor {
    entry: NilEntry,
}

#[derive(Debug, Default)]
struct NilEntry;

impl EntryPoint for NilEntry {
    fn run(&self, ctx: &mut dyn Sandbox) -> Result<()> {
        ctx.publish(&format!("nil: request code {}", ctx.request_code()));
        Ok(())
    }
}

impl Processor for NilProcessor {
    fn entry_point(&self, _code: u16) -> Option<&dyn EntryPoint> {
        Some(&self.entry)
    }
}
