//! Program processors and the registry that loads them.

use crate::sandbox::Sandbox;
use crate::{Result, VmError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use wasp_common::Hash256;

/// One callable entry of a program.
pub trait EntryPoint: Send + Sync {
    fn run(&self, ctx: &mut dyn Sandbox) -> Result<()>;
}

/// A loaded contract program.
pub trait Processor: Send + Sync {
    /// Entry point for a request code. `None` if the program does not handle it.
    fn entry_point(&self, code: u16) -> Option<&dyn EntryPoint>;
}

/// Builds a processor from a program binary of one VM type.
pub type ProcessorConstructor = fn(&[u8]) -> Result<Arc<dyn Processor>>;

/// Where program binaries come from, keyed by program hash.
pub trait ProgramSource: Send + Sync {
    /// The VM type and binary for `program_hash`, if known.
    fn load_program(&self, program_hash: &Hash256) -> Result<Option<(String, Vec<u8>)>>;
}

/// Node-wide table of VM types and loaded processors.
#[derive(Default)]
pub struct ProcessorRegistry {
    vm_types: RwLock<HashMap<String, ProcessorConstructor>>,
    processors: RwLock<HashMap<Hash256, Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_vm_type(&self, vm_type: &str, constructor: ProcessorConstructor) -> Result<()> {
        let mut types = self.vm_types.write();
        if types.contains_key(vm_type) {
            return Err(VmError::DuplicateVmType(vm_type.to_string()));
        }
        types.insert(vm_type.to_string(), constructor);
        debug!(vm_type, "Registered VM type");
        Ok(())
    }

    /// Install an already constructed processor under `program_hash`.
    pub fn register_processor(&self, program_hash: Hash256, processor: Arc<dyn Processor>) {
        self.processors.write().insert(program_hash, processor);
    }

    pub fn get(&self, program_hash: &Hash256) -> Option<Arc<dyn Processor>> {
        self.processors.read().get(program_hash).cloned()
    }

    pub fn is_loaded(&self, program_hash: &Hash256) -> bool {
        self.processors.read().contains_key(program_hash)
    }

    /// Construct and install the processor for a program binary.
    pub fn load(&self, program_hash: Hash256, vm_type: &str, binary: &[u8]) -> Result<Arc<dyn Processor>> {
        if let Some(existing) = self.get(&program_hash) {
            return Ok(existing);
        }
        let constructor = self
            .vm_types
            .read()
            .get(vm_type)
            .copied()
            .ok_or_else(|| VmError::UnknownVmType(vm_type.to_string()))?;
        let processor = constructor(binary)?;
        self.register_processor(program_hash, processor.clone());
        info!(program = %program_hash, vm_type, "Loaded processor");
        Ok(processor)
    }

    /// Load through `source` unless already present.
    pub fn load_from(&self, program_hash: &Hash256, source: &dyn ProgramSource) -> Result<Arc<dyn Processor>> {
        if let Some(existing) = self.get(program_hash) {
            return Ok(existing);
        }
        let (vm_type, binary) = source
            .load_program(program_hash)?
            .ok_or(VmError::ProcessorNotFound(*program_hash))?;
        self.load(*program_hash, &vm_type, &binary)
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("vm_types", &self.vm_types.read().len())
            .field("processors", &self.processors.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl EntryPoint for Noop {
        fn run(&self, _ctx: &mut dyn Sandbox) -> Result<()> {
            Ok(())
        }
    }

    struct OneEntry(Noop);

    impl Processor for OneEntry {
        fn entry_point(&self, code: u16) -> Option<&dyn EntryPoint> {
            (code == 7).then_some(&self.0 as &dyn EntryPoint)
        }
    }

    fn construct(binary: &[u8]) -> Result<Arc<dyn Processor>> {
        if binary != b"ok" {
            return Err(VmError::InvalidProgram("expected ok".into()));
        }
        Ok(Arc::new(OneEntry(Noop)))
    }

    struct MapSource(HashMap<Hash256, (String, Vec<u8>)>);

    impl ProgramSource for MapSource {
        fn load_program(&self, h: &Hash256) -> Result<Option<(String, Vec<u8>)>> {
            Ok(self.0.get(h).cloned())
        }
    }

    #[test]
    fn test_duplicate_vm_type_rejected() {
        let reg = ProcessorRegistry::new();
        reg.register_vm_type("test", construct).unwrap();
        assert!(matches!(
            reg.register_vm_type("test", construct),
            Err(VmError::DuplicateVmType(_))
        ));
    }

    #[test]
    fn test_load_by_vm_type() {
        let reg = ProcessorRegistry::new();
        reg.register_vm_type("test", construct).unwrap();
        let h = Hash256::hash(b"prog");

        assert!(matches!(reg.load(h, "other", b"ok"), Err(VmError::UnknownVmType(_))));
        assert!(matches!(reg.load(h, "test", b"bad"), Err(VmError::InvalidProgram(_))));
        assert!(!reg.is_loaded(&h));

        let p = reg.load(h, "test", b"ok").unwrap();
        assert!(p.entry_point(7).is_some());
        assert!(p.entry_point(8).is_none());
        assert!(reg.is_loaded(&h));
    }

    #[test]
    fn test_load_from_source() {
        let reg = ProcessorRegistry::new();
        reg.register_vm_type("test", construct).unwrap();
        let h = Hash256::hash(b"prog");
        let mut map = HashMap::new();
        map.insert(h, ("test".to_string(), b"ok".to_vec()));
        let source = MapSource(map);

        assert!(reg.load_from(&h, &source).is_ok());
        assert!(matches!(
            reg.load_from(&Hash256::hash(b"missing"), &source),
            Err(VmError::ProcessorNotFound(_))
        ));
    }
}
