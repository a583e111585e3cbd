//! The node registry.
//!
//! Node-wide records live in the nil-address partition of the store:
//! bootup data, key shares and origin transactions per contract address,
//! and contract programs.
//! Program code is content addressed; reading it back verifies the hash.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use wasp_committee::BootupData;
use wasp_common::{Address, Decodable, Encodable, Hash256};
use wasp_crypto::{DkShare, DkShareRecord};
use wasp_db::{make_key, KvStore, ObjectType, Partition};
use wasp_state::ScTransaction;
use wasp_vm::{ProgramSource, VmError};

/// Describes a stored program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramMetadata {
    /// Hash of the program code.
    pub program_hash: Hash256,
    pub vm_type: String,
    #[serde(default)]
    pub description: String,
}

pub struct Registry {
    partition: Partition,
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            partition: Partition::registry(store),
        }
    }

    // ----- bootup data ---------------------------------------------------

    pub fn save_bootup_data(&self, bootup: &BootupData) -> anyhow::Result<()> {
        bootup
            .validate()
            .with_context(|| format!("bootup data for {}", bootup.address))?;
        let key = make_key(ObjectType::BootupData, bootup.address.as_bytes());
        self.partition.put(&key, &serde_json::to_vec(bootup)?)?;
        info!(
            address = %bootup.address.short(),
            nodes = bootup.committee_nodes.len(),
            active = bootup.active,
            "Saved bootup data"
        );
        Ok(())
    }

    pub fn get_bootup_data(&self, address: &Address) -> anyhow::Result<Option<BootupData>> {
        let key = make_key(ObjectType::BootupData, address.as_bytes());
        match self.partition.get(&key)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("corrupt bootup record")?,
            )),
            None => Ok(None),
        }
    }

    /// All bootup records, ordered by address.
    pub fn bootup_records(&self) -> anyhow::Result<Vec<BootupData>> {
        let prefix = make_key(ObjectType::BootupData, &[]);
        self.partition
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).context("corrupt bootup record"))
            .collect()
    }

    /// Flip the active flag. Returns the updated record.
    pub fn set_active(&self, address: &Address, active: bool) -> anyhow::Result<BootupData> {
        let mut bootup = self
            .get_bootup_data(address)?
            .with_context(|| format!("no bootup data for {}", address))?;
        if bootup.active != active {
            bootup.active = active;
            self.save_bootup_data(&bootup)?;
        }
        Ok(bootup)
    }

    // ----- key shares ----------------------------------------------------

    pub fn save_dkshare(&self, share: &DkShare) -> anyhow::Result<()> {
        let record = share.to_record();
        let key = make_key(ObjectType::DistributedKeyData, record.address.as_bytes());
        self.partition.put(&key, &serde_json::to_vec(&record)?)?;
        debug!(address = %record.address.short(), index = record.index, "Saved key share");
        Ok(())
    }

    pub fn get_dkshare(&self, address: &Address) -> anyhow::Result<Option<DkShare>> {
        let key = make_key(ObjectType::DistributedKeyData, address.as_bytes());
        let Some(bytes) = self.partition.get(&key)? else {
            return Ok(None);
        };
        let record: DkShareRecord = serde_json::from_slice(&bytes).context("corrupt key share record")?;
        let share = DkShare::from_record(&record)
            .with_context(|| format!("invalid key share for {}", address))?;
        if share.address() != *address {
            anyhow::bail!("key share stored under {} belongs to {}", address, share.address());
        }
        Ok(Some(share))
    }

    // ----- origin transactions -----------------------------------------

    pub fn save_origin_transaction(&self, tx: &ScTransaction) -> anyhow::Result<()> {
        let Some(sb) = tx.state_block.as_ref() else {
            anyhow::bail!("origin transaction has no state block");
        };
        let key = make_key(ObjectType::OriginTransaction, sb.address.as_bytes());
        self.partition.put(&key, &tx.to_bytes()?)?;
        Ok(())
    }

    pub fn get_origin_transaction(&self, address: &Address) -> anyhow::Result<Option<ScTransaction>> {
        let key = make_key(ObjectType::OriginTransaction, address.as_bytes());
        match self.partition.get(&key)? {
            Some(bytes) => Ok(Some(
                ScTransaction::from_bytes(&bytes).context("corrupt origin transaction")?,
            )),
            None => Ok(None),
        }
    }

    // ----- programs ------------------------------------------------------

    /// Store a program and return its hash.
    pub fn save_program(&self, vm_type: &str, description: &str, code: &[u8]) -> anyhow::Result<Hash256> {
        let program_hash = Hash256::hash(code);
        let meta = ProgramMetadata {
            program_hash,
            vm_type: vm_type.to_string(),
            description: description.to_string(),
        };
        self.partition.put(
            &make_key(ObjectType::ProgramCode, program_hash.as_bytes()),
            code,
        )?;
        self.partition.put(
            &make_key(ObjectType::ProgramMetadata, program_hash.as_bytes()),
            &serde_json::to_vec(&meta)?,
        )?;
        info!(program = %program_hash, vm_type, bytes = code.len(), "Saved program");
        Ok(program_hash)
    }

    pub fn get_program_metadata(&self, program_hash: &Hash256) -> anyhow::Result<Option<ProgramMetadata>> {
        let key = make_key(ObjectType::ProgramMetadata, program_hash.as_bytes());
        match self.partition.get(&key)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("corrupt program metadata")?,
            )),
            None => Ok(None),
        }
    }

    /// Program code, verified against its hash.
    pub fn get_program_code(&self, program_hash: &Hash256) -> anyhow::Result<Option<Vec<u8>>> {
        let key = make_key(ObjectType::ProgramCode, program_hash.as_bytes());
        let Some(code) = self.partition.get(&key)? else {
            return Ok(None);
        };
        let actual = Hash256::hash(&code);
        if actual != *program_hash {
            anyhow::bail!("program code {} fails hash check (got {})", program_hash, actual);
        }
        Ok(Some(code))
    }
}

impl ProgramSource for Registry {
    fn load_program(&self, program_hash: &Hash256) -> wasp_vm::Result<Option<(String, Vec<u8>)>> {
        let loaded = self
            .get_program_metadata(program_hash)
            .and_then(|meta| match meta {
                Some(meta) => Ok(self
                    .get_program_code(program_hash)?
                    .map(|code| (meta.vm_type, code))),
                None => Ok(None),
            });
        loaded.map_err(|e| VmError::InvalidProgram(format!("{:#}", e)))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}
