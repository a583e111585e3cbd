//! Deterministic contracts for development clusters.
//!
//! Every node of a dev cluster derives the same key shares, address and
//! origin transaction from a shared seed, so a cluster can be set up
//! without a key generation ceremony. The program is the built-in counter.

use crate::registry::Registry;
use std::collections::BTreeMap;
use wasp_committee::BootupData;
use wasp_common::Address;
use wasp_crypto::DkShare;
use wasp_state::origin::{create_origin_transaction, OriginParams};
use wasp_state::{Balances, ScTransaction};
use wasp_vm::builtin;

/// Initial token supply of a dev contract, in its own color.
pub const DEV_SUPPLY: i64 = 1;

#[derive(Debug, Clone)]
pub struct DevContract {
    pub shares: Vec<DkShare>,
    pub bootup: BootupData,
    pub origin: ScTransaction,
}

impl DevContract {
    /// Derive a T-of-N contract from `seed`. `nodes` are the committee
    /// locations in peer index order.
    pub fn generate(seed: &str, nodes: Vec<String>, quorum: u16) -> anyhow::Result<Self> {
        if nodes.is_empty() {
            anyhow::bail!("a committee needs at least one node");
        }
        let n = nodes.len() as u16;
        let shares = DkShare::generate_committee_from_seed(n, quorum, seed.as_bytes())?;
        let address = shares[0].address();
        let owner = Address::from_key_material(format!("{}/owner", seed).as_bytes());
        let origin = create_origin_transaction(&OriginParams {
            address,
            owner,
            program_hash: builtin::program_hash(builtin::INCCOUNTER),
            description: format!("dev contract {}", seed),
            minimum_reward: 0,
        });
        let bootup = BootupData {
            address,
            owner_address: owner,
            color: origin.id(),
            committee_nodes: nodes,
            access_nodes: Vec::new(),
            active: true,
        };
        bootup.validate()?;
        Ok(Self {
            shares,
            bootup,
            origin,
        })
    }

    pub fn address(&self) -> Address {
        self.bootup.address
    }

    /// Balances the dev ledger starts the contract with.
    pub fn balances(&self) -> Balances {
        let mut balances = BTreeMap::new();
        balances.insert(self.bootup.color, DEV_SUPPLY);
        balances
    }

    /// Write everything node `index` needs to run the contract.
    pub fn install(&self, registry: &Registry, index: u16, active: bool) -> anyhow::Result<()> {
        let share = self
            .shares
            .get(index as usize)
            .ok_or_else(|| anyhow::anyhow!("no key share for peer {}", index))?;
        registry.save_dkshare(share)?;
        registry.save_origin_transaction(&self.origin)?;
        registry.save_program(builtin::VM_TYPE, "built-in counter", builtin::INCCOUNTER.as_bytes())?;
        let mut bootup = self.bootup.clone();
        bootup.active = active;
        registry.save_bootup_data(&bootup)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wasp_db::MemoryStore;

    fn nodes() -> Vec<String> {
        (0..4).map(|i| format!("127.0.0.1:{}", 4000 + i)).collect()
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = DevContract::generate("alpha", nodes(), 3).unwrap();
        let b = DevContract::generate("alpha", nodes(), 3).unwrap();
        let c = DevContract::generate("beta", nodes(), 3).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.bootup.color, b.bootup.color);
        assert_ne!(a.address(), c.address());
        assert_eq!(a.origin.state_index(), Some(0));
        assert!(DevContract::generate("alpha", vec![], 1).is_err());
    }

    #[test]
    fn test_install_writes_registry() {
        let contract = DevContract::generate("alpha", nodes(), 3).unwrap();
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        contract.install(&registry, 2, false).unwrap();

        let bootup = registry.get_bootup_data(&contract.address()).unwrap().unwrap();
        assert!(!bootup.active);
        assert_eq!(bootup.peer_index("127.0.0.1:4002"), Some(2));
        let share = registry.get_dkshare(&contract.address()).unwrap().unwrap();
        assert_eq!(share.to_record().index, 2);
        assert_eq!(
            registry.get_origin_transaction(&contract.address()).unwrap(),
            Some(contract.origin.clone())
        );
        assert!(contract.install(&registry, 4, true).is_err());
    }
}
