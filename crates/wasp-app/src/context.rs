//! Node-wide shared services.

use crate::config::{AppConfig, DatabaseConfig};
use crate::registry::Registry;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use wasp_committee::{CommitteeConfig, NodeConnection};
use wasp_db::{check_schema_version, KvStore, MemoryStore, Partition, SqliteStore};
use wasp_peering::PeerNetwork;
use wasp_vm::{builtin, ProcessorRegistry, VmRunner};

/// Everything the committees of one node share: the store, the registry,
/// the processor table, the VM runner and the two outward connections.
pub struct NodeContext {
    pub config: AppConfig,
    pub store: Arc<dyn KvStore>,
    pub registry: Arc<Registry>,
    pub processors: Arc<ProcessorRegistry>,
    pub runner: VmRunner,
    pub network: Arc<dyn PeerNetwork>,
    pub node_conn: Arc<dyn NodeConnection>,
}

impl NodeContext {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KvStore>,
        network: Arc<dyn PeerNetwork>,
        node_conn: Arc<dyn NodeConnection>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new(store.clone()));
        let processors = Arc::new(ProcessorRegistry::new());
        builtin::register_builtins(&processors).context("registering built-in programs")?;
        let runner = VmRunner::new(processors.clone(), config.vm.max_concurrent)
            .with_program_source(registry.clone());
        Ok(Self {
            config,
            store,
            registry,
            processors,
            runner,
            network,
            node_conn,
        })
    }

    /// Open the configured store and check its schema version.
    ///
    /// A store written by an incompatible version is an error the node
    /// must not start with.
    pub fn open_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn KvStore>> {
        let store: Arc<dyn KvStore> = if config.in_memory {
            Arc::new(MemoryStore::new())
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Arc::new(
                SqliteStore::open(&config.path)
                    .with_context(|| format!("opening database {}", config.path.display()))?,
            )
        };
        check_schema_version(store.as_ref()).context("database schema check")?;
        info!(
            path = %config.path.display(),
            in_memory = config.in_memory,
            "Database opened"
        );
        Ok(store)
    }

    pub fn committee_config(&self) -> CommitteeConfig {
        self.config.committee_config()
    }

    /// Store partition of one contract.
    pub fn partition(&self, address: &wasp_common::Address) -> Partition {
        Partition::new(self.store.clone(), *address)
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("location", &self.network.my_location())
            .field("processors", &self.processors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::Address;
    use wasp_db::{make_key, ObjectType};

    #[test]
    fn test_open_store_records_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("wasp.db"),
            in_memory: false,
        };
        let store = NodeContext::open_store(&config).unwrap();
        let key = make_key(ObjectType::SchemaVersion, &[]);
        assert!(store.get(&Address::NIL, &key).unwrap().is_some());
        drop(store);
        // Reopening the same file passes the check.
        assert!(NodeContext::open_store(&config).is_ok());
    }

    #[test]
    fn test_open_store_rejects_foreign_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wasp.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            let key = make_key(ObjectType::SchemaVersion, &[]);
            store.put(&Address::NIL, &key, &[99]).unwrap();
        }
        let config = DatabaseConfig {
            path,
            in_memory: false,
        };
        let Err(err) = NodeContext::open_store(&config) else {
            panic!("store with a foreign schema opened");
        };
        assert!(format!("{:#}", err).contains("schema"));
    }
}
