//! Application orchestration for rs-wasp.

pub mod committees;
pub mod config;
pub mod context;
pub mod dev;
pub mod ledger;
pub mod logging;
pub mod node;
pub mod registry;
pub mod run_cmd;

pub use committees::Committees;
pub use config::{AppConfig, ConfigBuilder};
pub use context::NodeContext;
pub use dev::DevContract;
pub use ledger::{EventSink, InMemoryLedger, LedgerHandle};
pub use logging::{LogConfig, LogFormat};
pub use node::{CommitteeInfo, Node, NodeInfo};
pub use registry::{ProgramMetadata, Registry};
pub use run_cmd::{run_node, start_dev_cluster, DevClusterOptions, RunOptions};
