//! Configuration loading for rs-wasp.
//!
//! Configuration comes from a TOML file with environment variable
//! overrides. Every section has defaults suitable for a single local node.
//! Durations are given in milliseconds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wasp_committee::{CommitteeConfig, ConsensusConfig, StateSyncConfig};
use wasp_common::Address;
use wasp_peering::PeeringConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Node identity.
    #[serde(default)]
    pub node: NodeConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Peer transport configuration.
    #[serde(default)]
    pub peering: PeeringSection,

    /// Consensus deadlines and committee queue sizing.
    #[serde(default)]
    pub consensus: ConsensusSection,

    /// State manager sync cadence.
    #[serde(default)]
    pub state_sync: StateSyncSection,

    /// Batch execution.
    #[serde(default)]
    pub vm: VmSection,

    /// Development ledger.
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name for identification in logs.
    #[serde(default = "default_node_name")]
    pub name: String,

    /// `host:port` other committee members know this node by. Must match
    /// an entry of the committee node list in bootup data.
    #[serde(default = "default_location")]
    pub location: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            location: default_location(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Keep everything in memory. Nothing survives a restart.
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            in_memory: false,
        }
    }
}

/// Peer transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringSection {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,

    /// A peer not heard from for this long counts as dead.
    #[serde(default = "default_dead_after_ms")]
    pub dead_after_ms: u64,

    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Outgoing messages buffered per connection.
    #[serde(default = "default_send_queue_size")]
    pub send_queue_size: usize,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for PeeringSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            heartbeat_interval_ms: default_heartbeat_ms(),
            dead_after_ms: default_dead_after_ms(),
            connect_retry_ms: default_connect_retry_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            send_queue_size: default_send_queue_size(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Consensus deadlines and committee queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSection {
    #[serde(default = "default_starting_timeout_ms")]
    pub starting_timeout_ms: u64,

    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,

    #[serde(default = "default_finalization_timeout_ms")]
    pub finalization_timeout_ms: u64,

    #[serde(default = "default_inclusion_poll_ms")]
    pub inclusion_poll_period_ms: u64,

    #[serde(default = "default_balances_retry_ms")]
    pub balances_retry_period_ms: u64,

    #[serde(default = "default_renotify_ms")]
    pub renotify_period_ms: u64,

    /// Maximum distance between a batch timestamp and the local clock.
    #[serde(default = "default_clock_tolerance_ms")]
    pub clock_tolerance_ms: u64,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Capacity of each committee's external event queue.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_timer_tick_ms")]
    pub timer_tick_ms: u64,

    /// Notified requests that never arrive are forgotten after this.
    #[serde(default = "default_notified_request_ttl_ms")]
    pub notified_request_ttl_ms: u64,

    /// How long a committee waits for its first solid state.
    #[serde(default = "default_no_sync_timeout_ms")]
    pub no_sync_timeout_ms: u64,

    /// Hex address credited with this node's fees. Defaults to the contract owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_address: Option<Address>,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            starting_timeout_ms: default_starting_timeout_ms(),
            processing_timeout_ms: default_processing_timeout_ms(),
            finalization_timeout_ms: default_finalization_timeout_ms(),
            inclusion_poll_period_ms: default_inclusion_poll_ms(),
            balances_retry_period_ms: default_balances_retry_ms(),
            renotify_period_ms: default_renotify_ms(),
            clock_tolerance_ms: default_clock_tolerance_ms(),
            max_batch_size: default_max_batch_size(),
            queue_size: default_queue_size(),
            timer_tick_ms: default_timer_tick_ms(),
            notified_request_ttl_ms: default_notified_request_ttl_ms(),
            no_sync_timeout_ms: default_no_sync_timeout_ms(),
            reward_address: None,
        }
    }
}

/// State manager sync cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncSection {
    /// How long a batch request may go unanswered before asking the next peer.
    #[serde(default = "default_sync_retry_ms")]
    pub sync_retry_period_ms: u64,

    #[serde(default = "default_ping_ms")]
    pub ping_period_ms: u64,
}

impl Default for StateSyncSection {
    fn default() -> Self {
        Self {
            sync_retry_period_ms: default_sync_retry_ms(),
            ping_period_ms: default_ping_ms(),
        }
    }
}

/// Batch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSection {
    /// VM tasks running at once across all committees of the node.
    #[serde(default = "default_vm_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for VmSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_vm_max_concurrent(),
        }
    }
}

/// The in-process ledger used by development nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Delay between posting a transaction and its confirmation.
    #[serde(default = "default_confirm_delay_ms")]
    pub confirm_delay_ms: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            confirm_delay_ms: default_confirm_delay_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to use ANSI colors.
    #[serde(default = "default_true")]
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
        }
    }
}

// Default value functions

fn default_node_name() -> String {
    "rs-wasp".to_string()
}

fn default_location() -> String {
    "127.0.0.1:4000".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("wasp.db")
}

fn default_listen_addr() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_heartbeat_ms() -> u64 {
    1_000
}

fn default_dead_after_ms() -> u64 {
    5_000
}

fn default_connect_retry_ms() -> u64 {
    2_000
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_send_queue_size() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

fn default_starting_timeout_ms() -> u64 {
    10_000
}

fn default_processing_timeout_ms() -> u64 {
    20_000
}

fn default_finalization_timeout_ms() -> u64 {
    60_000
}

fn default_inclusion_poll_ms() -> u64 {
    1_000
}

fn default_balances_retry_ms() -> u64 {
    2_000
}

fn default_renotify_ms() -> u64 {
    2_000
}

fn default_clock_tolerance_ms() -> u64 {
    30_000
}

fn default_max_batch_size() -> usize {
    100
}

fn default_queue_size() -> usize {
    1000
}

fn default_timer_tick_ms() -> u64 {
    50
}

fn default_notified_request_ttl_ms() -> u64 {
    120_000
}

fn default_no_sync_timeout_ms() -> u64 {
    3_600_000
}

fn default_sync_retry_ms() -> u64 {
    1_000
}

fn default_ping_ms() -> u64 {
    10_000
}

fn default_vm_max_concurrent() -> usize {
    4
}

fn default_confirm_delay_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Environment variables take precedence over file configuration.
    /// Variables use the pattern: RS_WASP_<SECTION>_<KEY>
    ///
    /// Examples:
    /// - RS_WASP_NODE_NAME
    /// - RS_WASP_NODE_LOCATION
    /// - RS_WASP_DATABASE_PATH
    /// - RS_WASP_PEERING_LISTEN_ADDR
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Node overrides
        if let Some(val) = var("RS_WASP_NODE_NAME") {
            self.node.name = val;
        }
        if let Some(val) = var("RS_WASP_NODE_LOCATION") {
            self.node.location = val;
        }

        // Database overrides
        if let Some(val) = var("RS_WASP_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
        }
        if let Some(val) = var("RS_WASP_DATABASE_IN_MEMORY") {
            self.database.in_memory = val.parse().unwrap_or(false);
        }

        // Peering overrides
        if let Some(val) = var("RS_WASP_PEERING_LISTEN_ADDR") {
            self.peering.listen_addr = val;
        }

        // Consensus overrides
        if let Some(val) = var("RS_WASP_CONSENSUS_STARTING_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.consensus.starting_timeout_ms = v;
            }
        }
        if let Some(val) = var("RS_WASP_CONSENSUS_MAX_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.consensus.max_batch_size = v;
            }
        }
        if let Some(val) = var("RS_WASP_CONSENSUS_REWARD_ADDRESS") {
            if let Ok(addr) = Address::from_hex(&val) {
                self.consensus.reward_address = Some(addr);
            }
        }

        // VM overrides
        if let Some(val) = var("RS_WASP_VM_MAX_CONCURRENT") {
            if let Ok(v) = val.parse() {
                self.vm.max_concurrent = v;
            }
        }

        // Logging overrides
        if let Some(val) = var("RS_WASP_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("RS_WASP_LOG_FORMAT") {
            self.logging.format = val;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let location_ok = self
            .node
            .location
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !location_ok {
            anyhow::bail!("node.location must be host:port, got {}", self.node.location);
        }
        if self.peering.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("Invalid peering.listen_addr: {}", self.peering.listen_addr);
        }
        if self.peering.heartbeat_interval_ms == 0 {
            anyhow::bail!("peering.heartbeat_interval_ms must be > 0");
        }
        if self.peering.dead_after_ms <= self.peering.heartbeat_interval_ms {
            anyhow::bail!("peering.dead_after_ms must exceed the heartbeat interval");
        }
        if self.consensus.timer_tick_ms == 0 {
            anyhow::bail!("consensus.timer_tick_ms must be > 0");
        }
        if self.consensus.max_batch_size == 0 {
            anyhow::bail!("consensus.max_batch_size must be > 0");
        }
        if self.consensus.queue_size == 0 {
            anyhow::bail!("consensus.queue_size must be > 0");
        }
        for (name, value) in [
            ("no_sync_timeout_ms", self.consensus.no_sync_timeout_ms),
            ("starting_timeout_ms", self.consensus.starting_timeout_ms),
            ("processing_timeout_ms", self.consensus.processing_timeout_ms),
            ("finalization_timeout_ms", self.consensus.finalization_timeout_ms),
        ] {
            if value < self.consensus.timer_tick_ms {
                anyhow::bail!("consensus.{} must not be shorter than the timer tick", name);
            }
        }
        if self.vm.max_concurrent == 0 {
            anyhow::bail!("vm.max_concurrent must be > 0");
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be text or json");
        }
        Ok(())
    }

    /// Peering settings for this node.
    pub fn peering_config(&self) -> PeeringConfig {
        PeeringConfig {
            listen_addr: self.peering.listen_addr.clone(),
            my_location: self.node.location.clone(),
            heartbeat_interval: ms(self.peering.heartbeat_interval_ms),
            dead_after: ms(self.peering.dead_after_ms),
            connect_retry: ms(self.peering.connect_retry_ms),
            handshake_timeout: ms(self.peering.handshake_timeout_ms),
            send_queue_size: self.peering.send_queue_size,
            max_frame_size: self.peering.max_frame_size,
        }
    }

    /// Settings shared by every committee the node runs.
    pub fn committee_config(&self) -> CommitteeConfig {
        let c = &self.consensus;
        CommitteeConfig {
            consensus: ConsensusConfig {
                starting_timeout: ms(c.starting_timeout_ms),
                processing_timeout: ms(c.processing_timeout_ms),
                finalization_timeout: ms(c.finalization_timeout_ms),
                inclusion_poll_period: ms(c.inclusion_poll_period_ms),
                balances_retry_period: ms(c.balances_retry_period_ms),
                renotify_period: ms(c.renotify_period_ms),
                clock_tolerance: ms(c.clock_tolerance_ms),
                max_batch_size: c.max_batch_size,
                notified_request_ttl: ms(c.notified_request_ttl_ms),
                no_sync_timeout: ms(c.no_sync_timeout_ms),
                reward_address: c.reward_address,
            },
            state_sync: StateSyncConfig {
                sync_retry_period: ms(self.state_sync.sync_retry_period_ms),
                ping_period: ms(self.state_sync.ping_period_ms),
            },
            queue_size: c.queue_size,
            timer_tick: ms(c.timer_tick_ms),
        }
    }

    /// Generate a sample configuration file.
    pub fn sample_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Builder for AppConfig.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node name.
    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.node.name = name.into();
        self
    }

    /// Set the peering location and listen on the same address.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        let location = location.into();
        self.config.peering.listen_addr = location.clone();
        self.config.node.location = location;
        self
    }

    /// Set the database path.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database.path = path.into();
        self
    }

    pub fn in_memory_database(mut self) -> Self {
        self.config.database.in_memory = true;
        self
    }

    pub fn timer_tick_ms(mut self, tick: u64) -> Self {
        self.config.consensus.timer_tick_ms = tick;
        self
    }

    pub fn starting_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.consensus.starting_timeout_ms = timeout;
        self
    }

    pub fn confirm_delay_ms(mut self, delay: u64) -> Self {
        self.config.ledger.confirm_delay_ms = delay;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> AppConfig {
        self.config
    }
}
