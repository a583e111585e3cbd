//! Timing and sizing knobs for one committee.

use std::time::Duration;
use wasp_common::Address;

/// Deadlines for each consensus stage and related cadences.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Waiting for work as leader, or for the leader as follower. On expiry
    /// the leader rotates, but only if the backlog has work.
    pub starting_timeout: Duration,
    /// From starting a batch until T signatures are collected.
    pub processing_timeout: Duration,
    /// From posting the result until the ledger confirms it.
    pub finalization_timeout: Duration,
    pub inclusion_poll_period: Duration,
    pub balances_retry_period: Duration,
    /// Followers repeat their backlog notifications to the leader this often.
    pub renotify_period: Duration,
    /// Maximum distance between a batch timestamp and the local clock.
    pub clock_tolerance: Duration,
    pub max_batch_size: usize,
    /// Ids peers notified but whose request never arrived are forgotten after this.
    pub notified_request_ttl: Duration,
    /// How long the operator waits for a first solid state.
    pub no_sync_timeout: Duration,
    /// Where this node's fees go. The contract owner when unset.
    pub reward_address: Option<Address>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            starting_timeout: Duration::from_secs(10),
            processing_timeout: Duration::from_secs(20),
            finalization_timeout: Duration::from_secs(60),
            inclusion_poll_period: Duration::from_secs(1),
            balances_retry_period: Duration::from_secs(2),
            renotify_period: Duration::from_secs(2),
            clock_tolerance: Duration::from_secs(30),
            max_batch_size: 100,
            notified_request_ttl: Duration::from_secs(120),
            no_sync_timeout: Duration::from_secs(3600),
            reward_address: None,
        }
    }
}

/// State manager sync cadence.
#[derive(Debug, Clone)]
pub struct StateSyncConfig {
    /// How long a `GetBatch` may go unanswered before asking the next peer.
    pub sync_retry_period: Duration,
    /// Ping-pong cadence while synced.
    pub ping_period: Duration,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            sync_retry_period: Duration::from_secs(1),
            ping_period: Duration::from_secs(10),
        }
    }
}

/// Queue sizing and ticking for the committee actor.
#[derive(Debug, Clone)]
pub struct CommitteeConfig {
    pub consensus: ConsensusConfig,
    pub state_sync: StateSyncConfig,
    /// Capacity of the external event queue. Events beyond it are dropped.
    pub queue_size: usize,
    pub timer_tick: Duration,
}

impl Default for CommitteeConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            state_sync: StateSyncConfig::default(),
            queue_size: 1000,
            timer_tick: Duration::from_millis(50),
        }
    }
}
