use crate::config::ConsensusConfig;
use std::fmt;
use std::time::Duration;

/// Where the operator is in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// No solid state yet.
    NoSync,
    LeaderStarting,
    LeaderProcessingStarted,
    LeaderCalculationsFinished,
    LeaderResultFinalized,
    SubStarting,
    SubProcessingStarted,
    SubResultCalculated,
    SubResultFinalized,
}

impl Stage {
    pub fn is_leader(self) -> bool {
        matches!(
            self,
            Stage::LeaderStarting
                | Stage::LeaderProcessingStarted
                | Stage::LeaderCalculationsFinished
                | Stage::LeaderResultFinalized
        )
    }

    pub fn is_starting(self) -> bool {
        matches!(self, Stage::LeaderStarting | Stage::SubStarting)
    }

    /// How long the operator may stay in this stage.
    pub fn timeout(self, config: &ConsensusConfig) -> Duration {
        match self {
            Stage::NoSync => config.no_sync_timeout,
            Stage::LeaderStarting | Stage::SubStarting => config.starting_timeout,
            Stage::LeaderProcessingStarted
            | Stage::LeaderCalculationsFinished
            | Stage::SubProcessingStarted
            | Stage::SubResultCalculated => config.processing_timeout,
            Stage::LeaderResultFinalized | Stage::SubResultFinalized => {
                config.finalization_timeout
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::NoSync => "no_sync",
            Stage::LeaderStarting => "leader_starting",
            Stage::LeaderProcessingStarted => "leader_processing_started",
            Stage::LeaderCalculationsFinished => "leader_calculations_finished",
            Stage::LeaderResultFinalized => "leader_result_finalized",
            Stage::SubStarting => "sub_starting",
            Stage::SubProcessingStarted => "sub_processing_started",
            Stage::SubResultCalculated => "sub_result_calculated",
            Stage::SubResultFinalized => "sub_result_finalized",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_follow_config() {
        let config = ConsensusConfig {
            no_sync_timeout: Duration::from_millis(700),
            starting_timeout: Duration::from_millis(10),
            processing_timeout: Duration::from_millis(20),
            finalization_timeout: Duration::from_millis(30),
            ..ConsensusConfig::default()
        };
        assert_eq!(Stage::NoSync.timeout(&config), Duration::from_millis(700));
        assert_eq!(Stage::SubStarting.timeout(&config), Duration::from_millis(10));
        assert_eq!(Stage::LeaderCalculationsFinished.timeout(&config), Duration::from_millis(20));
        assert_eq!(Stage::SubResultFinalized.timeout(&config), Duration::from_millis(30));
    }
}
