//! `FailoverPolicy` presets (spec §4.4 table).

use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};

use aegis_types::Duration;

/// Named timing profile for the heartbeat monitor and election coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverPolicy {
    Aggressive,
    Balanced,
    Conservative,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        FailoverPolicy::Balanced
    }
}

/// The resolved timing parameters a [`FailoverPolicy`] expands to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailoverTiming {
    pub detection_threshold: Duration,
    pub election_delay: Duration,
    pub enable_pre_election: bool,
}

impl FailoverPolicy {
    pub fn timing(self) -> FailoverTiming {
        match self {
            FailoverPolicy::Aggressive => FailoverTiming {
                detection_threshold: Duration::from(StdDuration::from_millis(500)),
                election_delay: Duration::from(StdDuration::from_millis(100)),
                enable_pre_election: true,
            },
            FailoverPolicy::Balanced => FailoverTiming {
                detection_threshold: Duration::from(StdDuration::from_millis(1500)),
                election_delay: Duration::from(StdDuration::from_millis(300)),
                enable_pre_election: true,
            },
            FailoverPolicy::Conservative => FailoverTiming {
                detection_threshold: Duration::from(StdDuration::from_secs(3)),
                election_delay: Duration::from(StdDuration::from_secs(1)),
                enable_pre_election: false,
            },
        }
    }

    /// Number of consecutive misses (at `heartbeat_interval / 2` tick cadence)
    /// required before emitting `LeaderSuspected`. All three presets use the
    /// same quorum; only the tick-to-miss ratio implied by `detection`
    /// differs, which is already captured by `detection_threshold`.
    pub const fn miss_quorum(self) -> u32 {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggressive_is_tighter_than_conservative() {
        let aggressive = FailoverPolicy::Aggressive.timing();
        let conservative = FailoverPolicy::Conservative.timing();
        assert!(aggressive.detection_threshold.as_secs_f64() < conservative.detection_threshold.as_secs_f64());
        assert!(aggressive.enable_pre_election);
        assert!(!conservative.enable_pre_election);
    }

    #[test]
    fn default_policy_is_balanced() {
        assert_eq!(FailoverPolicy::default(), FailoverPolicy::Balanced);
    }
}
