use crate::api::ConfigError;
use std::convert::TryFrom;
use tokio::time::Duration;

/// Optional overrides of the timing and batching parameters. Anything left as `None` falls back
/// to a default.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    /// How long a follower waits without hearing from a leader before it starts an election.
    /// The actual wait is picked uniformly from `[election_timeout, 2 * election_timeout]`.
    /// Defaults to 500ms.
    pub election_timeout: Option<Duration>,
    /// Interval between a leader's AppendEntries to each peer. Defaults to 150ms.
    pub heartbeat_interval: Option<Duration>,
    /// Lease of a client session. Must be longer than the election timeout. Defaults to 5s.
    pub session_timeout: Option<Duration>,
    /// Bound on a single outbound RPC. Defaults to half the election timeout.
    pub rpc_timeout: Option<Duration>,
    /// Max number of log entries in a single AppendEntries. Defaults to 64.
    pub max_entries_per_append: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RaftOptionsValidated {
    pub(crate) election_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) session_timeout: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) max_entries_per_append: usize,
}

impl RaftOptionsValidated {
    pub(crate) fn election_min_timeout(&self) -> Duration {
        self.election_timeout
    }

    pub(crate) fn election_max_timeout(&self) -> Duration {
        self.election_timeout * 2
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, duration) in [
            ("election timeout", self.election_timeout),
            ("heartbeat interval", self.heartbeat_interval),
            ("session timeout", self.session_timeout),
            ("RPC timeout", self.rpc_timeout),
        ]
        .iter()
        {
            if *duration == Duration::from_millis(0) {
                return Err(ConfigError::ZeroDuration(*name));
            }
        }
        if self.heartbeat_interval >= self.election_timeout {
            return Err(ConfigError::HeartbeatNotBelowElectionTimeout);
        }
        if self.election_timeout >= self.session_timeout {
            return Err(ConfigError::ElectionTimeoutNotBelowSessionTimeout);
        }
        if self.rpc_timeout >= self.election_timeout {
            return Err(ConfigError::RpcTimeoutNotBelowElectionTimeout);
        }
        if self.max_entries_per_append == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = ConfigError;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let election_timeout = options.election_timeout.unwrap_or(Duration::from_millis(500));
        let values = RaftOptionsValidated {
            election_timeout,
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_millis(150)),
            session_timeout: options.session_timeout.unwrap_or(Duration::from_millis(5000)),
            rpc_timeout: options.rpc_timeout.unwrap_or(election_timeout / 2),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(options: RaftOptions) -> Result<RaftOptionsValidated, ConfigError> {
        RaftOptionsValidated::try_from(options)
    }

    #[test]
    fn defaults() {
        let validated = validate(RaftOptions::default()).unwrap();

        assert_eq!(
            validated,
            RaftOptionsValidated {
                election_timeout: Duration::from_millis(500),
                heartbeat_interval: Duration::from_millis(150),
                session_timeout: Duration::from_millis(5000),
                rpc_timeout: Duration::from_millis(250),
                max_entries_per_append: 64,
            }
        );
        assert_eq!(validated.election_max_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn rpc_timeout_follows_election_timeout() {
        let validated = validate(RaftOptions {
            election_timeout: Some(Duration::from_millis(200)),
            heartbeat_interval: Some(Duration::from_millis(50)),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(validated.rpc_timeout, Duration::from_millis(100));
    }

    #[test]
    fn timing_relationships_are_enforced() {
        let ms = |n| Some(Duration::from_millis(n));

        assert!(matches!(
            validate(RaftOptions {
                election_timeout: ms(500),
                heartbeat_interval: ms(500),
                ..Default::default()
            }),
            Err(ConfigError::HeartbeatNotBelowElectionTimeout)
        ));
        assert!(matches!(
            validate(RaftOptions {
                election_timeout: ms(500),
                session_timeout: ms(500),
                ..Default::default()
            }),
            Err(ConfigError::ElectionTimeoutNotBelowSessionTimeout)
        ));
        assert!(matches!(
            validate(RaftOptions {
                rpc_timeout: ms(600),
                ..Default::default()
            }),
            Err(ConfigError::RpcTimeoutNotBelowElectionTimeout)
        ));
        assert!(matches!(
            validate(RaftOptions {
                heartbeat_interval: ms(0),
                ..Default::default()
            }),
            Err(ConfigError::ZeroDuration("heartbeat interval"))
        ));
        assert!(matches!(
            validate(RaftOptions {
                max_entries_per_append: Some(0),
                ..Default::default()
            }),
            Err(ConfigError::ZeroBatchSize)
        ));
    }
}
