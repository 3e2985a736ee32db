//! This mod is responsible for checking everything a `RaftServer` needs before it's created.

use crate::api::options::{RaftOptions, RaftOptionsValidated};
use crate::api::StateMachine;
use crate::replica::{Member, MemberId};
use crate::serializer::Serializer;
use crate::storage::Storage;
use crate::transport::Transport;
use std::collections::HashSet;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct RaftConfig {
    pub member_id: MemberId,
    /// Every member of the cluster, including this one.
    pub members: Vec<Member>,
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn Storage>,
    pub state_machine: Box<dyn StateMachine>,
    pub serializer: Serializer,
    pub logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("heartbeat interval must be less than the election timeout")]
    HeartbeatNotBelowElectionTimeout,
    #[error("election timeout must be less than the session timeout")]
    ElectionTimeoutNotBelowSessionTimeout,
    #[error("RPC timeout must be less than the election timeout")]
    RpcTimeoutNotBelowElectionTimeout,
    #[error("max entries per AppendEntries must be greater than zero")]
    ZeroBatchSize,
    #[error("member set is empty")]
    NoMembers,
    #[error("member id must not be empty")]
    EmptyMemberId,
    #[error("member {0} appears more than once")]
    DuplicateMember(MemberId),
    #[error("local member {0} is not in the member set")]
    LocalMemberNotInCluster(MemberId),
    #[error("member set has no voting member")]
    NoVotingMember,
}

/// What `RaftServer` keeps after validation.
pub(crate) struct ValidatedConfig {
    pub(crate) member_id: MemberId,
    pub(crate) members: Vec<Member>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) state_machine: Box<dyn StateMachine>,
    pub(crate) serializer: Serializer,
    pub(crate) logger: slog::Logger,
    pub(crate) options: RaftOptionsValidated,
}

impl TryFrom<RaftConfig> for ValidatedConfig {
    type Error = ConfigError;

    fn try_from(config: RaftConfig) -> Result<Self, Self::Error> {
        let options = RaftOptionsValidated::try_from(config.options)?;
        validate_members(&config.member_id, &config.members)?;

        Ok(ValidatedConfig {
            member_id: config.member_id,
            members: config.members,
            transport: config.transport,
            storage: config.storage,
            state_machine: config.state_machine,
            serializer: config.serializer,
            logger: config.logger,
            options,
        })
    }
}

fn validate_members(me: &MemberId, members: &[Member]) -> Result<(), ConfigError> {
    if members.is_empty() {
        return Err(ConfigError::NoMembers);
    }
    if me.as_str().is_empty() {
        return Err(ConfigError::EmptyMemberId);
    }

    let mut seen = HashSet::with_capacity(members.len());
    for member in members {
        if member.id.as_str().is_empty() {
            return Err(ConfigError::EmptyMemberId);
        }
        if !seen.insert(&member.id) {
            return Err(ConfigError::DuplicateMember(member.id.clone()));
        }
    }

    if !seen.contains(me) {
        return Err(ConfigError::LocalMemberNotInCluster(me.clone()));
    }
    if !members.iter().any(Member::is_voting) {
        return Err(ConfigError::NoVotingMember);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn voting(id: &str) -> Member {
        Member::voting(MemberId::new(id), addr())
    }

    #[test]
    fn valid_member_sets() {
        let me = MemberId::new("a");

        assert_eq!(validate_members(&me, &[voting("a")]), Ok(()));
        assert_eq!(validate_members(&me, &[voting("a"), voting("b"), voting("c")]), Ok(()));
        // A passive member may run, as long as someone can vote.
        assert_eq!(
            validate_members(&me, &[Member::passive(me.clone(), addr()), voting("b")]),
            Ok(())
        );
    }

    #[test]
    fn invalid_member_sets() {
        let me = MemberId::new("a");

        assert_eq!(validate_members(&me, &[]), Err(ConfigError::NoMembers));
        assert_eq!(
            validate_members(&me, &[voting("a"), voting("b"), voting("a")]),
            Err(ConfigError::DuplicateMember(MemberId::new("a")))
        );
        assert_eq!(
            validate_members(&me, &[voting("b"), voting("c")]),
            Err(ConfigError::LocalMemberNotInCluster(me.clone()))
        );
        assert_eq!(
            validate_members(&me, &[voting("a"), voting("")]),
            Err(ConfigError::EmptyMemberId)
        );
        assert_eq!(
            validate_members(&MemberId::new(""), &[voting("a")]),
            Err(ConfigError::EmptyMemberId)
        );
        assert_eq!(
            validate_members(
                &me,
                &[Member::passive(me.clone(), addr()), Member::passive(MemberId::new("b"), addr())]
            ),
            Err(ConfigError::NoVotingMember)
        );
    }
}
