use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// Identity of a cluster member.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemberId(String);

impl MemberId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemberKind {
    /// Votes in elections and counts towards commit majorities.
    Voting,
    /// Receives and applies the replicated log, but never votes or stands for election.
    Passive,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Member {
    pub id: MemberId,
    /// Where this member's transport listens. Transports that don't route by address ignore it.
    pub address: SocketAddr,
    pub kind: MemberKind,
}

impl Member {
    pub fn voting(id: MemberId, address: SocketAddr) -> Self {
        Member {
            id,
            address,
            kind: MemberKind::Voting,
        }
    }

    pub fn passive(id: MemberId, address: SocketAddr) -> Self {
        Member {
            id,
            address,
            kind: MemberKind::Passive,
        }
    }

    pub fn is_voting(&self) -> bool {
        self.kind == MemberKind::Voting
    }
}

/// ClusterTracker is the local view of the member set. Membership is fixed for the lifetime of
/// a server.
#[derive(Clone)]
pub(crate) struct ClusterTracker {
    my_member_id: MemberId,
    members: HashMap<MemberId, Member>,
}

impl ClusterTracker {
    /// Caller guarantees `members` has unique ids and contains `my_member_id`.
    pub(crate) fn new(my_member_id: MemberId, members: Vec<Member>) -> Self {
        let members = members.into_iter().map(|m| (m.id.clone(), m)).collect();

        ClusterTracker { my_member_id, members }
    }

    pub(crate) fn my_member_id(&self) -> &MemberId {
        &self.my_member_id
    }

    pub(crate) fn am_i_voting(&self) -> bool {
        self.is_voting_member(&self.my_member_id)
    }

    pub(crate) fn member(&self, member_id: &MemberId) -> Option<&Member> {
        self.members.get(member_id)
    }

    pub(crate) fn contains_member(&self, member_id: &MemberId) -> bool {
        self.members.contains_key(member_id)
    }

    pub(crate) fn is_voting_member(&self, member_id: &MemberId) -> bool {
        self.members.get(member_id).map(Member::is_voting).unwrap_or(false)
    }

    pub(crate) fn num_voting_members(&self) -> usize {
        self.members.values().filter(|m| m.is_voting()).count()
    }

    /// Everyone but me.
    pub(crate) fn peers(&self) -> impl Iterator<Item = &Member> {
        let me = &self.my_member_id;
        self.members.values().filter(move |m| &m.id != me)
    }

    pub(crate) fn voting_peers(&self) -> impl Iterator<Item = &Member> {
        self.peers().filter(|m| m.is_voting())
    }

    pub(crate) fn all_members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }
}
