//! Conversions between protocol messages and their protobuf representation. Decoding runs the
//! same validation as the protocol constructors, so a malformed message never reaches a replica.
use crate::grpc::{
    ProtoAppendEntriesReply, ProtoAppendEntriesReq, ProtoLogEntry, ProtoRequestVoteReply, ProtoRequestVoteReq,
};
use crate::protocol::{
    AppendEntriesRequest, AppendEntriesResponse, ProtocolError, RaftLogEntry, VoteRequest, VoteResponse,
};
use crate::replica::{MemberId, Term};
use std::convert::TryFrom;

impl From<&VoteRequest> for ProtoRequestVoteReq {
    fn from(request: &VoteRequest) -> Self {
        ProtoRequestVoteReq {
            candidate_id: request.candidate().as_str().to_string(),
            term: request.term().as_u64(),
            last_log_entry_index: request.last_log_index(),
            last_log_entry_term: request.last_log_term(),
        }
    }
}

impl TryFrom<ProtoRequestVoteReq> for VoteRequest {
    type Error = ProtocolError;

    fn try_from(rpc_request: ProtoRequestVoteReq) -> Result<Self, Self::Error> {
        VoteRequest::new(
            rpc_request.term,
            MemberId::new(rpc_request.candidate_id),
            rpc_request.last_log_entry_index,
            rpc_request.last_log_entry_term,
        )
    }
}

impl From<VoteResponse> for ProtoRequestVoteReply {
    fn from(response: VoteResponse) -> Self {
        ProtoRequestVoteReply {
            term: response.term.as_u64(),
            vote_granted: response.granted,
        }
    }
}

impl From<ProtoRequestVoteReply> for VoteResponse {
    fn from(rpc_reply: ProtoRequestVoteReply) -> Self {
        VoteResponse {
            term: Term::new(rpc_reply.term),
            granted: rpc_reply.vote_granted,
        }
    }
}

impl From<AppendEntriesRequest> for ProtoAppendEntriesReq {
    fn from(request: AppendEntriesRequest) -> Self {
        let leader_id = request.leader().as_str().to_string();
        let term = request.term().as_u64();
        let commit_index = request.leader_commit();
        let previous_log_entry_index = request.previous_log_index();
        let previous_log_entry_term = request.previous_log_term();

        let new_entries = request
            .into_entries()
            .into_iter()
            .map(|entry| ProtoLogEntry {
                term: entry.term().as_u64(),
                data: entry.into_data(),
            })
            .collect();

        ProtoAppendEntriesReq {
            leader_id,
            term,
            commit_index,
            previous_log_entry_index,
            previous_log_entry_term,
            new_entries,
        }
    }
}

impl TryFrom<ProtoAppendEntriesReq> for AppendEntriesRequest {
    type Error = ProtocolError;

    fn try_from(rpc_request: ProtoAppendEntriesReq) -> Result<Self, Self::Error> {
        let new_entries = rpc_request
            .new_entries
            .into_iter()
            .map(|proto_entry| RaftLogEntry::new(Term::new(proto_entry.term), proto_entry.data))
            .collect();

        AppendEntriesRequest::new(
            rpc_request.term,
            MemberId::new(rpc_request.leader_id),
            rpc_request.previous_log_entry_index,
            rpc_request.previous_log_entry_term,
            new_entries,
            rpc_request.commit_index,
        )
    }
}

impl From<AppendEntriesResponse> for ProtoAppendEntriesReply {
    fn from(response: AppendEntriesResponse) -> Self {
        ProtoAppendEntriesReply {
            term: response.term.as_u64(),
            success: response.success,
            index: response.index,
        }
    }
}

impl From<ProtoAppendEntriesReply> for AppendEntriesResponse {
    fn from(rpc_reply: ProtoAppendEntriesReply) -> Self {
        AppendEntriesResponse {
            term: Term::new(rpc_reply.term),
            success: rpc_reply.success,
            index: rpc_reply.index,
        }
    }
}
