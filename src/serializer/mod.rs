//! Encoding of everything that leaves the process: raft messages as a protobuf envelope, and
//! application commands as a type-tagged frame inside log entries.
mod commands;
mod wire;

use crate::grpc::{proto_raft_message, ProtoRaftMessage};
use crate::protocol::{ProtocolError, RaftMessage};
use bytes::Bytes;
use prost::Message;
use std::convert::TryFrom;
use std::sync::Arc;

pub use commands::Command;
pub use commands::CommandRegistry;
pub use commands::DecodedCommand;

#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("protobuf decode failed")]
    Decode(#[from] prost::DecodeError),
    #[error("protobuf encode failed")]
    Encode(#[from] prost::EncodeError),
    #[error("message failed validation")]
    Invalid(#[from] ProtocolError),
    #[error("message envelope carries no message")]
    EmptyMessage,
    #[error("no command registered with type id {0}")]
    UnknownCommandType(u16),
    #[error("type id {type_id} is already registered to '{existing}', can't register '{new}'")]
    DuplicateCommandType {
        type_id: u16,
        existing: &'static str,
        new: &'static str,
    },
    #[error("command '{name}' (type id {type_id}) is not registered")]
    UnregisteredCommand { type_id: u16, name: &'static str },
    #[error("command with type id {type_id} is not a '{expected}'")]
    CommandTypeMismatch { type_id: u16, expected: &'static str },
    #[error("input ended before the command was fully read")]
    Truncated,
}

/// Serializer is shared by the transport (messages) and by applications (commands). Cloning is
/// cheap; clones share one registry.
#[derive(Clone, Debug, Default)]
pub struct Serializer {
    commands: Arc<CommandRegistry>,
}

impl Serializer {
    pub fn new(commands: CommandRegistry) -> Self {
        Serializer {
            commands: Arc::new(commands),
        }
    }

    pub fn encode_message(&self, message: RaftMessage) -> Result<Bytes, SerializerError> {
        let message = match message {
            RaftMessage::VoteRequest(request) => proto_raft_message::Message::VoteRequest((&request).into()),
            RaftMessage::VoteResponse(response) => proto_raft_message::Message::VoteResponse(response.into()),
            RaftMessage::AppendEntriesRequest(request) => {
                proto_raft_message::Message::AppendEntriesRequest(request.into())
            }
            RaftMessage::AppendEntriesResponse(response) => {
                proto_raft_message::Message::AppendEntriesResponse(response.into())
            }
        };
        let envelope = ProtoRaftMessage { message: Some(message) };

        let mut buf = Vec::with_capacity(envelope.encoded_len());
        envelope.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    pub fn decode_message(&self, bytes: Bytes) -> Result<RaftMessage, SerializerError> {
        let envelope = ProtoRaftMessage::decode(bytes)?;

        let message = match envelope.message.ok_or(SerializerError::EmptyMessage)? {
            proto_raft_message::Message::VoteRequest(request) => {
                RaftMessage::VoteRequest(TryFrom::try_from(request)?)
            }
            proto_raft_message::Message::VoteResponse(response) => RaftMessage::VoteResponse(response.into()),
            proto_raft_message::Message::AppendEntriesRequest(request) => {
                RaftMessage::AppendEntriesRequest(TryFrom::try_from(request)?)
            }
            proto_raft_message::Message::AppendEntriesResponse(response) => {
                RaftMessage::AppendEntriesResponse(response.into())
            }
        };

        Ok(message)
    }

    pub fn encode_command<C: Command>(&self, command: &C) -> Result<Bytes, SerializerError> {
        self.commands.encode(command)
    }

    pub fn decode_command(&self, bytes: Bytes) -> Result<DecodedCommand, SerializerError> {
        self.commands.decode(bytes)
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AppendEntriesRequest, RaftLogEntry, VoteRequest, VoteResponse};
    use crate::replica::{MemberId, Term};
    use bytes::{Buf, BufMut, BytesMut};

    #[derive(Debug, PartialEq)]
    struct Put {
        key: u32,
        value: u64,
    }

    impl Command for Put {
        const TYPE_ID: u16 = 7;
        const NAME: &'static str = "put";

        fn encode(&self, buf: &mut BytesMut) {
            buf.put_u32(self.key);
            buf.put_u64(self.value);
        }

        fn decode(buf: &mut Bytes) -> Result<Self, SerializerError> {
            if buf.remaining() < 12 {
                return Err(SerializerError::Truncated);
            }
            Ok(Put {
                key: buf.get_u32(),
                value: buf.get_u64(),
            })
        }
    }

    #[derive(Debug)]
    struct Clear;

    impl Command for Clear {
        const TYPE_ID: u16 = 8;
        const NAME: &'static str = "clear";

        fn encode(&self, _: &mut BytesMut) {}

        fn decode(_: &mut Bytes) -> Result<Self, SerializerError> {
            Ok(Clear)
        }
    }

    struct Imposter;

    impl Command for Imposter {
        const TYPE_ID: u16 = 7;
        const NAME: &'static str = "imposter";

        fn encode(&self, _: &mut BytesMut) {}

        fn decode(_: &mut Bytes) -> Result<Self, SerializerError> {
            Ok(Imposter)
        }
    }

    fn serializer() -> Serializer {
        let mut registry = CommandRegistry::new();
        registry.register::<Put>().unwrap();
        registry.register::<Clear>().unwrap();
        Serializer::new(registry)
    }

    #[test]
    fn command_frame_starts_with_type_id() {
        let serializer = serializer();

        let bytes = serializer.encode_command(&Put { key: 1, value: 2 }).unwrap();
        assert_eq!(&bytes[..2], &[0, 7]);
        assert_eq!(bytes.len(), 2 + 12);

        let decoded = serializer.decode_command(bytes).unwrap();
        assert_eq!(decoded.name(), "put");
        assert!(decoded.is::<Put>());
        assert!(!decoded.is::<Clear>());
        assert_eq!(decoded.downcast::<Put>().unwrap(), Put { key: 1, value: 2 });
    }

    #[test]
    fn command_errors() {
        let serializer = serializer();

        assert!(matches!(
            serializer.decode_command(Bytes::from_static(&[0, 99])),
            Err(SerializerError::UnknownCommandType(99))
        ));
        assert!(matches!(
            serializer.decode_command(Bytes::from_static(&[0])),
            Err(SerializerError::Truncated)
        ));
        assert!(matches!(
            serializer.decode_command(Bytes::from_static(&[0, 7, 1])),
            Err(SerializerError::Truncated)
        ));
        assert!(matches!(
            serializer.encode_command(&Imposter),
            Err(SerializerError::UnregisteredCommand { type_id: 7, .. })
        ));

        let decoded = serializer.decode_command(Bytes::from_static(&[0, 8])).unwrap();
        assert!(matches!(
            decoded.downcast::<Put>(),
            Err(SerializerError::CommandTypeMismatch { type_id: 8, .. })
        ));
    }

    #[test]
    fn duplicate_type_id_is_refused() {
        let mut registry = CommandRegistry::new();
        registry.register::<Put>().unwrap();

        assert!(matches!(
            registry.register::<Imposter>(),
            Err(SerializerError::DuplicateCommandType {
                type_id: 7,
                existing: "put",
                new: "imposter"
            })
        ));
        assert!(registry.is_registered::<Put>());
        assert!(!registry.is_registered::<Imposter>());
    }

    #[test]
    fn messages_survive_the_envelope() {
        let serializer = Serializer::default();

        let messages = vec![
            RaftMessage::VoteRequest(VoteRequest::new(3, MemberId::new("a"), 4, 2).unwrap()),
            RaftMessage::VoteResponse(VoteResponse {
                term: Term::new(3),
                granted: true,
            }),
            RaftMessage::AppendEntriesRequest(
                AppendEntriesRequest::new(
                    3,
                    MemberId::new("a"),
                    0,
                    0,
                    vec![RaftLogEntry::new(Term::new(3), b"cmd".to_vec())],
                    0,
                )
                .unwrap(),
            ),
        ];

        for message in messages {
            let bytes = serializer.encode_message(message.clone()).unwrap();
            assert_eq!(serializer.decode_message(bytes).unwrap(), message);
        }
    }

    #[test]
    fn malformed_messages_are_rejected() {
        let serializer = Serializer::default();

        assert!(matches!(
            serializer.decode_message(Bytes::new()),
            Err(SerializerError::EmptyMessage)
        ));
        assert!(matches!(
            serializer.decode_message(Bytes::from_static(&[0xff, 0xff, 0xff])),
            Err(SerializerError::Decode(_))
        ));

        let envelope = ProtoRaftMessage {
            message: Some(proto_raft_message::Message::VoteRequest(
                crate::grpc::ProtoRequestVoteReq {
                    candidate_id: String::new(),
                    term: 1,
                    last_log_entry_index: 0,
                    last_log_entry_term: 0,
                },
            )),
        };
        let mut buf = Vec::new();
        envelope.encode(&mut buf).unwrap();
        assert!(matches!(
            serializer.decode_message(Bytes::from(buf)),
            Err(SerializerError::Invalid(ProtocolError::EmptyMemberId { .. }))
        ));
    }
}
