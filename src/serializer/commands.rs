use crate::serializer::SerializerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// An application command that can be submitted to the replicated log.
///
/// Each command type owns a stable `TYPE_ID`. The id is written in front of the encoded payload,
/// so it must never be reused for a different type once entries carrying it have been written.
pub trait Command: Send + Sized + 'static {
    const TYPE_ID: u16;
    const NAME: &'static str;

    fn encode(&self, buf: &mut BytesMut);

    fn decode(buf: &mut Bytes) -> Result<Self, SerializerError>;
}

type ErasedDecode = fn(&mut Bytes) -> Result<Box<dyn Any + Send>, SerializerError>;

struct CommandCodec {
    name: &'static str,
    decode: ErasedDecode,
}

/// CommandRegistry maps command type ids to decoders. It is populated once at startup, before the
/// server is constructed.
#[derive(Default)]
pub struct CommandRegistry {
    codecs: HashMap<u16, CommandCodec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: Command>(&mut self) -> Result<(), SerializerError> {
        if let Some(existing) = self.codecs.get(&C::TYPE_ID) {
            return Err(SerializerError::DuplicateCommandType {
                type_id: C::TYPE_ID,
                existing: existing.name,
                new: C::NAME,
            });
        }

        self.codecs.insert(
            C::TYPE_ID,
            CommandCodec {
                name: C::NAME,
                decode: decode_erased::<C>,
            },
        );
        Ok(())
    }

    pub fn is_registered<C: Command>(&self) -> bool {
        matches!(self.codecs.get(&C::TYPE_ID), Some(codec) if codec.name == C::NAME)
    }

    pub(super) fn encode<C: Command>(&self, command: &C) -> Result<Bytes, SerializerError> {
        if !self.is_registered::<C>() {
            return Err(SerializerError::UnregisteredCommand {
                type_id: C::TYPE_ID,
                name: C::NAME,
            });
        }

        let mut buf = BytesMut::new();
        buf.put_u16(C::TYPE_ID);
        command.encode(&mut buf);
        Ok(buf.freeze())
    }

    pub(super) fn decode(&self, mut bytes: Bytes) -> Result<DecodedCommand, SerializerError> {
        if bytes.remaining() < 2 {
            return Err(SerializerError::Truncated);
        }
        let type_id = bytes.get_u16();
        let codec = self
            .codecs
            .get(&type_id)
            .ok_or(SerializerError::UnknownCommandType(type_id))?;

        let value = (codec.decode)(&mut bytes)?;
        Ok(DecodedCommand {
            type_id,
            name: codec.name,
            value,
        })
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.codecs.iter().map(|(id, codec)| (*id, codec.name)).collect();
        names.sort_unstable();
        f.debug_struct("CommandRegistry").field("commands", &names).finish()
    }
}

fn decode_erased<C: Command>(buf: &mut Bytes) -> Result<Box<dyn Any + Send>, SerializerError> {
    C::decode(buf).map(|command| Box::new(command) as Box<dyn Any + Send>)
}

/// A command decoded through the registry, not yet downcast to its concrete type.
pub struct DecodedCommand {
    type_id: u16,
    name: &'static str,
    value: Box<dyn Any + Send>,
}

impl DecodedCommand {
    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<C: Command>(&self) -> bool {
        self.type_id == C::TYPE_ID && self.value.is::<C>()
    }

    pub fn downcast<C: Command>(self) -> Result<C, SerializerError> {
        let type_id = self.type_id;
        self.value
            .downcast::<C>()
            .map(|command| *command)
            .map_err(|_| SerializerError::CommandTypeMismatch {
                type_id,
                expected: C::NAME,
            })
    }
}

impl fmt::Debug for DecodedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecodedCommand({}={})", self.type_id, self.name)
    }
}
