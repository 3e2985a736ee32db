use crate::commitlog;
use crate::replica::Term;
use bytes::{Buf, BufMut};
use std::convert::TryFrom;
use std::io;

/// Byte representation:
///
/// ```text
/// |                                         1                           |
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 0 | 1 | 2 | 3 | 4 | 5 | ... |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+-...-+
/// |Vrs|     Term (8 bytes, BE)        |   Data (variable size)      ... |
/// +---+-------------------------------+-----------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Term` - raft leadership term when this entry was created
/// * `Data` - app specific command payload
///
/// The index is not part of the entry. It is the entry's position in the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftLogEntry {
    term: Term,
    data: Vec<u8>,
}

const RAFT_LOG_ENTRY_FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 8;

impl RaftLogEntry {
    pub fn new(term: Term, data: Vec<u8>) -> Self {
        RaftLogEntry { term, data }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl commitlog::Entry for RaftLogEntry {}

impl TryFrom<Vec<u8>> for RaftLogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() < HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("log entry too short: {} bytes", bytes.len()),
            ));
        }

        let mut header = &bytes[..HEADER_LEN];
        let version = header.get_u8();
        if version != RAFT_LOG_ENTRY_FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown log entry format version {}", version),
            ));
        }
        let term = header.get_u64();

        Ok(RaftLogEntry {
            term: Term::new(term),
            data: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

impl From<RaftLogEntry> for Vec<u8> {
    fn from(entry: RaftLogEntry) -> Self {
        let mut bytes = Vec::with_capacity(HEADER_LEN + entry.data.len());
        bytes.put_u8(RAFT_LOG_ENTRY_FORMAT_VERSION);
        bytes.put_u64(entry.term.as_u64());
        bytes.put_slice(&entry.data);
        bytes
    }
}
