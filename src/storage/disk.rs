use crate::commitlog::FileLog;
use crate::protocol::RaftLogEntry;
use crate::replica::{LocalStateRecord, MemberId, PersistentLocalState, Term};
use crate::storage::{Storage, StorageHandles};
use bytes::{Buf, BufMut};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "raft.log";
const LOCAL_STATE_FILE: &str = "term_vote";

/// Keeps the log and the term/vote record as files in one directory.
pub struct DiskStorage {
    dir: PathBuf,
}

impl DiskStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        DiskStorage {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl Storage for DiskStorage {
    fn open(&self) -> Result<StorageHandles, io::Error> {
        fs::create_dir_all(&self.dir)?;
        let log = FileLog::<RaftLogEntry>::open(self.dir.join(LOG_FILE))?;
        let local_state = FileLocalState::open(self.dir.join(LOCAL_STATE_FILE))?;

        Ok(StorageHandles::new(log, local_state))
    }

    fn purge(&self) -> Result<(), io::Error> {
        for file in &[LOG_FILE, LOCAL_STATE_FILE] {
            match fs::remove_file(self.dir.join(file)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Term and vote in a single small file.
///
/// Byte representation:
///
/// ```text
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | ... |
/// +---+---+---+---+---+---+---+---+---+---+-...-+
/// |     Term (8 bytes, BE)        |Vtd| Vote .. |
/// +-------------------------------+---+-...-----+
/// ```
///
/// * `Vtd` - 1 if a vote was cast in this term, else 0
/// * `Vote` - utf8 member id voted for, only present if `Vtd` is 1
///
/// Every store writes a temporary file, syncs it, and renames it over the previous one, so a
/// crash leaves either the old or the new record.
pub struct FileLocalState {
    path: PathBuf,
    record: LocalStateRecord,
}

impl FileLocalState {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let path = path.as_ref().to_path_buf();
        let record = match fs::read(&path) {
            Ok(bytes) => decode_record(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => LocalStateRecord::default(),
            Err(e) => return Err(e),
        };

        Ok(FileLocalState { path, record })
    }

    /// Apply `mutate` to a copy of the record, and only keep it once it's durable.
    fn store<T, F>(&mut self, mutate: F) -> Result<T, io::Error>
    where
        F: FnOnce(&mut LocalStateRecord) -> T,
    {
        let mut new_record = self.record.clone();
        let output = mutate(&mut new_record);
        if new_record != self.record {
            self.persist(&new_record)?;
            self.record = new_record;
        }

        Ok(output)
    }

    fn persist(&self, record: &LocalStateRecord) -> Result<(), io::Error> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&encode_record(record))?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        // Make the rename itself durable.
        if let Some(dir) = self.path.parent() {
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

impl PersistentLocalState for FileLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, io::Error> {
        self.store(|record| record.store_term_if_increased(new_term))
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: MemberId) -> Result<bool, io::Error> {
        self.store(|record| record.store_vote_for_term_if_unvoted(expected_term, vote))
    }

    fn increment_term_and_vote_for_self(&mut self, me: &MemberId) -> Result<Term, io::Error> {
        self.store(|record| record.increment_term_and_vote_for(me))
    }

    fn current_term(&self) -> Term {
        self.record.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<MemberId>) {
        (self.record.current_term, self.record.voted_for.clone())
    }
}

fn encode_record(record: &LocalStateRecord) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(9 + 16);
    bytes.put_u64(record.current_term.as_u64());
    match &record.voted_for {
        None => bytes.put_u8(0),
        Some(vote) => {
            bytes.put_u8(1);
            bytes.put_slice(vote.as_str().as_bytes());
        }
    }
    bytes
}

fn decode_record(mut bytes: &[u8]) -> Result<LocalStateRecord, io::Error> {
    if bytes.remaining() < 9 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("term/vote record too short: {} bytes", bytes.len()),
        ));
    }

    let current_term = Term::new(bytes.get_u64());
    let voted_for = match bytes.get_u8() {
        0 => None,
        1 => {
            let id = String::from_utf8(bytes.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Some(MemberId::new(id))
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown vote marker {}", other),
            ))
        }
    };

    Ok(LocalStateRecord {
        current_term,
        voted_for,
    })
}
