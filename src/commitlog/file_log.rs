use crate::commitlog::{Entry, Index, Log};
use bytes::{Buf, BufMut};
use crc32fast::Hasher as Crc32Hasher;
use std::convert::TryFrom;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

/// Record layout on disk:
///
/// ```text
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | ...  |
/// +---+---+---+---+---+---+---+---+---+-...--+
/// |  Length (u32) |   CRC32 (u32) |  Payload |
/// +---------------+---------------+--...-----+
/// ```
///
/// The CRC covers the length bytes and the payload. Records are appended back to back. When the
/// log is opened, a trailing record that is shorter than its declared length, or whose CRC doesn't
/// match, is a torn write from a crash and is cut off. A bad CRC anywhere else is corruption.
const RECORD_HEADER_LEN: usize = 8;

pub struct FileLog<E: Entry> {
    file: File,
    // Byte offset where each record starts. `offsets[i]` is the record for Index(i + 1).
    offsets: Vec<u64>,
    end_offset: u64,
    _pd: PhantomData<E>,
}

fn record_crc(len_bytes: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(len_bytes);
    hasher.update(payload);
    hasher.finalize()
}

fn corrupt(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl<E: Entry> FileLog<E> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path.as_ref())?;

        // Only held while scanning.
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut offsets = Vec::new();
        let mut end_offset = 0usize;
        while contents.len() - end_offset >= RECORD_HEADER_LEN {
            let mut header = &contents[end_offset..end_offset + RECORD_HEADER_LEN];
            let len = header.get_u32() as usize;
            let stored_crc = header.get_u32();

            let payload_start = end_offset + RECORD_HEADER_LEN;
            if contents.len() - payload_start < len {
                break;
            }
            let record_end = payload_start + len;
            let computed_crc = record_crc(&contents[end_offset..end_offset + 4], &contents[payload_start..record_end]);
            if stored_crc != computed_crc {
                if record_end == contents.len() {
                    break;
                }
                return Err(corrupt(format!(
                    "log record {} at byte {} fails its checksum",
                    offsets.len() + 1,
                    end_offset
                )));
            }

            offsets.push(end_offset as u64);
            end_offset = record_end;
        }

        let end_offset = end_offset as u64;
        if end_offset != contents.len() as u64 {
            // Torn tail from an interrupted append. Nothing past it was ever acknowledged.
            file.set_len(end_offset)?;
            file.sync_all()?;
        }

        Ok(FileLog {
            file,
            offsets,
            end_offset,
            _pd: PhantomData::default(),
        })
    }

    fn vec_index(index: Index) -> usize {
        (index.as_u64() - 1) as usize
    }

    fn read_payload(&self, vec_index: usize) -> Result<Vec<u8>, io::Error> {
        let start = self.offsets[vec_index];
        let end = self.offsets.get(vec_index + 1).copied().unwrap_or(self.end_offset);

        let mut record = vec![0u8; (end - start) as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut record)?;

        let payload = record.split_off(RECORD_HEADER_LEN);
        let stored_crc = (&record[4..]).get_u32();
        if stored_crc != record_crc(&record[..4], &payload) {
            return Err(corrupt(format!("log record {} fails its checksum", vec_index + 1)));
        }
        Ok(payload)
    }
}

impl<E: Entry + Send> Log<E> for FileLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let payload: Vec<u8> = entry.into();
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "log entry larger than 4GiB"))?;

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        record.put_u32(len);
        let crc = record_crc(&record, &payload);
        record.put_u32(crc);
        record.put_slice(&payload);

        self.file.seek(SeekFrom::Start(self.end_offset))?;
        self.file.write_all(&record)?;
        self.file.sync_data()?;

        self.offsets.push(self.end_offset);
        self.end_offset += record.len() as u64;

        Ok(Index::new(self.offsets.len() as u64))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        let vec_index = Self::vec_index(index);
        if vec_index >= self.offsets.len() {
            return Ok(None);
        }

        let payload = self.read_payload(vec_index)?;
        E::try_from(payload).map(Some)
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        let vec_index = Self::vec_index(index);
        let new_end_offset = match self.offsets.get(vec_index) {
            Some(offset) => *offset,
            None => return Ok(()),
        };

        self.file.set_len(new_end_offset)?;
        self.file.sync_data()?;

        self.offsets.truncate(vec_index);
        self.end_offset = new_end_offset;
        Ok(())
    }

    fn next_index(&self) -> Index {
        Index::new(self.offsets.len() as u64 + 1)
    }
}
