use crate::commitlog::{Entry, Index, Log};
use std::convert::TryFrom;
use std::io;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared backing buffer, so that a log handed out by `MemoryStorage` survives close and reopen
/// of the server that owns it.
pub(crate) type SharedLogBuffer = Arc<Mutex<Vec<Vec<u8>>>>;

pub struct InMemoryLog<E: Entry> {
    // We don't *need* to convert these to bytes. We could just hold the original entry in memory,
    // but we want to exercise the conversion logic.
    log: SharedLogBuffer,
    _pd: PhantomData<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Self {
        Self::with_buffer(Arc::new(Mutex::new(Vec::new())))
    }

    pub(crate) fn with_buffer(log: SharedLogBuffer) -> Self {
        InMemoryLog {
            log,
            _pd: PhantomData::default(),
        }
    }

    fn vec_index(index: Index) -> usize {
        // Log API states that Index starts from 1.
        (index.as_u64() - 1) as usize
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.log.lock().expect("InMemoryLog mutex guard poison")
    }
}

impl<E: Entry + Send> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let mut entries = self.entries();
        entries.push(entry.into());

        Ok(Index::new(entries.len() as u64))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        let opt_bytes = self.entries().get(Self::vec_index(index)).cloned();

        opt_bytes.map(<E as TryFrom<Vec<u8>>>::try_from).transpose()
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        self.entries().truncate(Self::vec_index(index));
        Ok(())
    }

    fn next_index(&self) -> Index {
        Index::new(self.entries().len() as u64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[derive(Clone, Debug, PartialEq)]
    struct Blob(Vec<u8>);

    impl Entry for Blob {}

    impl From<Blob> for Vec<u8> {
        fn from(blob: Blob) -> Self {
            blob.0
        }
    }

    impl TryFrom<Vec<u8>> for Blob {
        type Error = io::Error;

        fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
            Ok(Blob(bytes))
        }
    }

    #[test]
    fn append_read_truncate() {
        let mut log = InMemoryLog::<Blob>::create();
        assert_eq!(log.last_index(), None);

        assert_eq!(log.append(Blob(vec![1])).unwrap(), Index::new(1));
        assert_eq!(log.append(Blob(vec![2])).unwrap(), Index::new(2));
        assert_eq!(log.append(Blob(vec![3])).unwrap(), Index::new(3));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(Blob(vec![2])));
        assert_eq!(log.read(Index::new(4)).unwrap(), None);

        log.truncate(Index::new(2)).unwrap();
        assert_eq!(log.last_index(), Some(Index::new(1)));
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
        assert_eq!(log.append(Blob(vec![9])).unwrap(), Index::new(2));
    }

    #[test]
    fn shared_buffer_survives_reopen() {
        let buffer: SharedLogBuffer = Arc::new(Mutex::new(Vec::new()));
        {
            let mut log = InMemoryLog::<Blob>::with_buffer(buffer.clone());
            log.append(Blob(vec![7])).unwrap();
        }

        let reopened = InMemoryLog::<Blob>::with_buffer(buffer);
        assert_eq!(reopened.next_index(), Index::new(2));
        assert_eq!(reopened.read(Index::new(1)).unwrap(), Some(Blob(vec![7])));
    }
}
