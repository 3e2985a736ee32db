use std::convert::TryFrom;
use std::num::NonZeroU64;
use std::{fmt, io};

/// Position of an entry in the log. Positions are dense and start at 1, so there is no `Index`
/// for "before the first entry"; use `Option<Index>` for that.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(NonZeroU64);

impl Index {
    /// Panics on 0.
    pub fn new(index: u64) -> Self {
        match Self::from_u64(index) {
            Some(index) => index,
            None => panic!("log index must be positive"),
        }
    }

    /// Wire formats use 0 to mean "no entry".
    pub fn from_u64(index: u64) -> Option<Self> {
        NonZeroU64::new(index).map(Index)
    }

    pub fn start_index() -> Self {
        Index::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.as_u64() + delta)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        self.as_u64().checked_sub(delta).and_then(Index::from_u64)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only storage for the replicated log, addressed by `Index`.
///
/// `append` must not return before the entry is durable. Only the tail can be removed, with
/// `truncate`.
pub trait Log<E: Entry>: Send {
    /// Writes `entry` at `next_index()` and returns that index.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Removes the entry at `index` and all after it. A no-op past the end.
    fn truncate(&mut self, index: Index) -> Result<(), io::Error>;

    fn next_index(&self) -> Index;

    fn last_index(&self) -> Option<Index> {
        self.next_index().checked_minus(1)
    }
}

/// Something a `Log` can store. Decoding fails with `InvalidData` on corrupt bytes.
pub trait Entry: Clone + Into<Vec<u8>> + TryFrom<Vec<u8>, Error = io::Error> {}
