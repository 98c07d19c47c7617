// Circular arena allocation: append mode until the tail runs out, then
// insert/reclaim mode where eviction of the oldest entries frees space.
//
// Pure state machine over ring offsets; callers own all file I/O. Regions:
//
//   append mode:  live bytes in [end_insert, begin_append), next write at
//                 begin_append, free tail [begin_append, capacity).
//   insert mode:  a newer generation grows at the buffer start; next write at
//                 begin_insert, free bytes [begin_insert, end_insert), older
//                 generation still live in [end_insert, begin_append).
//
// Reclaiming the oldest entry advances end_insert; when it reaches
// begin_append the old generation is gone and the regions merge back into
// pure append mode.
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RingRegion {
    pub begin_insert: i64,
    pub end_insert: i64,
    pub begin_append: i64,
    pub append_mode: bool,
    pub capacity: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpaceCheck {
    /// The next write fits at `write_offset()`.
    Fits,
    /// The append tail ran out; the region flipped to insert mode. Re-check.
    Flipped,
    /// The insert region is too small; evict the oldest entry and re-check.
    NeedsReclaim,
}

impl RingRegion {
    pub fn new(capacity: i64) -> Self {
        Self {
            begin_insert: 0,
            end_insert: 0,
            begin_append: 0,
            append_mode: true,
            capacity,
        }
    }

    pub fn check(&mut self, len: i64) -> SpaceCheck {
        if self.append_mode {
            if self.capacity - self.begin_append >= len {
                SpaceCheck::Fits
            } else {
                self.append_mode = false;
                SpaceCheck::Flipped
            }
        } else if self.end_insert - self.begin_insert >= len {
            SpaceCheck::Fits
        } else {
            SpaceCheck::NeedsReclaim
        }
    }

    pub fn write_offset(&self) -> i64 {
        if self.append_mode {
            self.begin_append
        } else {
            self.begin_insert
        }
    }

    /// Consume `len` bytes at `write_offset()` after a successful entry write.
    pub fn advance(&mut self, len: i64) {
        if self.append_mode {
            self.begin_append += len;
        } else {
            self.begin_insert += len;
        }
    }

    /// Free the bytes of the oldest entry. The entry must sit exactly at
    /// `end_insert`; anything else means the slot table and the ring
    /// disagree, which is unrecoverable here.
    pub fn reclaim(&mut self, offset: i64, len: i64) -> Result<(), Error> {
        if offset != self.end_insert {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "oldest entry offset disagrees with insert region end {}",
                    self.end_insert
                ))
                .with_offset(offset));
        }
        self.end_insert += len;
        if self.end_insert >= self.begin_append {
            self.begin_append = self.begin_insert;
            self.begin_insert = 0;
            self.end_insert = 0;
            self.append_mode = true;
        }
        Ok(())
    }
}
