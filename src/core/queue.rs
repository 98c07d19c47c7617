// Queue handles: open/create protocol, the writer publish path, and the
// reader cursor with gap handling.
//
// One process holds the writer role per queue; this is a usage contract, not
// mechanically enforced. Readers are fully independent of each other: the
// cursor lives in the handle and is never written back to shared state.
use std::path::{Path, PathBuf};

use crate::core::entry;
use crate::core::error::{Error, ErrorKind};
use crate::core::files::{self, QueueFiles};
use crate::core::lock::{Heartbeat, LockMode, PollPolicy};
use crate::core::ring::{RingRegion, SpaceCheck};
use crate::core::slot::Slot;
use crate::core::status::QueueStatus;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub id: i64,
    pub time: i64,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    Message(Message),
    /// Nothing published past the cursor; the caller decides whether to poll.
    NoNewData,
    /// The cursor was evicted out from under the reader. The cursor has been
    /// repositioned at the oldest live entry; the next read resumes there.
    Gap,
}

pub struct Queue {
    base: PathBuf,
    files: QueueFiles,
    nslots: i32,
    buf_size: i64,
    last_id_read: i64,
    last_slot_read: i32,
    heartbeat: Option<Heartbeat>,
    lock_policy: PollPolicy,
    blocking_read_timeout_ms: i64,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("base", &self.base)
            .field("files", &self.files)
            .field("nslots", &self.nslots)
            .field("buf_size", &self.buf_size)
            .field("last_id_read", &self.last_id_read)
            .field("last_slot_read", &self.last_slot_read)
            .field("heartbeat", &self.heartbeat.as_ref().map(|_| "<fn>"))
            .field("lock_policy", &self.lock_policy)
            .field("blocking_read_timeout_ms", &self.blocking_read_timeout_ms)
            .finish()
    }
}

impl Queue {
    /// Create a fresh queue, overwriting any existing one at `path`.
    pub fn create(path: impl AsRef<Path>, nslots: i32, buf_size: i64) -> Result<Self, Error> {
        let base = path.as_ref().to_path_buf();
        check_geometry(nslots, buf_size)?;
        let mut files = QueueFiles::create(&base)?;
        let mut heartbeat = None;
        let guard = files.lock(LockMode::Exclusive, &mut heartbeat, &PollPolicy::lock_default())?;
        files.init_contents(nslots, buf_size)?;
        drop(guard);
        Ok(Self::assemble(base, files, nslots, buf_size, -1, -1))
    }

    /// Open read-write, creating the queue if no valid one exists. An
    /// existing queue that fails validation is fatal, never auto-repaired.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        nslots: i32,
        buf_size: i64,
    ) -> Result<Self, Error> {
        if QueueFiles::exists(path.as_ref()) {
            Self::open_existing(path)
        } else {
            Self::create(path, nslots, buf_size)
        }
    }

    /// Open read-write; never creates. Seeds the read cursor just before the
    /// oldest live entry so the first read returns it.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(path.as_ref(), true)
    }

    /// Open read-only: shared locks only, the header is never mutated.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(path.as_ref(), false)
    }

    /// Retry `open_read_only` until a valid queue appears. `poll_ms <= 0`
    /// selects the 1000 ms default. No deadline; callers wrap one if needed.
    pub fn open_blocking(path: impl AsRef<Path>, poll_ms: i64) -> Result<Self, Error> {
        Self::open_blocking_with(path, poll_ms, None, false)
    }

    /// As `open_blocking`, but read-write for readers that also publish.
    pub fn open_blocking_read_write(path: impl AsRef<Path>, poll_ms: i64) -> Result<Self, Error> {
        Self::open_blocking_with(path, poll_ms, None, true)
    }

    /// Blocking open with a liveness callback fired each poll round; the
    /// callback is kept on the returned handle.
    pub fn open_blocking_with(
        path: impl AsRef<Path>,
        poll_ms: i64,
        mut heartbeat: Option<Heartbeat>,
        writable: bool,
    ) -> Result<Self, Error> {
        let base = path.as_ref();
        let policy = PollPolicy::open_poll(poll_ms);
        loop {
            match Self::open_with(base, writable) {
                Ok(mut queue) => {
                    queue.heartbeat = heartbeat;
                    return Ok(queue);
                }
                // Corrupt covers a creator caught between truncate and the
                // first status write; keep waiting for a valid queue.
                Err(err) if matches!(err.kind(), ErrorKind::Absent | ErrorKind::Corrupt) => {
                    policy.pause(&mut heartbeat, "waiting for queue to be created");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn open_with(base: &Path, writable: bool) -> Result<Self, Error> {
        let mut files = QueueFiles::open(base, writable)?;
        let status = files.read_status()?;
        files.validate(&status)?;
        let (last_slot_read, last_id_read) = seed_cursor(&status, &mut files)?;
        Ok(Self::assemble(
            base.to_path_buf(),
            files,
            status.nslots,
            status.buf_size,
            last_slot_read,
            last_id_read,
        ))
    }

    fn assemble(
        base: PathBuf,
        files: QueueFiles,
        nslots: i32,
        buf_size: i64,
        last_slot_read: i32,
        last_id_read: i64,
    ) -> Self {
        Self {
            base,
            files,
            nslots,
            buf_size,
            last_id_read,
            last_slot_read,
            heartbeat: None,
            lock_policy: PollPolicy::lock_default(),
            blocking_read_timeout_ms: -1,
        }
    }

    pub fn path(&self) -> &Path {
        &self.base
    }

    pub fn nslots(&self) -> i32 {
        self.nslots
    }

    pub fn buf_size(&self) -> i64 {
        self.buf_size
    }

    /// Largest payload a single publish can accept.
    pub fn max_payload(&self) -> usize {
        let capacity = (self.buf_size - crate::core::format::ARENA_COOKIE_LEN as i64) as usize;
        capacity - (entry::stored_len(0))
    }

    pub fn set_heartbeat(&mut self, heartbeat: Heartbeat) {
        self.heartbeat = Some(heartbeat);
    }

    /// Deadline for `read_blocking`; non-positive means none.
    pub fn set_blocking_read_timeout_ms(&mut self, millis: i64) {
        self.blocking_read_timeout_ms = millis;
    }

    pub fn close(self) {}

    /// Reinitialize the queue in place, preserving geometry.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.require_writable("clear")?;
        let guard = self.files.lock(
            LockMode::Exclusive,
            &mut self.heartbeat,
            &self.lock_policy,
        )?;
        self.files.init_contents(self.nslots, self.buf_size)?;
        drop(guard);
        self.last_id_read = -1;
        self.last_slot_read = -1;
        Ok(())
    }

    /// Publish one message, returning its id. Holds the exclusive lock across
    /// the whole metadata read/mutate/write triple; the final status write is
    /// the point at which the message becomes visible to readers.
    pub fn publish(&mut self, payload: &[u8]) -> Result<i64, Error> {
        self.require_writable("publish")?;
        if payload.len() > i32::MAX as usize {
            return Err(Error::new(ErrorKind::TooLarge)
                .with_path(&self.base)
                .with_message("payload length exceeds i32 range"));
        }
        let stored = entry::stored_len(payload.len()) as i64;

        let guard = self.files.lock(
            LockMode::Exclusive,
            &mut self.heartbeat,
            &self.lock_policy,
        )?;
        let mut status = self.files.read_status()?;
        self.check_geometry_drift(&status)?;
        let mut ring = status.ring();
        if stored > ring.capacity {
            return Err(Error::new(ErrorKind::TooLarge)
                .with_path(&self.base)
                .with_message(format!(
                    "payload of {} bytes exceeds queue capacity (max payload {} bytes)",
                    payload.len(),
                    self.max_payload()
                )));
        }

        let write_slot = status.next_slot(status.youngest_slot);
        let write_id = status.youngest_id + 1;

        // Slot table recycling: the ring of slots is cycling faster than the
        // byte arena, so the oldest entry goes first.
        if write_slot == status.oldest_slot {
            self.evict_oldest(&mut status, &mut ring)?;
        }
        loop {
            match ring.check(stored) {
                SpaceCheck::Fits => break,
                SpaceCheck::Flipped => {}
                SpaceCheck::NeedsReclaim => self.evict_oldest(&mut status, &mut ring)?,
            }
        }

        let offset = ring.write_offset();
        let bytes = entry::encode(write_slot, write_id, payload);
        self.files.write_entry(offset, &bytes)?;

        let slot = Slot {
            active: true,
            id: write_id,
            time: files::now_unix(),
            msg_len: payload.len() as i32,
            stored_len: bytes.len() as i32,
            offset,
            checksum: 0,
        };
        self.files.write_slot(write_slot, &slot)?;

        ring.advance(stored);
        status.apply_ring(&ring);
        status.youngest_slot = write_slot;
        if status.oldest_slot == -1 {
            status.oldest_slot = write_slot;
        }
        status.youngest_id = write_id;
        self.files.write_status(&mut status)?;
        drop(guard);
        Ok(write_id)
    }

    /// Advance the cursor and return the next message if one is available.
    /// Non-blocking: `NoNewData` when the reader is caught up, `Gap` when the
    /// writer lapped the reader (the cursor resumes at the oldest live
    /// entry).
    pub fn read_next(&mut self) -> Result<ReadOutcome, Error> {
        let status = self.snapshot_status()?;
        if status.is_empty() {
            self.last_id_read = -1;
            self.last_slot_read = -1;
            return Ok(ReadOutcome::NoNewData);
        }
        if self.last_id_read == status.youngest_id {
            return Ok(ReadOutcome::NoNewData);
        }

        let next_slot = status.next_slot(self.last_slot_read);
        match self.try_read_message(&status, next_slot)? {
            Some(message) => {
                self.last_slot_read = next_slot;
                self.last_id_read = message.id;
                Ok(ReadOutcome::Message(message))
            }
            None => {
                tracing::warn!(
                    path = %self.base.display(),
                    last_id_read = self.last_id_read,
                    oldest_slot = status.oldest_slot,
                    youngest_id = status.youngest_id,
                    "reader fell behind; unread entries were recycled, resuming at oldest"
                );
                let (slot, id) = seed_cursor(&status, &mut self.files)?;
                self.last_slot_read = slot;
                self.last_id_read = id;
                Ok(ReadOutcome::Gap)
            }
        }
    }

    /// Poll `read_next` until a message arrives, sleeping `poll_ms` between
    /// rounds (non-positive selects the 10 ms default) and firing the
    /// heartbeat while waiting. Gaps are logged and skipped.
    pub fn read_blocking(&mut self, poll_ms: i64) -> Result<Message, Error> {
        let policy = PollPolicy::read_poll(poll_ms);
        let mut waited_ms: i64 = 0;
        loop {
            match self.read_next()? {
                ReadOutcome::Message(message) => return Ok(message),
                ReadOutcome::Gap => {}
                ReadOutcome::NoNewData => {
                    if self.blocking_read_timeout_ms > 0
                        && waited_ms >= self.blocking_read_timeout_ms
                    {
                        return Err(Error::new(ErrorKind::Busy)
                            .with_path(&self.base)
                            .with_message("blocking read timed out"));
                    }
                    policy.pause(&mut self.heartbeat, "waiting for next message");
                    waited_ms += policy.interval.as_millis() as i64;
                }
            }
        }
    }

    /// Jump the cursor past everything currently in the queue.
    pub fn seek_to_end(&mut self) -> Result<(), Error> {
        let status = self.snapshot_status()?;
        self.last_slot_read = status.youngest_slot;
        self.last_id_read = status.youngest_id;
        Ok(())
    }

    /// Rewind the cursor so the whole live backlog is read again.
    pub fn seek_to_start(&mut self) -> Result<(), Error> {
        let status = self.snapshot_status()?;
        let (slot, id) = seed_cursor(&status, &mut self.files)?;
        self.last_slot_read = slot;
        self.last_id_read = id;
        Ok(())
    }

    /// Position so the next read returns the newest message (again).
    pub fn seek_last(&mut self) -> Result<(), Error> {
        let status = self.snapshot_status()?;
        if status.is_empty() {
            self.last_slot_read = -1;
            self.last_id_read = -1;
        } else {
            self.last_slot_read = status.prev_slot(status.youngest_slot);
            self.last_id_read = status.youngest_id - 1;
        }
        Ok(())
    }

    /// Status snapshot, taken under the shared lock.
    pub fn status(&mut self) -> Result<QueueStatus, Error> {
        self.snapshot_status()
    }

    /// Slot-table snapshot, taken under the shared lock.
    pub fn slots(&mut self) -> Result<Vec<Slot>, Error> {
        let guard = self
            .files
            .lock(LockMode::Shared, &mut self.heartbeat, &self.lock_policy)?;
        let mut slots = Vec::with_capacity(self.nslots as usize);
        for index in 0..self.nslots {
            slots.push(self.files.read_slot(index)?);
        }
        drop(guard);
        Ok(slots)
    }

    fn snapshot_status(&mut self) -> Result<QueueStatus, Error> {
        let guard = self
            .files
            .lock(LockMode::Shared, &mut self.heartbeat, &self.lock_policy)?;
        let status = self.files.read_status()?;
        drop(guard);
        self.check_geometry_drift(&status)?;
        Ok(status)
    }

    fn check_geometry_drift(&self, status: &QueueStatus) -> Result<(), Error> {
        if status.nslots != self.nslots || status.buf_size != self.buf_size {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_path(&self.base)
                .with_message(format!(
                    "queue geometry changed under this handle \
                     ({} slots/{} bytes, now {} slots/{} bytes); \
                     was the queue re-created?",
                    self.nslots, self.buf_size, status.nslots, status.buf_size
                )));
        }
        Ok(())
    }

    /// Read the message for `slot_index` if it is the one the cursor expects.
    /// `None` means the slot was recycled or never matched: the gap path.
    fn try_read_message(
        &mut self,
        status: &QueueStatus,
        slot_index: i32,
    ) -> Result<Option<Message>, Error> {
        let slot = self.files.read_slot(slot_index)?;
        if !slot.active {
            return Ok(None);
        }
        if slot.id != self.last_id_read + 1 {
            return Ok(None);
        }
        // Stale slots can carry ranges the current arena no longer honors.
        if slot.offset < 0
            || slot.offset + i64::from(slot.stored_len) > status.capacity()
            || entry::stored_len(slot.msg_len as usize) != slot.stored_len as usize
        {
            return Ok(None);
        }
        let bytes = self.files.read_entry(slot.offset, slot.stored_len)?;
        match entry::check(&bytes, slot_index, slot.id, slot.msg_len) {
            Ok(payload) => Ok(Some(Message {
                id: slot.id,
                time: slot.time,
                data: payload.to_vec(),
            })),
            Err(err) => {
                // The entry was overwritten between the slot read and the
                // payload read; recycled, not corrupt.
                tracing::debug!(
                    slot = slot_index,
                    error = %err,
                    "entry validation failed under a racing writer"
                );
                Ok(None)
            }
        }
    }

    /// Evict the oldest live entry, freeing its slot and its arena bytes.
    /// Evicting unread data is the documented at-most-N-unread loss, not an
    /// error.
    fn evict_oldest(
        &mut self,
        status: &mut QueueStatus,
        ring: &mut RingRegion,
    ) -> Result<(), Error> {
        let oldest = status.oldest_slot;
        if oldest < 0 {
            return Err(Error::new(ErrorKind::Internal)
                .with_path(&self.base)
                .with_message("eviction requested on an empty queue"));
        }
        let slot = self.files.read_slot(oldest)?;
        ring.reclaim(slot.offset, i64::from(slot.stored_len))
            .map_err(|err| err.with_path(&self.base))?;
        status.oldest_slot = status.next_slot(oldest);
        self.files.write_slot(oldest, &Slot::empty())?;
        if slot.active {
            tracing::debug!(
                slot = oldest,
                id = slot.id,
                stored_len = slot.stored_len,
                "evicted oldest entry to reclaim ring space"
            );
        }
        Ok(())
    }

    fn require_writable(&self, operation: &str) -> Result<(), Error> {
        if !self.files.writable() {
            return Err(Error::new(ErrorKind::Usage)
                .with_path(&self.base)
                .with_message(format!("{operation} requires a writable queue handle")));
        }
        Ok(())
    }
}

/// Position a cursor just before the oldest live entry so the next read
/// returns it. The id expectation comes from the oldest slot itself: a later
/// mismatch means that entry was recycled, which is how gaps are detected.
fn seed_cursor(status: &QueueStatus, files: &mut QueueFiles) -> Result<(i32, i64), Error> {
    if status.oldest_slot < 0 {
        return Ok((-1, -1));
    }
    let oldest = files.read_slot(status.oldest_slot)?;
    let expected_prev = if oldest.active { oldest.id - 1 } else { -1 };
    Ok((status.prev_slot(status.oldest_slot), expected_prev))
}

fn check_geometry(nslots: i32, buf_size: i64) -> Result<(), Error> {
    if nslots < 1 {
        return Err(Error::new(ErrorKind::Usage).with_message("nslots must be at least 1"));
    }
    let min = crate::core::format::ARENA_COOKIE_LEN as i64 + entry::stored_len(0) as i64;
    if buf_size < min {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("buf_size must be at least {min} bytes")));
    }
    Ok(())
}
