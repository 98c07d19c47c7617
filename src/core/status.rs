// Queue status block: geometry, cursors, and visibility point for readers.
//
// The status write is the single point at which a published message becomes
// visible, so the writer always writes it last.
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{
    self, ARENA_COOKIE_LEN, FORMAT_VERSION, SLOT_LEN, STAT_LEN, STAT_MAGIC,
    SUPPORTED_FORMAT_VERSIONS,
};
use crate::core::ring::RingRegion;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct QueueStatus {
    pub nslots: i32,
    pub buf_size: i64,
    pub youngest_id: i64,
    pub youngest_slot: i32,
    pub oldest_slot: i32,
    pub begin_insert: i64,
    pub end_insert: i64,
    pub begin_append: i64,
    pub append_mode: bool,
    pub time_written: i64,
    pub checksum: i64,
}

impl QueueStatus {
    /// Fresh empty-queue state for the given geometry.
    pub fn new(nslots: i32, buf_size: i64) -> Self {
        Self {
            nslots,
            buf_size,
            youngest_id: -1,
            youngest_slot: -1,
            oldest_slot: -1,
            begin_insert: 0,
            end_insert: 0,
            begin_append: 0,
            append_mode: true,
            time_written: 0,
            checksum: 0,
        }
    }

    /// Usable circular capacity of the `.buf` file, past the arena cookie.
    pub fn capacity(&self) -> i64 {
        self.buf_size - ARENA_COOKIE_LEN as i64
    }

    pub fn is_empty(&self) -> bool {
        self.youngest_id == -1
    }

    pub fn stat_file_len(nslots: i32) -> u64 {
        STAT_LEN as u64 + nslots as u64 * SLOT_LEN as u64
    }

    pub fn next_slot(&self, slot: i32) -> i32 {
        if slot >= self.nslots - 1 { 0 } else { slot + 1 }
    }

    pub fn prev_slot(&self, slot: i32) -> i32 {
        if slot == 0 { self.nslots - 1 } else { slot - 1 }
    }

    pub fn ring(&self) -> RingRegion {
        RingRegion {
            begin_insert: self.begin_insert,
            end_insert: self.end_insert,
            begin_append: self.begin_append,
            append_mode: self.append_mode,
            capacity: self.capacity(),
        }
    }

    pub fn apply_ring(&mut self, ring: &RingRegion) {
        self.begin_insert = ring.begin_insert;
        self.end_insert = ring.end_insert;
        self.begin_append = ring.begin_append;
        self.append_mode = ring.append_mode;
    }

    /// Stamp `time_written` and the checksum ahead of a write.
    pub fn seal(&mut self, now: i64) {
        self.time_written = now;
        self.checksum = self.compute_checksum();
    }

    pub fn compute_checksum(&self) -> i64 {
        let mut sum: i64 = 0;
        sum = sum.wrapping_add(i64::from(self.nslots));
        sum = sum.wrapping_add(!self.youngest_id);
        sum = sum.wrapping_add(i64::from(self.youngest_slot));
        sum = sum.wrapping_add(!i64::from(self.oldest_slot));
        sum = sum.wrapping_add(self.buf_size);
        sum = sum.wrapping_add(!self.begin_insert);
        sum = sum.wrapping_add(self.end_insert);
        sum = sum.wrapping_add(!self.begin_append);
        sum = sum.wrapping_add(i64::from(self.append_mode));
        sum = sum.wrapping_add(self.time_written);
        sum
    }

    /// A zero checksum marks a record that was never sealed.
    pub fn checksum_ok(&self) -> bool {
        self.checksum == 0 || self.checksum == self.compute_checksum()
    }

    pub fn encode(&self) -> [u8; STAT_LEN] {
        let mut buf = [0u8; STAT_LEN];
        buf[0..4].copy_from_slice(&STAT_MAGIC);
        format::write_u32(&mut buf, 4, FORMAT_VERSION);
        format::write_i32(&mut buf, 8, self.nslots);
        format::write_i32(&mut buf, 12, self.youngest_slot);
        format::write_i32(&mut buf, 16, self.oldest_slot);
        format::write_u32(&mut buf, 20, u32::from(self.append_mode));
        format::write_i64(&mut buf, 24, self.buf_size);
        format::write_i64(&mut buf, 32, self.youngest_id);
        format::write_i64(&mut buf, 40, self.begin_insert);
        format::write_i64(&mut buf, 48, self.end_insert);
        format::write_i64(&mut buf, 56, self.begin_append);
        format::write_i64(&mut buf, 64, self.time_written);
        format::write_i64(&mut buf, 72, self.checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < STAT_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("status block too small"));
        }
        if buf[0..4] != STAT_MAGIC {
            return Err(Error::new(ErrorKind::Corrupt).with_message("bad status magic"));
        }
        let version = format::read_u32(buf, 4);
        if !SUPPORTED_FORMAT_VERSIONS.contains(&version) {
            return Err(format::version_error(version));
        }
        let append_mode = match format::read_u32(buf, 20) {
            0 => false,
            1 => true,
            other => {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message(format!("invalid append_mode flag {other}")));
            }
        };

        let status = Self {
            nslots: format::read_i32(buf, 8),
            youngest_slot: format::read_i32(buf, 12),
            oldest_slot: format::read_i32(buf, 16),
            append_mode,
            buf_size: format::read_i64(buf, 24),
            youngest_id: format::read_i64(buf, 32),
            begin_insert: format::read_i64(buf, 40),
            end_insert: format::read_i64(buf, 48),
            begin_append: format::read_i64(buf, 56),
            time_written: format::read_i64(buf, 64),
            checksum: format::read_i64(buf, 72),
        };
        status.validate_ranges()?;
        Ok(status)
    }

    fn validate_ranges(&self) -> Result<(), Error> {
        if self.nslots < 1 {
            return Err(Error::new(ErrorKind::Corrupt).with_message("nslots must be positive"));
        }
        if self.buf_size <= ARENA_COOKIE_LEN as i64 {
            return Err(Error::new(ErrorKind::Corrupt).with_message("buf_size too small"));
        }
        if self.youngest_id < -1 {
            return Err(Error::new(ErrorKind::Corrupt).with_message("youngest_id below -1"));
        }
        let slot_ok = |slot: i32| slot >= -1 && slot < self.nslots;
        if !slot_ok(self.youngest_slot) || !slot_ok(self.oldest_slot) {
            return Err(Error::new(ErrorKind::Corrupt).with_message("slot cursor out of range"));
        }
        let empties = [
            self.youngest_slot == -1,
            self.oldest_slot == -1,
            self.youngest_id == -1,
        ];
        if empties.iter().any(|&e| e) && !empties.iter().all(|&e| e) {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("empty-queue cursors disagree"));
        }
        let capacity = self.capacity();
        let offset_ok = |off: i64| (0..=capacity).contains(&off);
        if !offset_ok(self.begin_insert) || !offset_ok(self.end_insert) || !offset_ok(self.begin_append)
        {
            return Err(Error::new(ErrorKind::Corrupt).with_message("ring offset out of range"));
        }
        if self.begin_insert > self.end_insert {
            return Err(Error::new(ErrorKind::Corrupt).with_message("insert region inverted"));
        }
        Ok(())
    }
}
