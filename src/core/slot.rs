// Slot records: the fixed-size ring-table index over the payload arena.
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{self, SLOT_LEN, STAT_LEN};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Slot {
    pub active: bool,
    pub id: i64,
    pub time: i64,
    pub msg_len: i32,
    pub stored_len: i32,
    pub offset: i64,
    pub checksum: i64,
}

impl Slot {
    /// The zeroed state a slot holds at create time and after eviction.
    pub fn empty() -> Self {
        Self {
            active: false,
            id: 0,
            time: 0,
            msg_len: 0,
            stored_len: 0,
            offset: 0,
            checksum: 0,
        }
    }

    /// Byte offset of slot `i` within the `.stat` file.
    pub fn file_offset(index: i32) -> u64 {
        STAT_LEN as u64 + index as u64 * SLOT_LEN as u64
    }

    pub fn compute_checksum(&self) -> i64 {
        let mut sum: i64 = 0;
        sum = sum.wrapping_add(i64::from(self.active));
        sum = sum.wrapping_add(!self.id);
        sum = sum.wrapping_add(self.time);
        sum = sum.wrapping_add(!i64::from(self.msg_len));
        sum = sum.wrapping_add(i64::from(self.stored_len));
        sum = sum.wrapping_add(self.offset);
        sum
    }

    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// A zero checksum marks a record that was never sealed (zeroed slots).
    pub fn checksum_ok(&self) -> bool {
        self.checksum == 0 || self.checksum == self.compute_checksum()
    }

    pub fn encode(&self) -> [u8; SLOT_LEN] {
        let mut buf = [0u8; SLOT_LEN];
        format::write_u32(&mut buf, 0, u32::from(self.active));
        format::write_i32(&mut buf, 4, self.msg_len);
        format::write_i32(&mut buf, 8, self.stored_len);
        format::write_i64(&mut buf, 16, self.id);
        format::write_i64(&mut buf, 24, self.time);
        format::write_i64(&mut buf, 32, self.offset);
        format::write_i64(&mut buf, 40, self.checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < SLOT_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("slot record too small"));
        }
        let active = match format::read_u32(buf, 0) {
            0 => false,
            1 => true,
            other => {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message(format!("invalid slot active flag {other}")));
            }
        };
        let slot = Self {
            active,
            msg_len: format::read_i32(buf, 4),
            stored_len: format::read_i32(buf, 8),
            id: format::read_i64(buf, 16),
            time: format::read_i64(buf, 24),
            offset: format::read_i64(buf, 32),
            checksum: format::read_i64(buf, 40),
        };
        if slot.active && (slot.msg_len < 0 || slot.stored_len < 0 || slot.offset < 0 || slot.id < 0)
        {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("active slot has negative fields")
                .with_id(slot.id));
        }
        Ok(slot)
    }
}

/// Whether `slot` lies in the live region between `oldest` and `youngest`,
/// walking forward with wraparound, inclusive of both ends.
pub fn in_active_region(slot: i32, oldest: i32, youngest: i32) -> bool {
    if oldest < 0 || youngest < 0 {
        return false;
    }
    if youngest >= oldest {
        slot >= oldest && slot <= youngest
    } else {
        slot >= oldest || slot <= youngest
    }
}
