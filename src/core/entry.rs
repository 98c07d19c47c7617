// Arena entry framing.
//
// Each stored entry wraps the payload so a reader can tell a recycled or
// half-overwritten region from the message its slot record promised:
//
//   | magic "FMQE" (4) | slot index i32 (4) | payload | pad to 8 | id i64 (8) |
//
// The trailing id doubles as a generation stamp: ids never wrap, so a
// mismatch means the slot was recycled under the reader.
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{self, align8, ENTRY_MAGIC};

const HEAD_LEN: usize = 8;
const TAIL_LEN: usize = 8;

/// Total arena bytes consumed by an entry for a `msg_len`-byte payload.
pub fn stored_len(msg_len: usize) -> usize {
    align8(HEAD_LEN + msg_len) + TAIL_LEN
}

pub fn encode(slot_index: i32, id: i64, payload: &[u8]) -> Vec<u8> {
    let total = stored_len(payload.len());
    let mut buf = vec![0u8; total];
    buf[0..4].copy_from_slice(&ENTRY_MAGIC);
    format::write_i32(&mut buf, 4, slot_index);
    buf[HEAD_LEN..HEAD_LEN + payload.len()].copy_from_slice(payload);
    format::write_i64(&mut buf, total - TAIL_LEN, id);
    buf
}

/// Validate a raw entry against the slot record that pointed at it and return
/// the payload bytes.
pub fn check(buf: &[u8], slot_index: i32, slot_id: i64, msg_len: i32) -> Result<&[u8], Error> {
    let msg_len = msg_len as usize;
    if buf.len() != stored_len(msg_len) {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("entry length disagrees with slot record")
            .with_id(slot_id));
    }
    if buf[0..4] != ENTRY_MAGIC {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("bad entry magic")
            .with_id(slot_id));
    }
    let id = format::read_i64(buf, buf.len() - TAIL_LEN);
    if id != slot_id {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("entry id {id} does not match slot id"))
            .with_id(slot_id));
    }
    let stored_slot = format::read_i32(buf, 4);
    if stored_slot != slot_index {
        // Advisory only: the slot-index field has no bearing on which bytes
        // belong to the message once the id matches.
        tracing::warn!(
            expected = slot_index,
            found = stored_slot,
            id = slot_id,
            "entry slot index disagrees with slot table"
        );
    }
    Ok(&buf[HEAD_LEN..HEAD_LEN + msg_len])
}
