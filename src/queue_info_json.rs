//! Purpose: Shared queue-info JSON serializers for the CLI.
//! Exports: `queue_info_json`, `slot_json`, `message_json`.
//! Invariants: Stable key names for v0 info payloads.

use fmq::core::queue::Message;
use fmq::core::slot::Slot;
use fmq::core::status::QueueStatus;
use serde_json::{json, Value};
use std::path::Path;

pub(crate) fn queue_info_json(path: &Path, status: &QueueStatus) -> Value {
    json!({
        "path": path.display().to_string(),
        "nslots": status.nslots,
        "buf_size": status.buf_size,
        "capacity": status.capacity(),
        "youngest_id": status.youngest_id,
        "youngest_slot": status.youngest_slot,
        "oldest_slot": status.oldest_slot,
        "begin_insert": status.begin_insert,
        "end_insert": status.end_insert,
        "begin_append": status.begin_append,
        "append_mode": status.append_mode,
        "time_written": status.time_written,
        "empty": status.is_empty(),
    })
}

pub(crate) fn slot_json(index: usize, slot: &Slot, status: &QueueStatus) -> Value {
    json!({
        "slot": index,
        "active": slot.active,
        // Whether the index falls in the region the status block calls live;
        // disagreement with `active` points at a torn or stale table.
        "live": fmq::core::slot::in_active_region(
            index as i32,
            status.oldest_slot,
            status.youngest_slot,
        ),
        "id": slot.id,
        "time": slot.time,
        "msg_len": slot.msg_len,
        "stored_len": slot.stored_len,
        "offset": slot.offset,
    })
}

pub(crate) fn message_json(message: &Message) -> Value {
    json!({
        "id": message.id,
        "time": message.time,
        "len": message.data.len(),
        "data": String::from_utf8_lossy(&message.data),
    })
}

#[cfg(test)]
mod tests {
    use super::{queue_info_json, slot_json};
    use fmq::core::slot::Slot;
    use fmq::core::status::QueueStatus;

    #[test]
    fn info_json_carries_geometry_and_cursors() {
        let mut status = QueueStatus::new(8, 4096);
        status.youngest_id = 3;
        status.youngest_slot = 3;
        status.oldest_slot = 0;
        let value = queue_info_json(std::path::Path::new("/tmp/q"), &status);
        assert_eq!(value["nslots"], 8);
        assert_eq!(value["buf_size"], 4096);
        assert_eq!(value["youngest_id"], 3);
        assert_eq!(value["empty"], false);
    }

    #[test]
    fn slot_json_carries_index_and_liveness() {
        let mut status = QueueStatus::new(8, 4096);
        status.youngest_id = 4;
        status.oldest_slot = 2;
        status.youngest_slot = 4;
        let value = slot_json(5, &Slot::empty(), &status);
        assert_eq!(value["slot"], 5);
        assert_eq!(value["active"], false);
        assert_eq!(value["live"], false);
        let value = slot_json(3, &Slot::empty(), &status);
        assert_eq!(value["live"], true);
    }
}
