// End-to-end queue behavior across independent handles in one process.
use std::sync::mpsc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fmq::core::queue::{Message, Queue, ReadOutcome};

fn read_message(queue: &mut Queue) -> Message {
    match queue.read_next().expect("read") {
        ReadOutcome::Message(message) => message,
        other => panic!("expected a message, got {other:?}"),
    }
}

fn drain(queue: &mut Queue) -> (Vec<i64>, usize) {
    let mut ids = Vec::new();
    let mut gaps = 0;
    loop {
        match queue.read_next().expect("read") {
            ReadOutcome::Message(message) => ids.push(message.id),
            ReadOutcome::Gap => gaps += 1,
            ReadOutcome::NoNewData => return (ids, gaps),
        }
    }
}

#[test]
fn payload_round_trips_to_a_fresh_reader() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("queue");
    let mut writer = Queue::create(&base, 32, 1 << 16).expect("create");

    let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
    writer.publish(&payload).expect("publish");

    let mut reader = Queue::open_read_only(&base).expect("open reader");
    let message = read_message(&mut reader);
    assert_eq!(message.data, payload);
}

#[test]
fn writer_ids_survive_handle_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("queue");
    let mut writer = Queue::create(&base, 8, 8192).expect("create");
    assert_eq!(writer.publish(b"a").expect("publish"), 0);
    assert_eq!(writer.publish(b"b").expect("publish"), 1);
    drop(writer);

    let mut writer = Queue::open_existing(&base).expect("reopen");
    assert_eq!(writer.publish(b"c").expect("publish"), 2);
}

// The slot table holds 4 entries; six publishes recycle the first two. A
// reader that attached while messages 1-4 were live observes a gap and
// resumes at the oldest entry still in the queue.
#[test]
fn idle_reader_observes_gap_and_resumes_at_oldest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("queue");
    let mut writer = Queue::create(&base, 4, 4096).expect("create");
    for i in 0..4u8 {
        writer.publish(&[i; 100]).expect("publish");
    }

    let mut reader = Queue::open_read_only(&base).expect("open reader");
    for i in 4..6u8 {
        writer.publish(&[i; 100]).expect("publish");
    }

    assert_eq!(reader.read_next().expect("read"), ReadOutcome::Gap);
    let (ids, gaps) = drain(&mut reader);
    assert_eq!(ids, vec![2, 3, 4, 5]);
    assert_eq!(gaps, 0);
}

#[test]
fn independent_readers_each_see_every_message_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("queue");
    let mut writer = Queue::create(&base, 64, 1 << 16).expect("create");

    let mut fast = Queue::open_read_only(&base).expect("open fast");
    let mut slow = Queue::open_read_only(&base).expect("open slow");

    let mut fast_ids = Vec::new();
    for i in 0..10u8 {
        writer.publish(&[i]).expect("publish");
        // The fast reader keeps pace message by message.
        fast_ids.push(read_message(&mut fast).id);
    }
    // The slow reader drains everything afterwards.
    let (slow_ids, gaps) = drain(&mut slow);

    let expected: Vec<i64> = (0..10).collect();
    assert_eq!(fast_ids, expected);
    assert_eq!(slow_ids, expected);
    assert_eq!(gaps, 0);
}

#[test]
fn clear_is_idempotent_and_strict_open_sees_an_empty_queue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("queue");
    let mut writer = Queue::create(&base, 8, 4096).expect("create");
    for _ in 0..3 {
        writer.publish(b"payload").expect("publish");
    }
    writer.clear().expect("clear");
    writer.clear().expect("clear again");

    let mut reader = Queue::open_existing(&base).expect("strict open");
    let status = reader.status().expect("status");
    assert!(status.is_empty());
    assert_eq!(status.oldest_slot, -1);
    assert_eq!(status.youngest_slot, -1);
    assert_eq!(reader.read_next().expect("read"), ReadOutcome::NoNewData);
}

#[test]
fn blocking_open_returns_only_after_create() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("late");
    let open_path = base.clone();

    let (started_tx, started_rx) = mpsc::channel();
    let opener = thread::spawn(move || {
        started_tx.send(()).expect("signal start");
        let mut queue = Queue::open_blocking(&open_path, 20).expect("open");
        let opened_at = Instant::now();
        let message = queue.read_blocking(20).expect("read");
        (opened_at, message)
    });

    started_rx.recv().expect("opener started");
    // Give the opener time to hit the not-yet-created path at least once.
    thread::sleep(Duration::from_millis(200));
    let mut writer = Queue::create(&base, 8, 4096).expect("create");
    let created_at = Instant::now();
    writer.publish(b"first light").expect("publish");

    let (opened_at, message) = opener.join().expect("join");
    assert!(opened_at >= created_at - Duration::from_millis(50));
    assert_eq!(message.id, 0);
    assert_eq!(message.data, b"first light");
}

#[test]
fn heartbeat_fires_while_waiting_for_a_queue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("late");
    let open_path = base.clone();

    let beats = Arc::new(AtomicUsize::new(0));
    let beats_in_thread = Arc::clone(&beats);
    let opener = thread::spawn(move || {
        Queue::open_blocking_with(
            &open_path,
            10,
            Some(Box::new(move |_context: &str| {
                beats_in_thread.fetch_add(1, Ordering::SeqCst);
            })),
            false,
        )
        .expect("open")
    });

    while beats.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(5));
    }
    Queue::create(&base, 8, 4096).expect("create");
    let queue = opener.join().expect("join");
    assert_eq!(queue.nslots(), 8);
    assert!(beats.load(Ordering::SeqCst) >= 3);
}

#[test]
fn blocking_read_write_open_can_publish_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("late");
    let open_path = base.clone();

    // A consumer that also publishes (e.g. a status echo) starts first.
    let opener = thread::spawn(move || {
        let mut queue = Queue::open_blocking_read_write(&open_path, 20).expect("open");
        let message = queue.read_blocking(20).expect("read");
        let echoed = queue.publish(&message.data).expect("publish back");
        (message.id, echoed)
    });

    thread::sleep(Duration::from_millis(100));
    let mut writer = Queue::create(&base, 8, 4096).expect("create");
    writer.publish(b"ping").expect("publish");

    let (seen, echoed) = opener.join().expect("join");
    assert_eq!(seen, 0);
    assert_eq!(echoed, 1);
    assert_eq!(read_message(&mut writer).id, 0);
    assert_eq!(read_message(&mut writer).data, b"ping");
}

#[test]
fn seek_to_end_discards_the_backlog() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("queue");
    let mut writer = Queue::create(&base, 16, 8192).expect("create");
    for i in 0..5u8 {
        writer.publish(&[i]).expect("publish");
    }

    let mut reader = Queue::open_read_only(&base).expect("open");
    reader.seek_to_end().expect("seek");
    assert_eq!(reader.read_next().expect("read"), ReadOutcome::NoNewData);

    writer.publish(b"new").expect("publish");
    let message = read_message(&mut reader);
    assert_eq!(message.id, 5);
    assert_eq!(message.data, b"new");
}

#[test]
fn read_blocking_times_out_when_configured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("queue");
    Queue::create(&base, 8, 4096).expect("create");

    let mut reader = Queue::open_read_only(&base).expect("open");
    reader.set_blocking_read_timeout_ms(50);
    let err = reader.read_blocking(10).expect_err("should time out");
    assert_eq!(err.kind(), fmq::core::error::ErrorKind::Busy);
}
