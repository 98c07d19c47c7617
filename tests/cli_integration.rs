// Cross-process behavior driven through the built binary: lock serialization
// between concurrent publishers and blocking open across processes.
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Duration;

use fmq::core::queue::Queue;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_fmq");
    Command::new(exe)
}

#[test]
fn concurrent_publishers_are_serialized_by_the_lock() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().join("queue");
    let base_str = base.to_str().unwrap();

    let create = cmd()
        .args(["create", base_str, "--nslots", "64", "--buf-size", "65536"])
        .output()
        .expect("create");
    assert!(create.status.success());

    let workers = 8;
    let mut children = Vec::new();
    for i in 0..workers {
        let child = cmd()
            .args(["publish", base_str, "--text", &format!("worker {i}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }
    for mut child in children {
        let status = child.wait().expect("wait");
        assert!(status.success());
    }

    let mut queue = Queue::open_read_only(&base).expect("open");
    let status = queue.status().expect("status");
    assert_eq!(status.youngest_id, i64::from(workers) - 1);

    // Every worker's message made it in exactly once.
    let mut payloads = Vec::new();
    loop {
        match queue.read_next().expect("read") {
            fmq::core::queue::ReadOutcome::Message(message) => {
                payloads.push(String::from_utf8(message.data).expect("utf8"));
            }
            fmq::core::queue::ReadOutcome::Gap => panic!("unexpected gap"),
            fmq::core::queue::ReadOutcome::NoNewData => break,
        }
    }
    payloads.sort();
    let expected: Vec<String> = (0..workers).map(|i| format!("worker {i}")).collect();
    assert_eq!(payloads, expected);
}

#[test]
fn follow_tail_waits_for_the_queue_to_be_created() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().join("late");
    let base_str = base.to_str().unwrap();

    let mut tail = cmd()
        .args(["tail", base_str, "--follow", "--poll-ms", "20"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tail");

    // The queue does not exist yet; the follower must sit in its open loop.
    std::thread::sleep(Duration::from_millis(300));

    let create = cmd()
        .args(["create", base_str, "--nslots", "8", "--buf-size", "4096"])
        .output()
        .expect("create");
    assert!(create.status.success());

    let publish = cmd()
        .args(["publish", base_str, "--text", "hello follower"])
        .output()
        .expect("publish");
    assert!(publish.status.success());

    let stdout = tail.stdout.take().expect("stdout");
    let mut lines = BufReader::new(stdout).lines();
    let first = lines.next().expect("line").expect("read line");
    let value: serde_json::Value = serde_json::from_str(&first).expect("json");
    assert_eq!(value["id"], 0);
    assert_eq!(value["data"], "hello follower");

    tail.kill().expect("kill");
    let _ = tail.wait();
}

#[test]
fn info_reflects_publish_and_clear() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().join("queue");
    let base_str = base.to_str().unwrap();

    let create = cmd()
        .args(["create", base_str])
        .output()
        .expect("create");
    assert!(create.status.success());

    let info = |expect_empty: bool| {
        let out = cmd().args(["info", base_str]).output().expect("info");
        assert!(out.status.success());
        let value: serde_json::Value =
            serde_json::from_slice(&out.stdout).expect("info json");
        assert_eq!(value["empty"], expect_empty);
        value
    };

    info(true);

    let publish = cmd()
        .args(["publish", base_str, "--text", "one"])
        .output()
        .expect("publish");
    assert!(publish.status.success());
    let value = info(false);
    assert_eq!(value["youngest_id"], 0);

    let clear = cmd().args(["clear", base_str]).output().expect("clear");
    assert!(clear.status.success());
    info(true);
}

#[test]
fn info_on_a_missing_queue_exits_with_absent_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().join("nope");

    let out = cmd()
        .args(["info", base.to_str().unwrap()])
        .output()
        .expect("info");
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(3));
    let err: serde_json::Value = serde_json::from_slice(&out.stderr).expect("error json");
    assert_eq!(err["error"]["kind"], "Absent");
}
