// Advisory whole-file locking on the status file, with a liveness callback
// invoked while a caller is blocked waiting for the lock.
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};

/// Called with a short context string each poll round while an operation is
/// blocked, so an external process monitor sees the caller alive.
pub type Heartbeat = Box<dyn FnMut(&str) + Send>;

const LOCK_POLL_MS: u64 = 100;
const OPEN_POLL_MS: u64 = 1000;
const READ_POLL_MS: u64 = 10;

/// Sleep-with-heartbeat step shared by lock acquisition, blocking opens, and
/// blocking reads.
#[derive(Clone, Copy, Debug)]
pub struct PollPolicy {
    pub interval: Duration,
}

impl PollPolicy {
    pub fn lock_default() -> Self {
        Self {
            interval: Duration::from_millis(LOCK_POLL_MS),
        }
    }

    /// Non-positive intervals select the default open poll of 1000 ms.
    pub fn open_poll(millis: i64) -> Self {
        let millis = if millis <= 0 { OPEN_POLL_MS } else { millis as u64 };
        Self {
            interval: Duration::from_millis(millis),
        }
    }

    /// Non-positive intervals select the default read poll of 10 ms.
    pub fn read_poll(millis: i64) -> Self {
        let millis = if millis <= 0 { READ_POLL_MS } else { millis as u64 };
        Self {
            interval: Duration::from_millis(millis),
        }
    }

    pub fn pause(&self, heartbeat: &mut Option<Heartbeat>, context: &str) {
        if let Some(beat) = heartbeat.as_mut() {
            beat(context);
        }
        thread::sleep(self.interval);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Holds the advisory lock for the scope of a metadata read/mutate/write
/// triple; dropping it releases the lock.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Explicit trait call: std gained same-named inherent File methods.
        if let Err(err) = FileExt::unlock(&self.file) {
            // Unlocking a descriptor that lost its lock is a programming
            // error, reported but non-fatal.
            tracing::warn!(path = %self.path.display(), error = %err, "queue unlock failed");
        }
    }
}

/// Acquire an advisory lock, blocking indefinitely. While blocked, the
/// heartbeat fires once per poll round.
pub fn acquire(
    file: &File,
    path: &Path,
    mode: LockMode,
    heartbeat: &mut Option<Heartbeat>,
    policy: &PollPolicy,
) -> Result<LockGuard, Error> {
    loop {
        let attempt = match mode {
            LockMode::Shared => FileExt::try_lock_shared(file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(file),
        };
        match attempt {
            Ok(()) => {
                // The dup shares the open file description, so the guard can
                // release the lock without borrowing the caller's handle.
                let dup = file.try_clone().map_err(|err| {
                    Error::new(ErrorKind::Io).with_path(path).with_source(err)
                })?;
                return Ok(LockGuard {
                    file: dup,
                    path: path.to_path_buf(),
                });
            }
            Err(err) if is_contended(&err) => {
                policy.pause(heartbeat, "waiting for queue lock");
            }
            Err(err) => {
                return Err(Error::new(lock_error_kind(&err))
                    .with_path(path)
                    .with_source(err));
            }
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}
