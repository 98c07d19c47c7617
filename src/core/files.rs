// The two on-disk halves of a queue and their fixed-offset record I/O.
//
//   <path>.stat  status block + slot table, advisory locks taken on this file
//   <path>.buf   arena cookie + circular payload region
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{ARENA_COOKIE_LEN, ARENA_MAGIC, SLOT_LEN, STAT_LEN};
use crate::core::lock::{self, Heartbeat, LockGuard, LockMode, PollPolicy};
use crate::core::slot::Slot;
use crate::core::status::QueueStatus;

const READ_RETRIES: usize = 3;

pub fn stat_path(base: &Path) -> PathBuf {
    sibling(base, ".stat")
}

pub fn buf_path(base: &Path) -> PathBuf {
    sibling(base, ".buf")
}

fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct QueueFiles {
    stat_path: PathBuf,
    buf_path: PathBuf,
    stat: File,
    buf: File,
    writable: bool,
}

impl QueueFiles {
    pub fn exists(base: &Path) -> bool {
        stat_path(base).exists() && buf_path(base).exists()
    }

    /// Open both files for write truncation, creating the parent directory if
    /// missing. The caller takes the exclusive lock and then calls
    /// `init_contents`.
    pub fn create(base: &Path) -> Result<Self, Error> {
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    Error::new(ErrorKind::Io).with_path(parent).with_source(err)
                })?;
            }
        }
        let stat_path = stat_path(base);
        let buf_path = buf_path(base);
        let stat = open_file(&stat_path, true, true)?;
        let buf = open_file(&buf_path, true, true)?;
        Ok(Self {
            stat_path,
            buf_path,
            stat,
            buf,
            writable: true,
        })
    }

    /// Open an existing queue; never creates. A missing file is `Absent`.
    pub fn open(base: &Path, writable: bool) -> Result<Self, Error> {
        let stat_path = stat_path(base);
        let buf_path = buf_path(base);
        let stat = open_file(&stat_path, writable, false)?;
        let buf = open_file(&buf_path, writable, false)?;
        Ok(Self {
            stat_path,
            buf_path,
            stat,
            buf,
            writable,
        })
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn stat_path(&self) -> &Path {
        &self.stat_path
    }

    /// Write a fresh empty queue in place: zeroed slot table, sealed status,
    /// arena cookie, and a single byte at the end of the arena to set its
    /// size without pre-zeroing the region.
    pub fn init_contents(&mut self, nslots: i32, buf_size: i64) -> Result<(), Error> {
        let zeros = vec![0u8; nslots as usize * SLOT_LEN];
        self.seek_stat(STAT_LEN as u64)?;
        self.write_stat_bytes(&zeros)?;
        self.stat
            .set_len(QueueStatus::stat_file_len(nslots))
            .map_err(|err| self.stat_io(err))?;

        let mut status = QueueStatus::new(nslots, buf_size);
        self.write_status(&mut status)?;

        self.seek_buf(0)?;
        self.write_buf_bytes(&ARENA_MAGIC)?;
        self.seek_buf(buf_size as u64 - 1)?;
        self.write_buf_bytes(&[0u8])?;
        self.buf.flush().map_err(|err| self.buf_io(err))?;
        Ok(())
    }

    /// The only corruption check on open: cookie match plus exact file sizes.
    /// Detects truncation and foreign files, not bit-rot within a record.
    pub fn validate(&mut self, status: &QueueStatus) -> Result<(), Error> {
        let stat_len = self
            .stat
            .metadata()
            .map_err(|err| self.stat_io(err))?
            .len();
        let expected = QueueStatus::stat_file_len(status.nslots);
        if stat_len != expected {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_path(&self.stat_path)
                .with_message(format!(
                    "status file is {stat_len} bytes, expected {expected}"
                )));
        }
        let buf_len = self.buf.metadata().map_err(|err| self.buf_io(err))?.len();
        if buf_len != status.buf_size as u64 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_path(&self.buf_path)
                .with_message(format!(
                    "arena file is {buf_len} bytes, expected {}",
                    status.buf_size
                )));
        }
        let mut cookie = [0u8; ARENA_COOKIE_LEN];
        self.seek_buf(0)?;
        self.buf
            .read_exact(&mut cookie)
            .map_err(|err| self.buf_io(err))?;
        if cookie != ARENA_MAGIC {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_path(&self.buf_path)
                .with_message("bad arena magic cookie"));
        }
        Ok(())
    }

    /// Read the status block, re-reading on checksum mismatch: a reader's
    /// snapshot can race a writer that died mid-write. After the retries the
    /// last value is used, matching the recoverable-by-design contract.
    pub fn read_status(&mut self) -> Result<QueueStatus, Error> {
        let mut last = None;
        for _ in 0..READ_RETRIES {
            let mut buf = [0u8; STAT_LEN];
            self.seek_stat(0)?;
            self.stat
                .read_exact(&mut buf)
                .map_err(|err| self.stat_io(err))?;
            let status = QueueStatus::decode(&buf)?;
            if status.checksum_ok() {
                return Ok(status);
            }
            last = Some(status);
        }
        let status = last.ok_or_else(|| Error::new(ErrorKind::Internal))?;
        tracing::warn!(
            path = %self.stat_path.display(),
            checksum = status.checksum,
            expected = status.compute_checksum(),
            "status checksum mismatch persisted, continuing with last read"
        );
        Ok(status)
    }

    pub fn write_status(&mut self, status: &mut QueueStatus) -> Result<(), Error> {
        status.seal(now_unix());
        self.seek_stat(0)?;
        self.write_stat_bytes(&status.encode())?;
        self.stat.flush().map_err(|err| self.stat_io(err))
    }

    pub fn read_slot(&mut self, index: i32) -> Result<Slot, Error> {
        let mut last: Option<Result<Slot, Error>> = None;
        for _ in 0..READ_RETRIES {
            let mut buf = [0u8; SLOT_LEN];
            self.seek_stat(Slot::file_offset(index))?;
            self.stat
                .read_exact(&mut buf)
                .map_err(|err| self.stat_io(err))?;
            match Slot::decode(&buf) {
                Ok(slot) if slot.checksum_ok() => return Ok(slot),
                other => last = Some(other),
            }
        }
        match last.ok_or_else(|| Error::new(ErrorKind::Internal))? {
            Ok(slot) => {
                tracing::warn!(
                    path = %self.stat_path.display(),
                    slot = index,
                    "slot checksum mismatch persisted, continuing with last read"
                );
                Ok(slot)
            }
            Err(err) => Err(err),
        }
    }

    pub fn write_slot(&mut self, index: i32, slot: &Slot) -> Result<(), Error> {
        let mut sealed = *slot;
        if sealed.active {
            sealed.seal();
        }
        self.seek_stat(Slot::file_offset(index))?;
        self.write_stat_bytes(&sealed.encode())?;
        self.stat.flush().map_err(|err| self.stat_io(err))
    }

    pub fn read_entry(&mut self, offset: i64, len: i32) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; len as usize];
        self.seek_buf(ARENA_COOKIE_LEN as u64 + offset as u64)?;
        self.buf
            .read_exact(&mut buf)
            .map_err(|err| self.buf_io(err))?;
        Ok(buf)
    }

    pub fn write_entry(&mut self, offset: i64, bytes: &[u8]) -> Result<(), Error> {
        self.seek_buf(ARENA_COOKIE_LEN as u64 + offset as u64)?;
        self.write_buf_bytes(bytes)?;
        self.buf.flush().map_err(|err| self.buf_io(err))
    }

    pub fn lock(
        &self,
        mode: LockMode,
        heartbeat: &mut Option<Heartbeat>,
        policy: &PollPolicy,
    ) -> Result<LockGuard, Error> {
        lock::acquire(&self.stat, &self.stat_path, mode, heartbeat, policy)
    }

    fn seek_stat(&mut self, offset: u64) -> Result<(), Error> {
        self.stat
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|err| self.stat_io(err))
    }

    fn seek_buf(&mut self, offset: u64) -> Result<(), Error> {
        self.buf
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|err| self.buf_io(err))
    }

    fn write_stat_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stat
            .write_all(bytes)
            .map_err(|err| self.stat_io(err))
    }

    fn write_buf_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.buf.write_all(bytes).map_err(|err| self.buf_io(err))
    }

    fn stat_io(&self, err: std::io::Error) -> Error {
        Error::new(io_error_kind(&err))
            .with_path(&self.stat_path)
            .with_source(err)
    }

    fn buf_io(&self, err: std::io::Error) -> Error {
        Error::new(io_error_kind(&err))
            .with_path(&self.buf_path)
            .with_source(err)
    }
}

// EOF on a fixed-offset record read means the file is shorter than the
// format requires: truncation, not an I/O fault.
fn io_error_kind(err: &std::io::Error) -> ErrorKind {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ErrorKind::Corrupt
    } else {
        ErrorKind::Io
    }
}

fn open_file(path: &Path, writable: bool, create: bool) -> Result<File, Error> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .create(create)
        .truncate(create)
        .open(path)
        .map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::Absent
            } else {
                ErrorKind::Io
            };
            Error::new(kind).with_path(path).with_source(err)
        })
}
