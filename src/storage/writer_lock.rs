//! Single-writer lock of an editable store.
//!
//! An editable handle holds an exclusive advisory lock on `<store>/.lock`
//! and records its process id in the file, so a second writer is refused
//! with [`GfError::StoreLocked`] naming the holder. Read-only handles never
//! look at the lock. The lock is released when the [`WriterLock`] drops or
//! the process exits.

use std::fs::{self, File, OpenOptions};
use std::io::{Result as IoResult, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{GfError, GfResult};

/// Name of the lock file inside a store directory.
pub const LOCK_FILE: &str = ".lock";

/// Exclusive lock held by the single writer of a store.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    path: PathBuf,
}

impl WriterLock {
    /// Takes the writer lock of the store in `dir` without blocking.
    ///
    /// # Errors
    /// - `StoreLocked` if another handle is populating the store
    /// - `Io` if the lock file cannot be opened or written
    pub fn acquire(dir: &Path) -> GfResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !try_lock_exclusive(&file)? {
            return Err(GfError::StoreLocked {
                path: dir.to_path_buf(),
                holder: read_holder(&path),
            });
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!(path = %path.display(), "acquired writer lock");
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        // The stale pid is harmless; clearing it keeps error messages honest.
        let _ = self.file.set_len(0);
    }
}

/// Process id recorded by the current holder, if readable.
fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// `Ok(false)` when another handle holds the lock.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> IoResult<bool> {
    use std::io::Error as IoError;
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> IoResult<bool> {
    use std::io::Error as IoError;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // SAFETY: the handle belongs to `file`; OVERLAPPED is plain data and may be zeroed.
    let ok = unsafe {
        let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
        LockFileEx(
            file.as_raw_handle() as HANDLE,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };
    if ok != 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(any(unix, windows)))]
fn try_lock_exclusive(_file: &File) -> IoResult<bool> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "store locking is not supported on this platform",
    ))
}
