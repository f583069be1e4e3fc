// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! IoCtx: one open storage descriptor (file or directory).
//!
//! An IoCtx owns exactly one native descriptor and lives in its path's
//! handle table while its reference count is positive. Read-only file
//! handles can be shared between protocol fids of the same user; directory
//! handles are never shared because the directory stream cursor is private
//! state.

use std::ffi::CStr;
use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use ninefs_proto::Qid;

use crate::error::{FsError, FsResult};
use crate::types::{FlockOp, HandleId, LockKind, LockState, LockTest, User};

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn clear_errno() {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location() = 0;
    }
    #[cfg(target_os = "macos")]
    unsafe {
        *libc::__error() = 0;
    }
}

/// An owned `DIR*` stream. The raw pointer makes this `!Send` by default,
/// but access is always serialized through the owning IoCtx's mutex.
#[derive(Debug)]
struct DirStream {
    dirp: NonNull<libc::DIR>,
}

unsafe impl Send for DirStream {}

impl DirStream {
    /// Close the stream, reporting the native closedir error.
    fn close(self) -> io::Result<()> {
        let dirp = self.dirp;
        std::mem::forget(self);
        cvt(unsafe { libc::closedir(dirp.as_ptr()) }).map(|_| ())
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.dirp.as_ptr());
        }
    }
}

#[derive(Debug)]
enum Descriptor {
    File(OwnedFd),
    /// The directory stream owns the fd; closedir releases it.
    Dir(Mutex<DirStream>),
}

/// One raw directory entry together with the stream position that follows
/// it, suitable for use as a readdir continuation token.
#[derive(Clone, Debug)]
pub struct DirEntryAt {
    pub ino: u64,
    pub dtype: u8,
    pub name: String,
    pub offset: u64,
}

/// Open storage context: a refcounted native descriptor plus the protocol
/// state that rides along with it.
#[derive(Debug)]
pub struct IoCtx {
    id: HandleId,
    refcount: Mutex<u32>,
    /// Raw fd of the descriptor, valid for the lifetime of `desc`.
    fd: RawFd,
    desc: Descriptor,
    lock_state: Mutex<LockState>,
    qid: Qid,
    /// Preferred transfer size advertised to the client; 0 lets the client
    /// fall back to msize minus the I/O header overhead.
    iounit: u32,
    flags: i32,
    user: Arc<User>,
}

impl IoCtx {
    /// Perform the real open and build the handle around the result. On any
    /// failure the partially opened descriptor is closed and nothing is
    /// retained.
    pub(crate) fn open(
        id: HandleId,
        user: Arc<User>,
        path: &str,
        flags: i32,
        mode: u32,
    ) -> FsResult<IoCtx> {
        let cpath = CString::new(path).map_err(|_| FsError::InvalidArgument)?;
        let fd = cvt(unsafe { libc::open(cpath.as_ptr(), flags, mode as libc::c_uint) })?;

        let mut st = MaybeUninit::<libc::stat>::zeroed();
        if let Err(e) = cvt(unsafe { libc::fstat(fd, st.as_mut_ptr()) }) {
            unsafe { libc::close(fd) };
            return Err(e.into());
        }
        let st = unsafe { st.assume_init() };
        let qid = Qid::from_stat(&st);

        let desc = if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
            let dirp = unsafe { libc::fdopendir(fd) };
            match NonNull::new(dirp) {
                Some(dirp) => Descriptor::Dir(Mutex::new(DirStream { dirp })),
                None => {
                    let e = io::Error::last_os_error();
                    unsafe { libc::close(fd) };
                    return Err(e.into());
                }
            }
        } else {
            Descriptor::File(unsafe { OwnedFd::from_raw_fd(fd) })
        };

        Ok(IoCtx {
            id,
            refcount: Mutex::new(1),
            fd,
            desc,
            lock_state: Mutex::new(LockState::Unlocked),
            qid,
            iounit: 0,
            flags,
            user,
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn qid(&self) -> &Qid {
        &self.qid
    }

    pub fn iounit(&self) -> u32 {
        self.iounit
    }

    pub fn flags(&self) -> i32 {
        self.flags
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub(crate) fn incref(&self) {
        let mut n = self.refcount.lock().unwrap();
        *n += 1;
    }

    pub(crate) fn decref(&self) -> u32 {
        let mut n = self.refcount.lock().unwrap();
        *n -= 1;
        *n
    }

    pub(crate) fn refcount(&self) -> u32 {
        *self.refcount.lock().unwrap()
    }

    /// Destroy the handle: real close of the descriptor. The owning-identity
    /// reference is released when the IoCtx is dropped.
    pub(crate) fn destroy(self) -> FsResult<()> {
        match self.desc {
            Descriptor::Dir(dir) => {
                let stream = dir.into_inner().unwrap_or_else(|e| e.into_inner());
                stream.close()?;
            }
            Descriptor::File(fd) => {
                cvt(unsafe { libc::close(fd.into_raw_fd()) })?;
            }
        }
        Ok(())
    }

    // ---- pass-through I/O ------------------------------------------------

    pub fn pread(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        Ok(cvt_size(unsafe {
            libc::pread(
                self.fd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                offset as libc::off_t,
            )
        })?)
    }

    pub fn pwrite(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        Ok(cvt_size(unsafe {
            libc::pwrite(self.fd, buf.as_ptr().cast(), buf.len(), offset as libc::off_t)
        })?)
    }

    pub fn stat(&self) -> FsResult<libc::stat> {
        let mut st = MaybeUninit::<libc::stat>::zeroed();
        cvt(unsafe { libc::fstat(self.fd, st.as_mut_ptr()) })?;
        Ok(unsafe { st.assume_init() })
    }

    pub fn chmod(&self, mode: u32) -> FsResult<()> {
        cvt(unsafe { libc::fchmod(self.fd, mode as libc::mode_t) })?;
        Ok(())
    }

    pub fn chown(&self, uid: u32, gid: u32) -> FsResult<()> {
        cvt(unsafe { libc::fchown(self.fd, uid, gid) })?;
        Ok(())
    }

    pub fn truncate(&self, size: u64) -> FsResult<()> {
        cvt(unsafe { libc::ftruncate(self.fd, size as libc::off_t) })?;
        Ok(())
    }

    pub fn utimens(&self, times: &[libc::timespec; 2]) -> FsResult<()> {
        cvt(unsafe { libc::futimens(self.fd, times.as_ptr()) })?;
        Ok(())
    }

    pub fn fsync(&self, datasync: bool) -> FsResult<()> {
        #[cfg(target_os = "linux")]
        let ret = if datasync {
            unsafe { libc::fdatasync(self.fd) }
        } else {
            unsafe { libc::fsync(self.fd) }
        };
        #[cfg(not(target_os = "linux"))]
        let ret = {
            let _ = datasync;
            unsafe { libc::fsync(self.fd) }
        };
        cvt(ret)?;
        Ok(())
    }

    // ---- directory iteration ---------------------------------------------

    fn dir(&self) -> FsResult<&Mutex<DirStream>> {
        match &self.desc {
            Descriptor::Dir(d) => Ok(d),
            Descriptor::File(_) => Err(FsError::NotADirectory),
        }
    }

    pub fn rewinddir(&self) -> FsResult<()> {
        let dir = self.dir()?.lock().unwrap();
        unsafe { libc::rewinddir(dir.dirp.as_ptr()) };
        Ok(())
    }

    pub fn seekdir(&self, offset: u64) -> FsResult<()> {
        let dir = self.dir()?.lock().unwrap();
        unsafe { libc::seekdir(dir.dirp.as_ptr(), offset as libc::c_long) };
        Ok(())
    }

    /// Read one raw entry and the stream position after it.
    ///
    /// The read and the position query are a single critical section under
    /// the handle's directory mutex, so two fids sharing this stream each
    /// observe the offset that matches their own entry rather than one
    /// mutated by a racing reader.
    pub fn readdir(&self) -> FsResult<Option<DirEntryAt>> {
        let dir = self.dir()?.lock().unwrap();
        clear_errno();
        let ent = unsafe { libc::readdir(dir.dirp.as_ptr()) };
        if ent.is_null() {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(0) | None => Ok(None),
                Some(_) => Err(err.into()),
            };
        }
        let offset = unsafe { libc::telldir(dir.dirp.as_ptr()) } as u64;
        let (ino, dtype, name) = unsafe {
            let d = &*ent;
            let name = CStr::from_ptr(d.d_name.as_ptr())
                .to_string_lossy()
                .into_owned();
            (d.d_ino, d.d_type, name)
        };
        Ok(Some(DirEntryAt {
            ino,
            dtype,
            name,
            offset,
        }))
    }

    // ---- advisory locking ------------------------------------------------

    /// Attempt the real advisory lock; on success the cached state follows
    /// the operation. On failure the cached state is untouched and the
    /// native error is reported.
    pub fn flock(&self, op: FlockOp, nonblock: bool) -> FsResult<()> {
        let mut how = match op {
            FlockOp::Shared => libc::LOCK_SH,
            FlockOp::Exclusive => libc::LOCK_EX,
            FlockOp::Unlock => libc::LOCK_UN,
        };
        if nonblock {
            how |= libc::LOCK_NB;
        }
        cvt(unsafe { libc::flock(self.fd, how) })?;
        *self.lock_state.lock().unwrap() = match op {
            FlockOp::Shared => LockState::Shared,
            FlockOp::Exclusive => LockState::Exclusive,
            FlockOp::Unlock => LockState::Unlocked,
        };
        Ok(())
    }

    pub fn lock_state(&self) -> LockState {
        *self.lock_state.lock().unwrap()
    }

    /// Report whether a lock of `kind` could be granted, without ever
    /// mutating the cached state.
    ///
    /// Holding something at least as strong as the request is immediately
    /// compatible. An exclusive test over a cached shared lock is reported
    /// as blocked rather than risking an upgrade that might not restore the
    /// shared lock afterwards. Otherwise an acquire-and-release probe checks
    /// for external contention.
    pub fn test_lock(&self, kind: LockKind) -> LockTest {
        let state = *self.lock_state.lock().unwrap();
        match (kind, state) {
            (LockKind::Shared, LockState::Shared)
            | (LockKind::Shared, LockState::Exclusive)
            | (LockKind::Exclusive, LockState::Exclusive) => LockTest::Compatible,
            (LockKind::Exclusive, LockState::Shared) => LockTest::WouldBlock,
            (LockKind::Shared, LockState::Unlocked) => self.probe(libc::LOCK_SH),
            (LockKind::Exclusive, LockState::Unlocked) => self.probe(libc::LOCK_EX),
        }
    }

    fn probe(&self, how: libc::c_int) -> LockTest {
        if unsafe { libc::flock(self.fd, how | libc::LOCK_NB) } == 0 {
            unsafe { libc::flock(self.fd, libc::LOCK_UN) };
            LockTest::Compatible
        } else {
            LockTest::WouldBlock
        }
    }
}
