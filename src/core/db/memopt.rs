//! Page-cache hints for the database file.
//!
//! The data file is mapped read-only on first use and remapped whenever it
//! has grown. Advice, locking and prefetch all act on that mapping.

#[cfg(unix)]
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
#[cfg(unix)]
use std::num::NonZeroUsize;
#[cfg(unix)]
use std::os::raw::c_void;
#[cfg(unix)]
use std::ptr::NonNull;

#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::path::Path;

use super::Db;
use crate::error::{Error, Result};

/// Lock the pages currently mapped.
pub const MLOCK_CURRENT: u32 = 0x01;
/// Lock pages mapped in the future (process wide).
pub const MLOCK_FUTURE: u32 = 0x02;

/// Access pattern advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    Normal,
    Random,
    Sequential,
    WillNeed,
    DontNeed,
}

/// Address and extent of the current file mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapInfo {
    pub addr: usize,
    pub mapped_len: usize,
    pub map_size: usize,
}

#[cfg(unix)]
pub(crate) struct FileMap {
    ptr: NonNull<c_void>,
    len: usize,
    locked: bool,
}

// The mapping is read-only and only touched under the owning mutex.
#[cfg(unix)]
unsafe impl Send for FileMap {}
#[cfg(unix)]
unsafe impl Sync for FileMap {}

#[cfg(not(unix))]
pub(crate) struct FileMap;

#[cfg(unix)]
impl FileMap {
    fn map(path: &Path, len: NonZeroUsize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(|e| Error::generic(format!("mmap failed: {}", e)))?;

        Ok(Self {
            ptr,
            len: len.get(),
            locked: false,
        })
    }

    fn advise(&self, offset: usize, len: usize, advice: libc::c_int) -> io::Result<()> {
        let addr = unsafe { (self.ptr.as_ptr() as *mut u8).add(offset) } as *mut c_void;
        let rc = unsafe { libc::madvise(addr, len, advice) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn lock(&mut self) -> io::Result<()> {
        let rc = unsafe { libc::mlock(self.ptr.as_ptr(), self.len) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        self.locked = true;
        Ok(())
    }

    fn unlock(&mut self) -> io::Result<()> {
        let rc = unsafe { libc::munlock(self.ptr.as_ptr(), self.len) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        self.locked = false;
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for FileMap {
    fn drop(&mut self) {
        unsafe {
            if self.locked {
                libc::munlock(self.ptr.as_ptr(), self.len);
            }
            let _ = munmap(self.ptr, self.len);
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

impl Db {
    /// Run `f` against a mapping that covers the whole data file.
    #[cfg(unix)]
    fn with_mapping<R>(&self, f: impl FnOnce(&mut FileMap) -> Result<R>) -> Result<R> {
        let mut slot = self.inner.mapping.lock();
        let file_len = std::fs::metadata(&self.inner.file_path)?.len() as usize;
        let file_len = NonZeroUsize::new(file_len)
            .ok_or_else(|| Error::generic("Database file is empty, nothing to map"))?;

        let stale = slot.as_ref().map_or(true, |m| m.len != file_len.get());
        if stale {
            let relock = slot.as_ref().is_some_and(|m| m.locked);
            *slot = None;
            let mut fresh = FileMap::map(&self.inner.file_path, file_len)?;
            if relock {
                fresh
                    .lock()
                    .map_err(|e| Error::generic(format!("mlock failed: {}", e)))?;
            }
            *slot = Some(fresh);
        }

        match slot.as_mut() {
            Some(map) => f(map),
            None => Err(Error::generic("Database file is not mapped")),
        }
    }

    /// Apply access-pattern advice to the whole mapping.
    #[cfg(unix)]
    pub fn madvise(&self, advice: Advice) -> Result<()> {
        let flag = match advice {
            Advice::Normal => libc::MADV_NORMAL,
            Advice::Random => libc::MADV_RANDOM,
            Advice::Sequential => libc::MADV_SEQUENTIAL,
            Advice::WillNeed => libc::MADV_WILLNEED,
            Advice::DontNeed => libc::MADV_DONTNEED,
        };
        self.with_mapping(|map| {
            map.advise(0, map.len, flag)
                .map_err(|e| Error::generic(format!("madvise failed: {}", e)))
        })
    }

    /// Lock mapped pages in memory.
    ///
    /// `flags` is a combination of [`MLOCK_CURRENT`] and [`MLOCK_FUTURE`].
    /// Locking usually needs `CAP_IPC_LOCK` or a generous `RLIMIT_MEMLOCK`.
    #[cfg(unix)]
    pub fn mlock(&self, flags: u32) -> Result<()> {
        if flags & MLOCK_CURRENT != 0 {
            self.with_mapping(|map| {
                map.lock().map_err(|e| {
                    Error::generic(format!("mlock failed: {} (may need CAP_IPC_LOCK)", e))
                })
            })?;
        }

        if flags & MLOCK_FUTURE != 0 {
            let rc = unsafe { libc::mlockall(libc::MCL_FUTURE) };
            if rc != 0 {
                return Err(Error::generic(format!(
                    "mlockall(MCL_FUTURE) failed: {}",
                    io::Error::last_os_error()
                )));
            }
        }
        Ok(())
    }

    /// Unlock pages locked by [`Db::mlock`].
    #[cfg(unix)]
    pub fn munlock(&self) -> Result<()> {
        self.with_mapping(|map| {
            map.unlock()
                .map_err(|e| Error::generic(format!("munlock failed: {}", e)))
        })
    }

    /// Ask the kernel to read `length` bytes at `offset` ahead of use.
    ///
    /// The range is clamped to the mapping; an offset past its end is an
    /// `InvalidArg` error.
    #[cfg(unix)]
    pub fn prefetch(&self, offset: usize, length: usize) -> Result<()> {
        self.with_mapping(|map| {
            if offset >= map.len {
                return Err(Error::invalid_arg("Offset beyond map size"));
            }
            let page = page_size();
            let start = offset - offset % page;
            let end = offset.saturating_add(length).min(map.len);
            if end <= start {
                return Ok(());
            }
            map.advise(start, end - start, libc::MADV_WILLNEED)
                .map_err(|e| Error::generic(format!("madvise(MADV_WILLNEED) failed: {}", e)))
        })
    }

    /// Address and length of the current mapping.
    #[cfg(unix)]
    pub fn get_mapinfo(&self) -> Result<MapInfo> {
        let map_size = self.get_mapsize();
        self.with_mapping(|map| {
            Ok(MapInfo {
                addr: map.ptr.as_ptr() as usize,
                mapped_len: map.len,
                map_size,
            })
        })
    }

    #[cfg(not(unix))]
    pub fn madvise(&self, _advice: Advice) -> Result<()> {
        Err(Error::unsupported("Memory advice not supported on this platform"))
    }

    #[cfg(not(unix))]
    pub fn mlock(&self, _flags: u32) -> Result<()> {
        Err(Error::unsupported("Memory locking not supported on this platform"))
    }

    #[cfg(not(unix))]
    pub fn munlock(&self) -> Result<()> {
        Err(Error::unsupported("Memory unlocking not supported on this platform"))
    }

    #[cfg(not(unix))]
    pub fn prefetch(&self, _offset: usize, _length: usize) -> Result<()> {
        Err(Error::unsupported("Prefetch not supported on this platform"))
    }

    #[cfg(not(unix))]
    pub fn get_mapinfo(&self) -> Result<MapInfo> {
        Err(Error::unsupported("Memory map info not supported on this platform"))
    }
}
