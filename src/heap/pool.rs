//! Top-order pools: the mmap'd (or file-backed) regions the buddy allocator
//! carves blocks out of (spec §4.1).

use std::ffi::CString;
use std::path::PathBuf;

use crate::error::{RayError, Result};

/// A single top-order region. Either anonymous memory or a file mapped
/// shared from the configured swap directory.
pub struct Pool {
    pub base: *mut u8,
    pub order: u32,
    pub len: usize,
    backing: Backing,
}

enum Backing {
    Anon,
    File { path: PathBuf, fd: libc::c_int },
}

unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Try anonymous mmap first; fall back to a randomly named file in
    /// `swap_dir` on failure (spec §4.1).
    pub fn allocate(order: u32, swap_dir: &std::path::Path) -> Result<Pool> {
        let len = 1usize << order;
        match Self::mmap_anon(len) {
            Some(base) => {
                tracing::debug!(order, len, "heap: mapped anonymous pool");
                Ok(Pool { base, order, len, backing: Backing::Anon })
            }
            None => {
                tracing::warn!(order, len, "heap: anonymous mmap failed, falling back to swap file");
                Self::mmap_file(order, len, swap_dir)
            }
        }
    }

    fn mmap_anon(len: usize) -> Option<*mut u8> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED { None } else { Some(ptr as *mut u8) }
    }

    fn mmap_file(order: u32, len: usize, swap_dir: &std::path::Path) -> Result<Pool> {
        let name = format!("rayforce-heap-{:x}-{order}", random_suffix());
        let path = swap_dir.join(name);
        let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned())
            .map_err(|_| RayError::Os(libc::EINVAL))?;

        let fd = unsafe {
            libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CREAT | libc::O_EXCL, 0o600)
        };
        if fd < 0 {
            return Err(RayError::Os(unsafe { *libc::__errno_location() }));
        }
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let errno = unsafe { *libc::__errno_location() };
            unsafe {
                libc::close(fd);
                libc::unlink(c_path.as_ptr());
            }
            return Err(RayError::Os(errno));
        }
        let ptr = unsafe {
            libc::mmap(std::ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
        };
        if ptr == libc::MAP_FAILED {
            let errno = unsafe { *libc::__errno_location() };
            unsafe {
                libc::close(fd);
                libc::unlink(c_path.as_ptr());
            }
            return Err(RayError::Os(errno));
        }
        tracing::info!(path = %path.display(), len, "heap: mapped file-backed swap pool");
        Ok(Pool { base: ptr as *mut u8, order, len, backing: Backing::File { path, fd } })
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::File { .. })
    }

    /// Unmap (and, for file-backed pools, close + unlink) this pool.
    /// Ownership of the backing file follows the pool's lifetime, per spec.
    pub fn release(self) {
        unsafe { libc::munmap(self.base as *mut libc::c_void, self.len) };
        if let Backing::File { path, fd } = self.backing {
            unsafe {
                libc::close(fd);
                let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned());
                if let Ok(c_path) = c_path {
                    libc::unlink(c_path.as_ptr());
                }
            }
        }
    }
}

fn random_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}
