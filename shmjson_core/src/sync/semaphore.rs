// Named cross-process counting semaphore keyed by a 32-bit numeric key

use std::ffi::CString;
use std::io;
use std::time::Duration;

use crate::error::{ShmJsonError, ShmJsonResult};
use crate::memory::platform::semaphore_name;

/// A POSIX named semaphore shared by every process that derives the same
/// numeric key.
///
/// The token count is an OS-level property of the name: the `initial`
/// count only takes effect for the process that first creates the name,
/// and a process that exits while holding a token leaves the count
/// decremented until someone calls [`leave`](Self::leave) or
/// [`destroy`](Self::destroy) removes the name.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
    key: u32,
}

unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create or open the semaphore for `key` with `initial` tokens.
    pub fn create(key: u32, initial: u32) -> ShmJsonResult<Self> {
        let name = CString::new(semaphore_name(key))
            .map_err(|e| ShmJsonError::semaphore(format!("bad semaphore name: {}", e)))?;

        let sem = unsafe {
            libc::sem_open(
                name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(ShmJsonError::semaphore(format!(
                "sem_open 0x{:08x}: {}",
                key,
                io::Error::last_os_error()
            )));
        }

        log::debug!("semaphore 0x{:08x} opened", key);
        Ok(Self { sem, name, key })
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    /// Block until a token is available. The returned guard releases the
    /// token when dropped, on every exit path.
    pub fn enter(&self) -> ShmJsonResult<SemGuard<'_>> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(SemGuard { sema: self });
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(ShmJsonError::semaphore(format!(
                "sem_wait 0x{:08x}: {}",
                self.key, err
            )));
        }
    }

    /// Bounded wait for a token. `Ok(None)` means the timeout elapsed.
    pub fn try_enter(&self, timeout: Duration) -> ShmJsonResult<Option<SemGuard<'_>>> {
        #[cfg(target_os = "linux")]
        {
            let mut now = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
                return Err(ShmJsonError::semaphore(format!(
                    "clock_gettime: {}",
                    io::Error::last_os_error()
                )));
            }
            let mut deadline = libc::timespec {
                tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t,
                tv_nsec: now.tv_nsec + timeout.subsec_nanos() as libc::c_long,
            };
            if deadline.tv_nsec >= 1_000_000_000 {
                deadline.tv_sec += 1;
                deadline.tv_nsec -= 1_000_000_000;
            }

            loop {
                if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                    return Ok(Some(SemGuard { sema: self }));
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::ETIMEDOUT) => return Ok(None),
                    _ => {
                        return Err(ShmJsonError::semaphore(format!(
                            "sem_timedwait 0x{:08x}: {}",
                            self.key, err
                        )))
                    }
                }
            }
        }

        // No sem_timedwait outside Linux; poll with a short sleep.
        #[cfg(not(target_os = "linux"))]
        {
            let deadline = std::time::Instant::now() + timeout;
            loop {
                if unsafe { libc::sem_trywait(self.sem) } == 0 {
                    return Ok(Some(SemGuard { sema: self }));
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => {
                        if std::time::Instant::now() >= deadline {
                            return Ok(None);
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    _ => {
                        return Err(ShmJsonError::semaphore(format!(
                            "sem_trywait 0x{:08x}: {}",
                            self.key, err
                        )))
                    }
                }
            }
        }
    }

    /// Release a token without going through a guard. Only for callers
    /// pairing this manually with a guard they dismantled.
    pub fn leave(&self) -> ShmJsonResult<()> {
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(ShmJsonError::semaphore(format!(
                "sem_post 0x{:08x}: {}",
                self.key,
                io::Error::last_os_error()
            )))
        }
    }

    /// Remove the name from the system. Processes that already hold the
    /// semaphore keep their handle; new `create` calls start fresh.
    pub fn destroy(self) -> ShmJsonResult<()> {
        let rc = unsafe { libc::sem_unlink(self.name.as_ptr()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // already unlinked by another process is fine
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(ShmJsonError::semaphore(format!(
                    "sem_unlink 0x{:08x}: {}",
                    self.key, err
                )));
            }
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Scoped token: releases on drop, including error paths.
pub struct SemGuard<'a> {
    sema: &'a NamedSemaphore,
}

impl Drop for SemGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::sem_post(self.sema.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_key(salt: u32) -> u32 {
        std::process::id().wrapping_mul(2654435761).wrapping_add(0x5e5e_0000 + salt)
    }

    #[test]
    fn test_enter_releases_on_drop() {
        let sema = NamedSemaphore::create(test_key(1), 1).unwrap();
        {
            let _guard = sema.enter().unwrap();
            // token held: a bounded wait must time out
            assert!(sema.try_enter(Duration::from_millis(20)).unwrap().is_none());
        }
        // guard dropped: token is back
        let again = sema.try_enter(Duration::from_millis(20)).unwrap();
        assert!(again.is_some());
        drop(again);
        sema.destroy().unwrap();
    }

    #[test]
    fn test_leave_adds_token() {
        let sema = NamedSemaphore::create(test_key(2), 0).unwrap();
        assert!(sema.try_enter(Duration::from_millis(10)).unwrap().is_none());
        sema.leave().unwrap();
        let guard = sema.try_enter(Duration::from_millis(100)).unwrap();
        assert!(guard.is_some());
        drop(guard);
        sema.destroy().unwrap();
    }

    #[test]
    fn test_serializes_threads() {
        let key = test_key(3);
        let sema = Arc::new(NamedSemaphore::create(key, 1).unwrap());
        let shared = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sema = Arc::clone(&sema);
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let _guard = sema.enter().unwrap();
                    let v = shared.load(std::sync::atomic::Ordering::SeqCst);
                    std::hint::spin_loop();
                    shared.store(v + 1, std::sync::atomic::Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.load(std::sync::atomic::Ordering::SeqCst), 200);

        match Arc::try_unwrap(sema) {
            Ok(s) => s.destroy().unwrap(),
            Err(_) => panic!("semaphore still shared"),
        }
    }

    #[test]
    fn test_destroy_resets_name() {
        let key = test_key(4);
        let sema = NamedSemaphore::create(key, 0).unwrap();
        sema.destroy().unwrap();
        // a fresh create starts with the requested count again
        let sema = NamedSemaphore::create(key, 1).unwrap();
        assert!(sema.try_enter(Duration::from_millis(20)).unwrap().is_some());
        sema.destroy().unwrap();
    }
}
