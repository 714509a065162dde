//! pthread backend.
//!
//! Both primitives are boxed so the native object never moves after
//! `pthread_*_init`.

use std::cell::UnsafeCell;
use std::io;
use std::mem;
use std::time::Duration;

use crate::error::{Error, Result};

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

pub(crate) struct RawMutex {
    inner: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    pub(crate) fn new() -> Result<Self> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let res = unsafe { libc::pthread_mutex_init(inner.get(), std::ptr::null()) };
        if res != 0 {
            return Err(Error::init("mutex", io::Error::from_raw_os_error(res)));
        }
        Ok(RawMutex { inner })
    }

    /// # Safety
    /// Must not already be held by the calling thread.
    pub(crate) unsafe fn lock(&self) {
        let res = libc::pthread_mutex_lock(self.inner.get());
        debug_assert_eq!(res, 0, "pthread_mutex_lock");
    }

    /// # Safety
    /// Must be held by the calling thread.
    pub(crate) unsafe fn unlock(&self) {
        let res = libc::pthread_mutex_unlock(self.inner.get());
        debug_assert_eq!(res, 0, "pthread_mutex_unlock");
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        let res = unsafe { libc::pthread_mutex_destroy(self.inner.get()) };
        if res != 0 {
            tracing::warn!(code = res, "pthread_mutex_destroy failed");
        }
    }
}

pub(crate) struct RawCondvar {
    inner: Box<UnsafeCell<libc::pthread_cond_t>>,
}

unsafe impl Send for RawCondvar {}
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    pub(crate) fn new() -> Result<Self> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        unsafe {
            let mut attr: libc::pthread_condattr_t = mem::zeroed();
            let res = libc::pthread_condattr_init(&mut attr);
            if res != 0 {
                return Err(Error::init("condition variable", io::Error::from_raw_os_error(res)));
            }
            #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
            {
                let res = libc::pthread_condattr_setclock(&mut attr, WAIT_CLOCK);
                if res != 0 {
                    libc::pthread_condattr_destroy(&mut attr);
                    return Err(Error::init("condition variable", io::Error::from_raw_os_error(res)));
                }
            }
            let res = libc::pthread_cond_init(inner.get(), &attr);
            libc::pthread_condattr_destroy(&mut attr);
            if res != 0 {
                return Err(Error::init("condition variable", io::Error::from_raw_os_error(res)));
            }
        }
        Ok(RawCondvar { inner })
    }

    /// # Safety
    /// `mutex` must be held by the calling thread.
    pub(crate) unsafe fn wait(&self, mutex: &RawMutex) -> Result<()> {
        let res = libc::pthread_cond_wait(self.inner.get(), mutex.inner.get());
        if res != 0 {
            return Err(Error::from_code("pthread_cond_wait", res));
        }
        Ok(())
    }

    /// Returns `true` when the wait timed out.
    ///
    /// # Safety
    /// `mutex` must be held by the calling thread.
    pub(crate) unsafe fn wait_timeout(&self, mutex: &RawMutex, timeout: Duration) -> Result<bool> {
        let deadline = deadline_after(timeout);
        match libc::pthread_cond_timedwait(self.inner.get(), mutex.inner.get(), &deadline) {
            0 => Ok(false),
            libc::ETIMEDOUT => Ok(true),
            res => Err(Error::from_code("pthread_cond_timedwait", res)),
        }
    }

    pub(crate) fn signal(&self) -> Result<()> {
        let res = unsafe { libc::pthread_cond_signal(self.inner.get()) };
        if res != 0 {
            return Err(Error::from_code("pthread_cond_signal", res));
        }
        Ok(())
    }

    pub(crate) fn broadcast(&self) -> Result<()> {
        let res = unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
        if res != 0 {
            return Err(Error::from_code("pthread_cond_broadcast", res));
        }
        Ok(())
    }
}

impl Drop for RawCondvar {
    fn drop(&mut self) {
        let res = unsafe { libc::pthread_cond_destroy(self.inner.get()) };
        if res != 0 {
            tracing::warn!(code = res, "pthread_cond_destroy failed");
        }
    }
}

/// Absolute `WAIT_CLOCK` time `timeout` from now, saturating.
fn deadline_after(timeout: Duration) -> libc::timespec {
    let mut now: libc::timespec = unsafe { mem::zeroed() };
    unsafe { libc::clock_gettime(WAIT_CLOCK, &mut now) };

    let add_secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
    let mut secs = (now.tv_sec as i64).saturating_add(add_secs);
    let mut nsec = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        secs = secs.saturating_add(1);
    }

    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    ts.tv_sec = secs.min(libc::time_t::MAX as i64) as libc::time_t;
    ts.tv_nsec = nsec as _;
    ts
}
