//! Portable mutex, condition variable and auto-reset event.
//!
//! The native objects live in `unix.rs` (pthreads) or `fallback.rs`
//! (`parking_lot`). Everything above them is written against the same
//! small raw interface, so the contracts are identical on both backends:
//!
//! - `Condvar` waits atomically release the mutex and re-acquire it before
//!   returning, on every path.
//! - Every wait in this crate loops on an explicit predicate
//!   ([`Condvar::wait_while`]), so spurious or missed wakeups only cost a
//!   re-check.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as imp;

#[cfg(not(unix))]
mod fallback;
#[cfg(not(unix))]
use fallback as imp;

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::host_lock::{HostLock, HostYield};

/// How long a wait may block. Millisecond granularity, as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Infinite,
    Millis(u64),
}

impl Timeout {
    pub fn from_millis(ms: u64) -> Self {
        Timeout::Millis(ms)
    }

    /// Host convention: a negative value means "wait forever".
    pub fn from_host_millis(ms: i64) -> Self {
        u64::try_from(ms).map_or(Timeout::Infinite, Timeout::Millis)
    }

    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }

    fn deadline(self) -> Option<Instant> {
        self.as_duration().map(|d| Instant::now() + d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(value: Option<Duration>) -> Self {
        match value {
            None => Timeout::Infinite,
            Some(d) => Timeout::Millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Some(value).into()
    }
}

/// Outcome of a wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

impl WaitStatus {
    pub fn timed_out(self) -> bool {
        self == WaitStatus::TimedOut
    }
}

// ── Mutex ───────────────────────────────────────────────────────────

/// A non-reentrant native mutex guarding `T`.
pub struct Mutex<T> {
    raw: imp::RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Result<Self> {
        let raw = imp::RawMutex::new().inspect_err(|err| {
            tracing::warn!(%err, "mutex creation failed");
        })?;
        Ok(Mutex {
            raw,
            data: UnsafeCell::new(value),
        })
    }

    /// Block until the lock is held. Locking twice from one thread deadlocks.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        unsafe { self.raw.lock() };
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").finish_non_exhaustive()
    }
}

/// Holds the mutex until dropped.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { self.mutex.raw.unlock() };
    }
}

// ── Condvar ─────────────────────────────────────────────────────────

/// A native condition variable. Pair it with one `Mutex` for its lifetime.
pub struct Condvar {
    raw: imp::RawCondvar,
}

impl Condvar {
    pub fn new() -> Result<Self> {
        let raw = imp::RawCondvar::new().inspect_err(|err| {
            tracing::warn!(%err, "condition variable creation failed");
        })?;
        Ok(Condvar { raw })
    }

    /// Release the guard's mutex, block until signaled or `timeout`, and
    /// re-acquire it. A single call may return `Signaled` spuriously.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>, timeout: Timeout) -> Result<WaitStatus> {
        let mutex = &guard.mutex.raw;
        match timeout.as_duration() {
            None => {
                unsafe { self.raw.wait(mutex)? };
                Ok(WaitStatus::Signaled)
            }
            Some(d) => {
                let timed_out = unsafe { self.raw.wait_timeout(mutex, d)? };
                Ok(if timed_out {
                    WaitStatus::TimedOut
                } else {
                    WaitStatus::Signaled
                })
            }
        }
    }

    /// Wait while `condition` holds. Returns `TimedOut` only if the
    /// condition still holds when the deadline passes.
    pub fn wait_while<T, F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Timeout,
        mut condition: F,
    ) -> Result<WaitStatus>
    where
        F: FnMut(&mut T) -> bool,
    {
        let deadline = timeout.deadline();
        while condition(&mut **guard) {
            let remaining = match deadline {
                None => Timeout::Infinite,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(WaitStatus::TimedOut);
                    }
                    // Round up so a sub-millisecond remainder still blocks.
                    Timeout::Millis(left.as_micros().div_ceil(1000) as u64)
                }
            };
            if self.wait(guard, remaining)?.timed_out() && condition(&mut **guard) {
                return Ok(WaitStatus::TimedOut);
            }
        }
        Ok(WaitStatus::Signaled)
    }

    /// Wake one waiter.
    pub fn signal(&self) -> Result<()> {
        self.raw.signal()
    }

    /// Wake every waiter.
    pub fn broadcast(&self) -> Result<()> {
        self.raw.broadcast()
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar").finish_non_exhaustive()
    }
}

// ── Event ───────────────────────────────────────────────────────────

/// Auto-reset event: a signal lets exactly one waiter through and the
/// event returns to non-signaled.
///
/// The `signaled` flag is checked under the event's own mutex, so a signal
/// that arrives before anyone waits is kept for the next waiter instead of
/// being lost.
#[derive(Debug)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Result<Self> {
        Ok(Event {
            signaled: Mutex::new(false)?,
            cond: Condvar::new()?,
        })
    }

    pub fn signal(&self) -> Result<()> {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.signal()
    }

    pub fn wait(&self, timeout: Timeout) -> Result<WaitStatus> {
        let mut signaled = self.signaled.lock();
        let status = self.cond.wait_while(&mut signaled, timeout, |s| !*s)?;
        if status == WaitStatus::Signaled {
            *signaled = false;
        }
        Ok(status)
    }

    /// Like [`wait`](Self::wait), with the host execution lock released for
    /// the duration of the block. The host lock is held again on return,
    /// whatever the outcome.
    pub fn wait_with_host_yield(&self, host: &dyn HostLock, timeout: Timeout) -> Result<WaitStatus> {
        let _yield = HostYield::new(host);
        self.wait(timeout)
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }
}
