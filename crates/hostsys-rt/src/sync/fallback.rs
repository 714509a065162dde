//! Portable backend over `parking_lot`, for targets without pthreads.
//!
//! Same contract as the pthread backend. `parking_lot` condition variables
//! queue waiters, so a signal is never lost once the waiter is parked.

use std::mem;
use std::time::Duration;

use parking_lot::lock_api::RawMutex as _;

use crate::error::Result;

pub(crate) struct RawMutex {
    inner: parking_lot::Mutex<()>,
}

impl RawMutex {
    pub(crate) fn new() -> Result<Self> {
        Ok(RawMutex {
            inner: parking_lot::Mutex::new(()),
        })
    }

    pub(crate) unsafe fn lock(&self) {
        self.inner.raw().lock();
    }

    pub(crate) unsafe fn unlock(&self) {
        self.inner.force_unlock();
    }
}

pub(crate) struct RawCondvar {
    inner: parking_lot::Condvar,
}

impl RawCondvar {
    pub(crate) fn new() -> Result<Self> {
        Ok(RawCondvar {
            inner: parking_lot::Condvar::new(),
        })
    }

    pub(crate) unsafe fn wait(&self, mutex: &RawMutex) -> Result<()> {
        let mut guard = mutex.inner.make_guard_unchecked();
        self.inner.wait(&mut guard);
        mem::forget(guard);
        Ok(())
    }

    pub(crate) unsafe fn wait_timeout(&self, mutex: &RawMutex, timeout: Duration) -> Result<bool> {
        let mut guard = mutex.inner.make_guard_unchecked();
        let timed_out = self.inner.wait_for(&mut guard, timeout).timed_out();
        mem::forget(guard);
        Ok(timed_out)
    }

    pub(crate) fn signal(&self) -> Result<()> {
        self.inner.notify_one();
        Ok(())
    }

    pub(crate) fn broadcast(&self) -> Result<()> {
        self.inner.notify_all();
        Ok(())
    }
}
