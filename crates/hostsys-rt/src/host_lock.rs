//! The host's execution lock.
//!
//! The embedding host only makes progress while holding one exclusive
//! lock. Every blocking call in this crate brackets its native wait with a
//! [`HostYield`], which releases that lock on construction and takes it back
//! on drop, so timeouts, errors and early returns all restore it.

use crate::error::Result;
use crate::sync::{Condvar, Mutex, Timeout};

/// A host-wide lock that blocking calls hand off around their waits.
pub trait HostLock: Send + Sync {
    /// Give the lock up before blocking.
    fn release(&self);
    /// Take the lock back. Must not fail.
    fn acquire(&self);
}

/// For hosts without an execution lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostLock;

impl HostLock for NoHostLock {
    fn release(&self) {}
    fn acquire(&self) {}
}

/// Releases the host lock for its lifetime.
#[must_use = "the host lock is re-acquired as soon as the guard is dropped"]
pub struct HostYield<'a> {
    host: &'a dyn HostLock,
}

impl<'a> HostYield<'a> {
    pub fn new(host: &'a dyn HostLock) -> Self {
        host.release();
        HostYield { host }
    }
}

impl Drop for HostYield<'_> {
    fn drop(&mut self) {
        self.host.acquire();
    }
}

/// A ready-made execution lock for hosts that do not bring their own.
///
/// Unlike a mutex guard, ownership is not tied to a scope: `enter` and
/// `leave` may be called from different stack frames of the same thread.
#[derive(Debug)]
pub struct ExecutionLock {
    held: Mutex<bool>,
    cond: Condvar,
}

impl ExecutionLock {
    pub fn new() -> Result<Self> {
        Ok(ExecutionLock {
            held: Mutex::new(false)?,
            cond: Condvar::new()?,
        })
    }

    pub fn enter(&self) {
        let mut held = self.held.lock();
        while *held {
            if let Err(err) = self.cond.wait_while(&mut held, Timeout::Infinite, |h| *h) {
                tracing::warn!(%err, "execution lock wait failed, retrying");
            }
        }
        *held = true;
    }

    pub fn leave(&self) {
        let mut held = self.held.lock();
        *held = false;
        drop(held);
        if let Err(err) = self.cond.signal() {
            tracing::warn!(%err, "execution lock signal failed");
        }
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

impl HostLock for ExecutionLock {
    fn release(&self) {
        self.leave();
    }

    fn acquire(&self) {
        self.enter();
    }
}

/// Host-supplied enter/leave callbacks, installed over the C ABI.
#[derive(Debug, Clone, Copy)]
pub struct CallbackHostLock {
    pub enter: extern "C" fn(),
    pub leave: extern "C" fn(),
}

impl HostLock for CallbackHostLock {
    fn release(&self) {
        (self.leave)();
    }

    fn acquire(&self) {
        (self.enter)();
    }
}
