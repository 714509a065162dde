//! hostsys-rt: concurrency substrate for an embedding host.
//!
//! - [`sync`]: native mutex, condition variable and auto-reset event.
//! - [`channel`]: bounded MPMC message channel with producer backpressure.
//! - [`reactor`]: `select`/`polling` event queue with bridged OS signals.
//!
//! Every blocking call releases the host's execution lock around its native
//! wait (see [`host_lock`]). Hosts that bind through C use the exports in
//! `ffi.rs`, which address resources by opaque `u64` handles.

pub mod channel;
pub mod error;
pub mod host_lock;
pub mod logging;
pub mod resource;
pub mod sync;

#[cfg(unix)]
pub mod reactor;
#[cfg(unix)]
pub mod signal;

mod ffi;

pub use channel::{Channel, ChannelConfig};
pub use error::{Error, Result, UsageError};
pub use host_lock::{ExecutionLock, HostLock, HostYield, NoHostLock};
pub use sync::{Condvar, Event, Mutex, MutexGuard, Timeout, WaitStatus};

#[cfg(unix)]
pub use reactor::{BackendKind, Dispatched, EventQueue, Interest, ReactorConfig, ReadyEvent};
#[cfg(unix)]
pub use signal::{bridge as signal_bridge, Signal, SignalBridge};

/// Serializes tests that touch process-wide state: the signal bridge
/// delivers to every attached queue, and the FFI registry is global.
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
