//! C ABI exports for hostsys-rt.
//!
//! All functions are `#[no_mangle] pub extern "C"` and use only FFI-safe
//! types. Resources are addressed by opaque `u64` handles (`0` = none).
//!
//! Status convention: `0` ok, `1` timed out, negative on failure (see
//! [`crate::error::status`]). After a failure, `hostsys_last_error` and
//! `hostsys_last_error_message` describe it on the calling thread.

use std::cell::RefCell;
use std::ffi::{c_char, c_void};
use std::slice;
use std::sync::Arc;

use crate::channel::{Channel, ChannelConfig};
use crate::error::{status, Error, Result, UsageError};
use crate::host_lock::CallbackHostLock;
use crate::resource::{registry, Blob, Resource};
use crate::sync::{Event, Timeout, WaitStatus};

/// A borrowed byte blob supplied by the host.
#[repr(C)]
pub struct HostBlob {
    pub ptr: *const u8,
    pub len: usize,
}

/// Receives the values of one message, in order. The bytes are only valid
/// for the duration of the call.
pub type BlobSink = extern "C" fn(ctx: *mut c_void, index: usize, ptr: *const u8, len: usize);

struct LastError {
    code: i32,
    message: String,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Record `err` for this thread and return its status code.
fn fail(err: Error) -> i32 {
    let status = err.status();
    let code = err.raw_os_error().unwrap_or(0);
    tracing::debug!(%err, status, code, "ffi call failed");
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(LastError {
            code,
            message: err.to_string(),
        })
    });
    status
}

fn to_status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => status::OK,
        Err(err) => fail(err),
    }
}

fn wait_status(result: Result<WaitStatus>) -> i32 {
    match result {
        Ok(WaitStatus::Signaled) => status::OK,
        Ok(WaitStatus::TimedOut) => status::TIMED_OUT,
        Err(err) => fail(err),
    }
}

/// Host convention for marks: negative means unbounded.
fn mark_from_host(mark: i64) -> Option<usize> {
    usize::try_from(mark).ok()
}

fn mark_to_host(mark: Option<usize>) -> i64 {
    mark.map_or(-1, |m| i64::try_from(m).unwrap_or(i64::MAX))
}

// ── Errors and setup ────────────────────────────────────────────────

/// Raw OS error code of this thread's last failure, 0 if none or not OS.
#[no_mangle]
pub extern "C" fn hostsys_last_error() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |e| e.code))
}

/// Copy this thread's last error message (NUL-terminated, truncated to
/// `cap`) into `buf`. Returns the full message length.
#[no_mangle]
pub extern "C" fn hostsys_last_error_message(buf: *mut c_char, cap: usize) -> usize {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let message = slot.as_ref().map_or("", |e| e.message.as_str());
        if !buf.is_null() && cap > 0 {
            let n = message.len().min(cap - 1);
            unsafe {
                std::ptr::copy_nonoverlapping(message.as_ptr(), buf as *mut u8, n);
                *buf.add(n) = 0;
            }
        }
        message.len()
    })
}

#[no_mangle]
pub extern "C" fn hostsys_init_logging() {
    crate::logging::init();
}

/// Install the host's execution-lock callbacks. Resources created after
/// this call release the lock (`leave`) around every blocking wait and take
/// it back (`enter`) afterwards.
#[no_mangle]
pub extern "C" fn hostsys_set_host_lock(enter: extern "C" fn(), leave: extern "C" fn()) {
    registry().set_host_lock(Arc::new(CallbackHostLock { enter, leave }));
}

/// Destroy any resource. Returns 0 or a usage error for unknown handles.
#[no_mangle]
pub extern "C" fn hostsys_free(handle: u64) -> i32 {
    to_status(registry().remove(handle).map(drop))
}

// ── Channel ─────────────────────────────────────────────────────────

/// Create a channel. `high_water_mark < 0` means unbounded. Returns 0 on failure.
#[no_mangle]
pub extern "C" fn hostsys_channel_new(high_water_mark: i64) -> u64 {
    let config = ChannelConfig {
        high_water_mark: mark_from_host(high_water_mark),
        ..Default::default()
    };
    match Channel::with_config(config, registry().host_lock()) {
        Ok(chan) => registry().insert(Resource::Channel(Arc::new(chan))),
        Err(err) => {
            fail(err);
            0
        }
    }
}

/// Put one message of `count` values. Blocks on backpressure.
#[no_mangle]
pub extern "C" fn hostsys_channel_put(handle: u64, parts: *const HostBlob, count: usize) -> i32 {
    let chan = match registry().channel(handle) {
        Ok(chan) => chan,
        Err(err) => return fail(err),
    };
    if parts.is_null() || count == 0 {
        return fail(UsageError::EmptyMessage.into());
    }
    let parts = unsafe { slice::from_raw_parts(parts, count) };
    let values: Option<Vec<Blob>> = parts
        .iter()
        .map(|blob| match (blob.ptr.is_null(), blob.len) {
            (_, 0) => Some(Blob::default()),
            (true, _) => None,
            (false, len) => Some(Blob::from(unsafe { slice::from_raw_parts(blob.ptr, len) })),
        })
        .collect();
    match values {
        Some(values) => to_status(chan.put(values)),
        None => fail(UsageError::InvalidArgument.into()),
    }
}

/// Get one message, handing each value to `sink`. `timeout_ms < 0` waits
/// forever. Returns 0, 1 (timed out) or a negative status.
#[no_mangle]
pub extern "C" fn hostsys_channel_get(
    handle: u64,
    timeout_ms: i64,
    sink: BlobSink,
    ctx: *mut c_void,
) -> i32 {
    let chan = match registry().channel(handle) {
        Ok(chan) => chan,
        Err(err) => return fail(err),
    };
    match chan.get(Timeout::from_host_millis(timeout_ms)) {
        Ok(Some(values)) => {
            for (index, value) in values.iter().enumerate() {
                sink(ctx, index, value.as_ptr(), value.len());
            }
            status::OK
        }
        Ok(None) => status::TIMED_OUT,
        Err(err) => fail(err),
    }
}

/// Current high-water mark, -1 if unbounded.
#[no_mangle]
pub extern "C" fn hostsys_channel_max(handle: u64) -> i64 {
    match registry().channel(handle) {
        Ok(chan) => mark_to_host(chan.high_water_mark()),
        Err(err) => fail(err) as i64,
    }
}

/// Set the high-water mark (`< 0`: unbounded). Returns the previous one.
#[no_mangle]
pub extern "C" fn hostsys_channel_set_max(handle: u64, high_water_mark: i64) -> i64 {
    let result = registry()
        .channel(handle)
        .and_then(|chan| chan.set_high_water_mark(mark_from_host(high_water_mark)));
    match result {
        Ok(previous) => mark_to_host(previous),
        Err(err) => fail(err) as i64,
    }
}

/// Pending messages, or a negative status.
#[no_mangle]
pub extern "C" fn hostsys_channel_len(handle: u64) -> i64 {
    match registry().channel(handle) {
        Ok(chan) => chan.len() as i64,
        Err(err) => fail(err) as i64,
    }
}

// ── Event ───────────────────────────────────────────────────────────

#[no_mangle]
pub extern "C" fn hostsys_event_new() -> u64 {
    match Event::new() {
        Ok(ev) => registry().insert(Resource::Event(Arc::new(ev))),
        Err(err) => {
            fail(err);
            0
        }
    }
}

/// Wait with the host lock released. Returns 0, 1 (timed out) or a negative status.
#[no_mangle]
pub extern "C" fn hostsys_event_wait(handle: u64, timeout_ms: i64) -> i32 {
    let ev = match registry().event(handle) {
        Ok(ev) => ev,
        Err(err) => return fail(err),
    };
    let host = registry().host_lock();
    wait_status(ev.wait_with_host_yield(&*host, Timeout::from_host_millis(timeout_ms)))
}

#[no_mangle]
pub extern "C" fn hostsys_event_signal(handle: u64) -> i32 {
    to_status(registry().event(handle).and_then(|ev| ev.signal()))
}

// ── Event queue ─────────────────────────────────────────────────────

#[cfg(unix)]
pub use self::evq::*;

#[cfg(unix)]
mod evq {
    use std::ffi::c_void;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::{fail, to_status};
    use crate::error::{Result, UsageError};
    use crate::host_lock::{HostYield, NoHostLock};
    use crate::reactor::{BackendKind, EventQueue, Interest, ReactorConfig, ReadyEvent};
    use crate::resource::{registry, Resource};
    use crate::signal::{self, Signal};

    pub const EVQ_READY: u8 = 0;
    pub const EVQ_TIMEOUT: u8 = 1;
    pub const EVQ_SIGNAL: u8 = 2;

    /// Receives one event: `kind` is `EVQ_*`, `fd` is -1 for signals, and
    /// `data` holds readiness flags (bit 0 read, bit 1 write) or the signal number.
    pub type EventSink = extern "C" fn(ctx: *mut c_void, kind: u8, fd: i32, data: i32);

    /// Create an event queue. `backend`: 0 select, 1 polling. Returns 0 on failure.
    ///
    /// The queue itself never touches the host lock; the exports below
    /// release it around the whole call instead.
    #[no_mangle]
    pub extern "C" fn hostsys_evq_new(backend: u8) -> u64 {
        let Some(backend) = BackendKind::from_raw(backend) else {
            fail(UsageError::InvalidArgument.into());
            return 0;
        };
        match EventQueue::with_config(ReactorConfig { backend }, Arc::new(NoHostLock)) {
            Ok(evq) => registry().insert(Resource::EventQueue(Arc::new(Mutex::new(evq)))),
            Err(err) => {
                fail(err);
                0
            }
        }
    }

    /// Run `f` on the queue with the host lock released.
    ///
    /// Lock order is host lock, then queue mutex: the host lock is given up
    /// before the mutex is taken and taken back only after the mutex is
    /// dropped, so a host thread never waits on the mutex while holding it.
    fn with_queue<T>(handle: u64, f: impl FnOnce(&mut EventQueue) -> Result<T>) -> Result<T> {
        let evq = registry().event_queue(handle)?;
        let host = registry().host_lock();
        let _yield = HostYield::new(&*host);
        let mut queue = evq.lock();
        f(&mut queue)
    }

    /// Watch `fd`. `flags`: bit 0 readable, bit 1 writable. `timeout_ms < 0`: none.
    #[no_mangle]
    pub extern "C" fn hostsys_evq_add(handle: u64, fd: i32, flags: u8, timeout_ms: i64) -> i32 {
        let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        to_status(with_queue(handle, |q| {
            q.register(fd, Interest::from_bits(flags), timeout)
        }))
    }

    #[no_mangle]
    pub extern "C" fn hostsys_evq_del(handle: u64, fd: i32) -> i32 {
        to_status(with_queue(handle, |q| q.unregister(fd)))
    }

    /// Poll once and report every event to `sink`. `timeout_ms < 0` waits
    /// without bound. Returns the number of events or a negative status.
    /// `sink` runs with the host lock held again.
    #[no_mangle]
    pub extern "C" fn hostsys_evq_poll(
        handle: u64,
        timeout_ms: i64,
        sink: EventSink,
        ctx: *mut c_void,
    ) -> i32 {
        let max_wait = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        let events = match with_queue(handle, |q| q.poll(max_wait)) {
            Ok(events) => events,
            Err(err) => return fail(err),
        };
        for event in &events {
            let (kind, fd, data) = match *event {
                ReadyEvent::Ready {
                    fd,
                    readable,
                    writable,
                } => (EVQ_READY, fd, i32::from(readable) | i32::from(writable) << 1),
                ReadyEvent::TimedOut { fd } => (EVQ_TIMEOUT, fd, 0),
                ReadyEvent::SignalReceived { signal } => (EVQ_SIGNAL, -1, signal),
            };
            sink(ctx, kind, fd, data);
        }
        i32::try_from(events.len()).unwrap_or(i32::MAX)
    }

    /// Route one of HUP/INT/QUIT/TERM (by number) through the signal bridge.
    #[no_mangle]
    pub extern "C" fn hostsys_signal_install(signum: i32) -> i32 {
        match Signal::from_raw(signum) {
            Some(sig) => to_status(signal::bridge().install(sig)),
            None => fail(UsageError::InvalidArgument.into()),
        }
    }
}
