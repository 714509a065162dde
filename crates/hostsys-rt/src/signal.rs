//! Process-wide signal bridge.
//!
//! The bridge owns the installed handlers and a fixed table of pipe write
//! ends, one per attached event queue. The handler writes the signal number
//! as one byte into every attached pipe, which turns an asynchronous signal
//! into ordinary readability on each queue's pipe read end.
//!
//! The table is a fixed array of atomics because the handler may only touch
//! async-signal-safe state: no locks, no allocation.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Queues that can be attached at once.
pub const MAX_ATTACHED: usize = 64;

/// The signals the bridge forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Hangup,
    Interrupt,
    Quit,
    Terminate,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::Hangup,
        Signal::Interrupt,
        Signal::Quit,
        Signal::Terminate,
    ];

    pub fn as_raw(self) -> i32 {
        match self {
            Signal::Hangup => libc::SIGHUP,
            Signal::Interrupt => libc::SIGINT,
            Signal::Quit => libc::SIGQUIT,
            Signal::Terminate => libc::SIGTERM,
        }
    }

    pub fn from_raw(signum: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_raw() == signum)
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Hangup => "HUP",
            Signal::Interrupt => "INT",
            Signal::Quit => "QUIT",
            Signal::Terminate => "TERM",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();
        let name = name.strip_prefix("SIG").unwrap_or(&name);
        Self::ALL
            .into_iter()
            .find(|sig| sig.name() == name)
            .ok_or_else(|| format!("unknown signal '{}' (expected HUP, INT, QUIT or TERM)", s))
    }
}

pub struct SignalBridge {
    pipes: [AtomicI32; MAX_ATTACHED],
    /// Deliveries between loading a pipe fd and finishing the write.
    in_flight: AtomicUsize,
    /// Dispositions replaced by `install`, restored by `restore`.
    previous: Mutex<HashMap<i32, libc::sigaction>>,
}

static BRIDGE: OnceLock<SignalBridge> = OnceLock::new();

/// The process-wide bridge. `SIGPIPE` is ignored from its creation on, so
/// writes to closed descriptors report `EPIPE` instead of killing the host.
pub fn bridge() -> &'static SignalBridge {
    BRIDGE.get_or_init(|| {
        unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
        SignalBridge {
            pipes: std::array::from_fn(|_| AtomicI32::new(-1)),
            in_flight: AtomicUsize::new(0),
            previous: Mutex::new(HashMap::new()),
        }
    })
}

impl SignalBridge {
    /// Route `signal` through the bridge. Idempotent.
    pub fn install(&self, signal: Signal) -> Result<()> {
        let signum = signal.as_raw();
        let mut previous = self.previous.lock();
        if previous.contains_key(&signum) {
            return Ok(());
        }

        let handler: extern "C" fn(libc::c_int) = on_signal;
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = 0;
        let mut old: libc::sigaction = unsafe { mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signum, &action, &mut old) != 0 {
                return Err(Error::last_os("sigaction"));
            }
        }
        previous.insert(signum, old);
        tracing::debug!(signal = %signal, "signal routed through bridge");
        Ok(())
    }

    /// Put back the disposition `install` replaced.
    pub fn restore(&self, signal: Signal) -> Result<()> {
        let signum = signal.as_raw();
        let mut previous = self.previous.lock();
        let Some(old) = previous.remove(&signum) else {
            return Ok(());
        };
        if unsafe { libc::sigaction(signum, &old, std::ptr::null_mut()) } != 0 {
            let err = Error::last_os("sigaction");
            previous.insert(signum, old);
            return Err(err);
        }
        tracing::debug!(signal = %signal, "signal disposition restored");
        Ok(())
    }

    pub fn is_installed(&self, signal: Signal) -> bool {
        self.previous.lock().contains_key(&signal.as_raw())
    }

    /// Write `signum` into every attached pipe. Async-signal-safe.
    pub fn deliver(&self, signum: i32) {
        let byte = signum as u8;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        for slot in &self.pipes {
            let fd = slot.load(Ordering::SeqCst);
            if fd >= 0 {
                // A full pipe drops the notification; nothing else to do here.
                unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn attach(&self, write_fd: RawFd) -> Result<usize> {
        self.pipes
            .iter()
            .position(|slot| {
                slot.compare_exchange(-1, write_fd, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .ok_or(Error::Capacity {
                fd: write_fd,
                limit: MAX_ATTACHED,
            })
    }

    /// Clear `slot`. On return no delivery can still write to the old fd,
    /// so the caller may close it.
    pub(crate) fn detach(&self, slot: usize) {
        self.pipes[slot].store(-1, Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
    }
}

extern "C" fn on_signal(signum: libc::c_int) {
    preserve_errno(|| {
        if let Some(bridge) = BRIDGE.get() {
            bridge.deliver(signum);
        }
    });
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn preserve_errno(f: impl FnOnce()) {
    let saved = unsafe { *libc::__errno_location() };
    f();
    unsafe { *libc::__errno_location() = saved };
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn preserve_errno(f: impl FnOnce()) {
    let saved = unsafe { *libc::__error() };
    f();
    unsafe { *libc::__error() = saved };
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
fn preserve_errno(f: impl FnOnce()) {
    f();
}

/// The descriptor pair a queue hands to the bridge.
pub(crate) struct SignalPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl SignalPipe {
    pub(crate) fn new() -> Result<Self> {
        let mut fds = [-1 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::init("signal pipe", io::Error::last_os_error()));
        }
        let pipe = unsafe {
            SignalPipe {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            }
        };
        for fd in [pipe.read_fd(), pipe.write_fd()] {
            set_nonblocking_cloexec(fd).map_err(|e| Error::init("signal pipe", e))?;
        }
        Ok(pipe)
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    pub(crate) fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }

    /// Read every queued signal number, oldest first.
    pub(crate) fn drain(&self, out: &mut Vec<i32>) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.read_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n > 0 {
                out.extend(buf[..n as usize].iter().map(|&b| i32::from(b)));
                continue;
            }
            if n == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(()),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(Error::os("read signal pipe", err)),
            }
        }
    }
}

pub(crate) fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd_flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if fd_flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
