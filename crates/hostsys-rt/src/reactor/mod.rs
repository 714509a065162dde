//! Readiness reactor: descriptors, per-registration timeouts and bridged
//! signals, multiplexed through one blocking wait.
//!
//! Each [`EventQueue`] owns a signal pipe whose write end is attached to the
//! process-wide [`SignalBridge`](crate::signal::SignalBridge) and whose read
//! end is registered with the queue's own backend. A caught signal therefore
//! shows up as plain readability and is reported as
//! [`ReadyEvent::SignalReceived`].
//!
//! A queue is driven by one thread at a time; it adds no locking of its own.

mod poller;
mod select;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::error::{Result, UsageError};
use crate::host_lock::{HostLock, HostYield, NoHostLock};
use crate::signal::{self, Signal, SignalPipe};

use self::poller::PollingBackend;
use self::select::SelectBackend;

/// Which readiness kinds a registration wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        readable: false,
        writable: false,
    };
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    /// Host flag encoding: bit 0 readable, bit 1 writable.
    pub fn from_bits(bits: u8) -> Self {
        Interest {
            readable: bits & 1 != 0,
            writable: bits & 2 != 0,
        }
    }
}

/// One thing `poll` observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyEvent {
    Ready {
        fd: RawFd,
        readable: bool,
        writable: bool,
    },
    /// The registration's timeout elapsed with no readiness.
    TimedOut { fd: RawFd },
    /// A bridged signal was caught. `signal` is the raw number (0-255).
    SignalReceived { signal: i32 },
}

impl ReadyEvent {
    pub fn fd(&self) -> Option<RawFd> {
        match *self {
            ReadyEvent::Ready { fd, .. } | ReadyEvent::TimedOut { fd } => Some(fd),
            ReadyEvent::SignalReceived { .. } => None,
        }
    }

    pub fn signal(&self) -> Option<Signal> {
        match *self {
            ReadyEvent::SignalReceived { signal } => Signal::from_raw(signal),
            _ => None,
        }
    }
}

/// Per-registration callback run by [`EventQueue::dispatch`].
pub type Handler = Box<dyn FnMut(&ReadyEvent) -> io::Result<()> + Send>;

/// Which multiplexing call backs the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// `select(2)`, bounded by `FD_SETSIZE`.
    #[default]
    Select,
    /// epoll/kqueue through the `polling` crate.
    Polling,
}

impl BackendKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(BackendKind::Select),
            1 => Some(BackendKind::Polling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReactorConfig {
    pub backend: BackendKind,
}

/// Raw readiness reported by a backend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Readiness {
    pub(crate) fd: RawFd,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

/// A multiplexing call and the descriptor sets it watches.
pub(crate) trait Backend: Send {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()>;
    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()>;
    fn delete(&mut self, fd: RawFd) -> Result<()>;
    /// Block up to `timeout` (`None`: forever) and append what is ready.
    /// Interrupted waits are retried internally.
    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> Result<()>;
    fn len(&self) -> usize;
}

struct Source {
    fd: RawFd,
    interest: Interest,
    /// Period of the registration timeout, re-armed after each event.
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    handler: Option<Handler>,
}

/// What one `dispatch` call saw and which handlers failed.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub events: Vec<ReadyEvent>,
    pub failures: Vec<(ReadyEvent, io::Error)>,
}

pub struct EventQueue {
    backend: Box<dyn Backend>,
    sources: Slab<Source>,
    by_fd: HashMap<RawFd, usize>,
    /// Pending timeouts ordered by (deadline, source key).
    timers: BTreeMap<(Instant, usize), ()>,
    signal_pipe: SignalPipe,
    bridge_slot: usize,
    signal_handler: Option<Handler>,
    host: Arc<dyn HostLock>,
    ready: Vec<Readiness>,
}

impl EventQueue {
    pub fn new() -> Result<Self> {
        Self::with_config(ReactorConfig::default(), Arc::new(NoHostLock))
    }

    pub fn with_config(config: ReactorConfig, host: Arc<dyn HostLock>) -> Result<Self> {
        let mut backend: Box<dyn Backend> = match config.backend {
            BackendKind::Select => Box::new(SelectBackend::new()),
            BackendKind::Polling => Box::new(PollingBackend::new()?),
        };
        let signal_pipe = SignalPipe::new()?;
        backend.add(signal_pipe.read_fd(), Interest::READABLE)?;
        let bridge_slot = signal::bridge().attach(signal_pipe.write_fd())?;
        tracing::debug!(backend = ?config.backend, pipe = signal_pipe.read_fd(), "event queue created");

        Ok(EventQueue {
            backend,
            sources: Slab::new(),
            by_fd: HashMap::new(),
            timers: BTreeMap::new(),
            signal_pipe,
            bridge_slot,
            signal_handler: None,
            host,
            ready: Vec::new(),
        })
    }

    /// Watch `fd`, or update an existing registration. With `timeout`, a
    /// `TimedOut` event is reported whenever that long passes without the
    /// descriptor becoming ready. The queue never closes `fd`.
    pub fn register(&mut self, fd: RawFd, interest: Interest, timeout: Option<Duration>) -> Result<()> {
        self.upsert(fd, interest, timeout, None)
    }

    /// [`register`](Self::register) with a callback for [`dispatch`](Self::dispatch).
    pub fn register_with<F>(
        &mut self,
        fd: RawFd,
        interest: Interest,
        timeout: Option<Duration>,
        handler: F,
    ) -> Result<()>
    where
        F: FnMut(&ReadyEvent) -> io::Result<()> + Send + 'static,
    {
        self.upsert(fd, interest, timeout, Some(Box::new(handler)))
    }

    fn upsert(
        &mut self,
        fd: RawFd,
        interest: Interest,
        timeout: Option<Duration>,
        handler: Option<Handler>,
    ) -> Result<()> {
        if fd == self.signal_pipe.read_fd() {
            return Err(UsageError::AlreadyRegistered.into());
        }

        let key = match self.by_fd.get(&fd) {
            Some(&key) => {
                self.backend.modify(fd, interest)?;
                let source = &mut self.sources[key];
                source.interest = interest;
                source.timeout = timeout;
                if handler.is_some() {
                    source.handler = handler;
                }
                key
            }
            None => {
                self.backend.add(fd, interest)?;
                let key = self.sources.insert(Source {
                    fd,
                    interest,
                    timeout,
                    deadline: None,
                    handler,
                });
                self.by_fd.insert(fd, key);
                key
            }
        };
        self.rearm(key, Instant::now());
        Ok(())
    }

    /// Change the interest and timeout of an existing registration.
    pub fn modify(&mut self, fd: RawFd, interest: Interest, timeout: Option<Duration>) -> Result<()> {
        if !self.by_fd.contains_key(&fd) {
            return Err(UsageError::NotRegistered.into());
        }
        self.upsert(fd, interest, timeout, None)
    }

    /// Stop watching `fd`. The descriptor itself is left open.
    pub fn unregister(&mut self, fd: RawFd) -> Result<()> {
        let key = self.by_fd.remove(&fd).ok_or(UsageError::NotRegistered)?;
        let source = self.sources.remove(key);
        if let Some(deadline) = source.deadline {
            self.timers.remove(&(deadline, key));
        }
        self.backend.delete(fd)
    }

    /// Callback for `SignalReceived` events during [`dispatch`](Self::dispatch).
    pub fn on_signal<F>(&mut self, handler: F)
    where
        F: FnMut(&ReadyEvent) -> io::Result<()> + Send + 'static,
    {
        self.signal_handler = Some(Box::new(handler));
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.by_fd.contains_key(&fd)
    }

    /// Registered descriptors, not counting the signal pipe.
    pub fn len(&self) -> usize {
        self.by_fd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fd.is_empty()
    }

    /// Replace the source's pending deadline with `now + timeout`.
    fn rearm(&mut self, key: usize, now: Instant) {
        let source = &mut self.sources[key];
        if let Some(old) = source.deadline.take() {
            self.timers.remove(&(old, key));
        }
        if let Some(timeout) = source.timeout {
            let deadline = now + timeout;
            source.deadline = Some(deadline);
            self.timers.insert((deadline, key), ());
        }
    }

    /// Block until a descriptor is ready, a registration times out, a
    /// signal arrives, or `max_wait` (`None`: no bound) passes.
    pub fn poll(&mut self, max_wait: Option<Duration>) -> Result<Vec<ReadyEvent>> {
        // Effective timeout: min(caller, nearest registration deadline).
        let next_timer = self
            .timers
            .keys()
            .next()
            .map(|&(deadline, _)| deadline.saturating_duration_since(Instant::now()));
        let timeout = match (max_wait, next_timer) {
            (None, None) => None,
            (Some(t), None) | (None, Some(t)) => Some(t),
            (Some(a), Some(b)) => Some(a.min(b)),
        };

        self.ready.clear();
        {
            let _yield = HostYield::new(&*self.host);
            self.backend.wait(timeout, &mut self.ready)?;
        }
        tracing::trace!(?timeout, ready = self.ready.len(), "poll returned");

        let now = Instant::now();
        let mut events = Vec::with_capacity(self.ready.len());
        let mut signals = Vec::new();
        let mut ready_keys = Vec::new();
        for i in 0..self.ready.len() {
            let Readiness {
                fd,
                readable,
                writable,
            } = self.ready[i];
            if fd == self.signal_pipe.read_fd() {
                // Keep collecting descriptor events even if the drain fails.
                if let Err(err) = self.signal_pipe.drain(&mut signals) {
                    tracing::warn!(%err, "failed to drain signal pipe");
                }
                continue;
            }
            let Some(&key) = self.by_fd.get(&fd) else {
                continue;
            };
            let interest = self.sources[key].interest;
            let readable = readable && interest.readable;
            let writable = writable && interest.writable;
            if readable || writable {
                events.push(ReadyEvent::Ready {
                    fd,
                    readable,
                    writable,
                });
                self.rearm(key, now);
                ready_keys.push(key);
            }
        }

        // Whatever is still due saw no readiness this round.
        let due: Vec<usize> = self
            .timers
            .range(..=(now, usize::MAX))
            .map(|(&(_, key), _)| key)
            .filter(|key| !ready_keys.contains(key))
            .collect();
        for key in due {
            let fd = self.sources[key].fd;
            events.push(ReadyEvent::TimedOut { fd });
            self.rearm(key, now);
        }

        events.extend(
            signals
                .into_iter()
                .map(|signal| ReadyEvent::SignalReceived { signal }),
        );
        Ok(events)
    }

    /// `poll`, then run the matching handlers. A failing handler does not
    /// stop the others; failures are returned alongside the events.
    pub fn dispatch(&mut self, max_wait: Option<Duration>) -> Result<Dispatched> {
        let events = self.poll(max_wait)?;
        let mut failures = Vec::new();
        for event in &events {
            let handler = match event.fd() {
                Some(fd) => self
                    .by_fd
                    .get(&fd)
                    .and_then(|&key| self.sources[key].handler.as_mut()),
                None => self.signal_handler.as_mut(),
            };
            if let Some(handler) = handler {
                if let Err(err) = (**handler)(event) {
                    tracing::warn!(?event, %err, "event handler failed");
                    failures.push((*event, err));
                }
            }
        }
        Ok(Dispatched { events, failures })
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        signal::bridge().detach(self.bridge_slot);
        let _ = self.backend.delete(self.signal_pipe.read_fd());
        for (_, source) in self.sources.iter() {
            let _ = self.backend.delete(source.fd);
        }
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("registered", &self.by_fd.len())
            .field("watched", &self.backend.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [-1; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn write_byte(fd: &OwnedFd) {
        let b = 1u8;
        assert_eq!(
            unsafe { libc::write(fd.as_raw_fd(), &b as *const u8 as *const libc::c_void, 1) },
            1
        );
    }

    fn queue(kind: BackendKind) -> EventQueue {
        EventQueue::with_config(ReactorConfig { backend: kind }, Arc::new(NoHostLock)).unwrap()
    }

    /// A backend may wake a hair before a registration deadline; poll again.
    fn poll_until_events(q: &mut EventQueue, max_wait: Duration) -> Vec<ReadyEvent> {
        let start = Instant::now();
        loop {
            let events = q.poll(Some(max_wait)).unwrap();
            if !events.is_empty() || start.elapsed() >= max_wait {
                return events;
            }
        }
    }

    fn both_backends(test: impl Fn(EventQueue)) {
        let _g = crate::test_lock();
        test(queue(BackendKind::Select));
        test(queue(BackendKind::Polling));
    }

    #[test]
    fn readable_descriptor_is_reported() {
        both_backends(|mut q| {
            let (r, w) = pipe();
            q.register(r.as_raw_fd(), Interest::READABLE, None).unwrap();
            write_byte(&w);

            let start = Instant::now();
            let events = q.poll(Some(Duration::from_millis(1000))).unwrap();
            assert!(start.elapsed() < Duration::from_millis(1000));
            assert_eq!(
                events,
                vec![ReadyEvent::Ready {
                    fd: r.as_raw_fd(),
                    readable: true,
                    writable: false
                }]
            );
            q.unregister(r.as_raw_fd()).unwrap();
        });
    }

    #[test]
    fn writable_interest_on_pipe_write_end() {
        both_backends(|mut q| {
            let (_r, w) = pipe();
            q.register(w.as_raw_fd(), Interest::WRITABLE, None).unwrap();
            let events = q.poll(Some(Duration::from_millis(500))).unwrap();
            assert_eq!(
                events,
                vec![ReadyEvent::Ready {
                    fd: w.as_raw_fd(),
                    readable: false,
                    writable: true
                }]
            );
        });
    }

    #[test]
    fn poll_times_out_with_nothing_ready() {
        both_backends(|mut q| {
            let (r, _w) = pipe();
            q.register(r.as_raw_fd(), Interest::READABLE, None).unwrap();
            let start = Instant::now();
            let events = q.poll(Some(Duration::from_millis(30))).unwrap();
            assert!(events.is_empty());
            assert!(start.elapsed() >= Duration::from_millis(25));
        });
    }

    #[test]
    fn registration_timeout_fires_and_rearms() {
        both_backends(|mut q| {
            let (r, _w) = pipe();
            q.register(r.as_raw_fd(), Interest::READABLE, Some(Duration::from_millis(20)))
                .unwrap();

            // Caller bound is longer: the registration deadline wins.
            let start = Instant::now();
            let events = poll_until_events(&mut q, Duration::from_secs(5));
            assert!(start.elapsed() >= Duration::from_millis(20));
            assert!(start.elapsed() < Duration::from_secs(1));
            assert_eq!(events, vec![ReadyEvent::TimedOut { fd: r.as_raw_fd() }]);

            // Re-armed: fires again.
            let events = poll_until_events(&mut q, Duration::from_secs(5));
            assert_eq!(events, vec![ReadyEvent::TimedOut { fd: r.as_raw_fd() }]);
        });
    }

    #[test]
    fn readiness_suppresses_timeout() {
        both_backends(|mut q| {
            let (r, w) = pipe();
            q.register(r.as_raw_fd(), Interest::READABLE, Some(Duration::from_millis(200)))
                .unwrap();
            write_byte(&w);
            let events = q.poll(Some(Duration::from_millis(500))).unwrap();
            assert_eq!(events.len(), 1);
            assert!(matches!(events[0], ReadyEvent::Ready { .. }));
        });
    }

    #[test]
    fn unregister_stops_reports_and_leaves_fd_open() {
        both_backends(|mut q| {
            let (r, w) = pipe();
            q.register(r.as_raw_fd(), Interest::READABLE, Some(Duration::from_millis(10)))
                .unwrap();
            q.unregister(r.as_raw_fd()).unwrap();
            assert!(!q.is_registered(r.as_raw_fd()));
            write_byte(&w);
            let events = q.poll(Some(Duration::from_millis(30))).unwrap();
            assert!(events.is_empty());
            // Still open: fcntl succeeds.
            assert!(unsafe { libc::fcntl(r.as_raw_fd(), libc::F_GETFD) } >= 0);
            assert!(q.unregister(r.as_raw_fd()).unwrap_err().is_usage());
        });
    }

    #[test]
    fn register_updates_existing_interest() {
        both_backends(|mut q| {
            let (r, w) = pipe();
            q.register(r.as_raw_fd(), Interest::WRITABLE, None).unwrap();
            write_byte(&w);
            assert!(q.poll(Some(Duration::from_millis(20))).unwrap().is_empty());
            q.register(r.as_raw_fd(), Interest::READABLE, None).unwrap();
            assert_eq!(q.len(), 1);
            assert_eq!(q.poll(Some(Duration::from_millis(500))).unwrap().len(), 1);

            q.modify(r.as_raw_fd(), Interest::NONE, None).unwrap();
            assert!(q.poll(Some(Duration::from_millis(20))).unwrap().is_empty());
            let (other, _w2) = pipe();
            assert!(q
                .modify(other.as_raw_fd(), Interest::READABLE, None)
                .unwrap_err()
                .is_usage());
        });
    }

    #[test]
    fn signal_pipe_cannot_be_registered() {
        let _g = crate::test_lock();
        let mut q = queue(BackendKind::Select);
        let fd = q.signal_pipe.read_fd();
        assert!(q.register(fd, Interest::READABLE, None).unwrap_err().is_usage());
        assert!(q.unregister(fd).unwrap_err().is_usage());
    }

    #[test]
    fn select_rejects_descriptors_past_fd_setsize() {
        let _g = crate::test_lock();
        let mut q = queue(BackendKind::Select);
        let too_big = libc::FD_SETSIZE as RawFd;
        let err = q.register(too_big, Interest::READABLE, None).unwrap_err();
        assert!(matches!(err, crate::Error::Capacity { .. }));
        assert!(!q.is_registered(too_big));
    }

    #[test]
    fn delivered_signals_arrive_in_order() {
        both_backends(|mut q| {
            signal::bridge().deliver(libc::SIGHUP);
            signal::bridge().deliver(libc::SIGTERM);
            let events = q.poll(Some(Duration::from_millis(500))).unwrap();
            assert_eq!(
                events,
                vec![
                    ReadyEvent::SignalReceived { signal: libc::SIGHUP },
                    ReadyEvent::SignalReceived { signal: libc::SIGTERM },
                ]
            );
            assert_eq!(events[0].signal(), Some(Signal::Hangup));
        });
    }

    #[test]
    fn raised_signal_wakes_blocked_poll() {
        both_backends(|mut q| {
            signal::bridge().install(Signal::Hangup).unwrap();
            let raiser = thread::spawn(|| {
                thread::sleep(Duration::from_millis(50));
                unsafe { libc::kill(libc::getpid(), libc::SIGHUP) };
            });
            let events = poll_until_events(&mut q, Duration::from_secs(5));
            raiser.join().unwrap();
            assert_eq!(events, vec![ReadyEvent::SignalReceived { signal: libc::SIGHUP }]);
        });
    }

    #[test]
    fn poll_retries_when_its_own_thread_is_interrupted() {
        use std::sync::mpsc;

        extern "C" fn ignore(_: libc::c_int) {}

        struct Tid(libc::pthread_t);
        unsafe impl Send for Tid {}

        let _g = crate::test_lock();
        // No SA_RESTART: the blocked wait sees EINTR.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        let handler: extern "C" fn(libc::c_int) = ignore;
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = 0;
        let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(libc::sigaction(libc::SIGUSR1, &action, &mut old), 0);
        }

        for kind in [BackendKind::Select, BackendKind::Polling] {
            let (tx, rx) = mpsc::channel();
            let poller = thread::spawn(move || {
                let mut q = queue(kind);
                let (r, _w) = pipe();
                q.register(r.as_raw_fd(), Interest::READABLE, None).unwrap();
                let _ = tx.send(Tid(unsafe { libc::pthread_self() }));
                let start = Instant::now();
                let events = q.poll(Some(Duration::from_millis(300)));
                (events, start.elapsed())
            });
            let Tid(tid) = rx.recv().unwrap();
            for _ in 0..2 {
                thread::sleep(Duration::from_millis(50));
                assert_eq!(unsafe { libc::pthread_kill(tid, libc::SIGUSR1) }, 0);
            }
            let (events, elapsed) = poller.join().unwrap();
            assert_eq!(events.unwrap(), Vec::new(), "{:?}", kind);
            assert!(elapsed >= Duration::from_millis(250), "{:?} returned after {:?}", kind, elapsed);
        }

        unsafe { libc::sigaction(libc::SIGUSR1, &old, std::ptr::null_mut()) };
    }

    #[test]
    fn dispatch_continues_past_failing_handler() {
        both_backends(|mut q| {
            let (r1, w1) = pipe();
            let (r2, w2) = pipe();
            let calls = Arc::new(AtomicUsize::new(0));

            q.register_with(r1.as_raw_fd(), Interest::READABLE, None, |_| {
                Err(io::Error::other("boom"))
            })
            .unwrap();
            let c = calls.clone();
            q.register_with(r2.as_raw_fd(), Interest::READABLE, None, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
            let c = calls.clone();
            q.on_signal(move |ev| {
                assert_eq!(ev.signal(), Some(Signal::Quit));
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

            write_byte(&w1);
            write_byte(&w2);
            signal::bridge().deliver(libc::SIGQUIT);

            let mut seen = 0;
            let mut failures = 0;
            let start = Instant::now();
            while seen < 3 && start.elapsed() < Duration::from_secs(2) {
                let d = q.dispatch(Some(Duration::from_millis(500))).unwrap();
                seen += d.events.len();
                failures += d.failures.len();
                // Level-triggered: consume so r1/r2 are not reported again.
                let mut buf = [0u8; 8];
                for fd in [r1.as_raw_fd(), r2.as_raw_fd()] {
                    unsafe {
                        libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                        libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
                    }
                }
            }
            assert_eq!(seen, 3);
            assert_eq!(failures, 1);
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn poll_yields_host_lock() {
        let _g = crate::test_lock();
        let host = Arc::new(crate::host_lock::tests::CountingHostLock::default());
        let mut q = EventQueue::with_config(ReactorConfig::default(), host.clone()).unwrap();
        q.poll(Some(Duration::from_millis(1))).unwrap();
        assert_eq!(host.released.load(Ordering::SeqCst), 1);
        assert_eq!(host.acquired.load(Ordering::SeqCst), 1);
    }
}
