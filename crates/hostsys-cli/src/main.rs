//! `hostsys`: drive the channel and the event queue from a shell.
//!
//!   hostsys stress --producers 8 --consumers 4 --messages 10000 --high-water-mark 64
//!   hostsys watch --backend polling --timeout-ms 2000 --signal INT --signal TERM

use std::os::fd::RawFd;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use hostsys_rt::{
    signal_bridge, BackendKind, Channel, ChannelConfig, EventQueue, ExecutionLock, HostLock,
    Interest, NoHostLock, ReactorConfig, ReadyEvent, Signal, Timeout,
};

#[derive(Parser, Debug)]
#[command(name = "hostsys")]
#[command(about = "Exercise the hostsys channel and readiness reactor")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push messages through one channel from many producers to many consumers
    Stress {
        #[arg(long, default_value = "4")]
        producers: usize,

        #[arg(long, default_value = "2")]
        consumers: usize,

        /// Messages per producer
        #[arg(long, default_value = "10000")]
        messages: usize,

        /// Producers block once this many messages are pending (unbounded if unset)
        #[arg(long)]
        high_water_mark: Option<usize>,

        /// Values per message
        #[arg(long, default_value = "1")]
        parts: usize,

        /// Run every thread under a shared execution lock, as an embedding host would
        #[arg(long)]
        host_lock: bool,
    },
    /// Watch stdin and bridged signals, logging every event
    Watch {
        #[arg(long, value_enum, default_value = "select")]
        backend: Backend,

        /// Report a timeout when stdin stays quiet this long
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Signals to route through the bridge (HUP, INT, QUIT, TERM)
        #[arg(long = "signal")]
        signals: Vec<Signal>,

        /// Stop after this many events (0: until stdin closes or a signal arrives)
        #[arg(long, default_value = "0")]
        count: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    Select,
    Polling,
}

impl From<Backend> for BackendKind {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Select => BackendKind::Select,
            Backend::Polling => BackendKind::Polling,
        }
    }
}

fn main() -> ExitCode {
    hostsys_rt::logging::init();
    let args = Args::parse();

    let result = match args.command {
        Command::Stress {
            producers,
            consumers,
            messages,
            high_water_mark,
            parts,
            host_lock,
        } => stress(producers, consumers, messages, high_water_mark, parts, host_lock),
        Command::Watch {
            backend,
            timeout_ms,
            signals,
            count,
        } => watch(backend.into(), timeout_ms.map(Duration::from_millis), &signals, count),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "hostsys failed");
            ExitCode::FAILURE
        }
    }
}

/// A worker's hold on the shared execution lock, given back on every exit
/// path including errors.
struct HostSession(Option<Arc<ExecutionLock>>);

impl HostSession {
    fn enter(lock: &Arc<ExecutionLock>, enabled: bool) -> Self {
        if !enabled {
            return HostSession(None);
        }
        lock.enter();
        HostSession(Some(lock.clone()))
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        if let Some(lock) = &self.0 {
            lock.leave();
        }
    }
}

fn stress(
    producers: usize,
    consumers: usize,
    messages: usize,
    high_water_mark: Option<usize>,
    parts: usize,
    host_lock: bool,
) -> hostsys_rt::Result<()> {
    let lock = Arc::new(ExecutionLock::new()?);
    let host: Arc<dyn HostLock> = if host_lock {
        lock.clone()
    } else {
        Arc::new(NoHostLock)
    };
    let config = ChannelConfig {
        high_water_mark,
        ..Default::default()
    };
    let chan = Arc::new(Channel::with_config(config, host)?);
    let total = producers * messages;
    let remaining = Arc::new(AtomicUsize::new(total));
    let parts = parts.max(1);
    let consumers = consumers.max(1);

    tracing::info!(producers, consumers, messages, ?high_water_mark, parts, host_lock, "stress starting");
    let start = Instant::now();

    let mut handles = Vec::new();
    for p in 0..producers {
        let chan = chan.clone();
        let lock = lock.clone();
        handles.push(thread::spawn(move || -> hostsys_rt::Result<usize> {
            let _session = HostSession::enter(&lock, host_lock);
            for i in 0..messages {
                let values: Vec<(usize, usize, usize)> = (0..parts).map(|k| (p, i, k)).collect();
                chan.put(values)?;
            }
            Ok(0)
        }));
    }
    for _ in 0..consumers {
        let chan = chan.clone();
        let lock = lock.clone();
        let remaining = remaining.clone();
        handles.push(thread::spawn(move || -> hostsys_rt::Result<usize> {
            let _session = HostSession::enter(&lock, host_lock);
            let mut taken = 0;
            while remaining.load(Ordering::Acquire) > 0 {
                if let Some(values) = chan.get(Timeout::from_millis(50))? {
                    debug_assert_eq!(values.len(), parts);
                    remaining.fetch_sub(1, Ordering::AcqRel);
                    taken += 1;
                }
            }
            Ok(taken)
        }));
    }

    let mut consumed = 0;
    for handle in handles {
        match handle.join() {
            Ok(taken) => consumed += taken?,
            Err(_) => tracing::error!("worker thread panicked"),
        }
    }

    let elapsed = start.elapsed();
    let rate = consumed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(consumed, total, ?elapsed, rate = rate as u64, "stress finished");
    if consumed != total {
        tracing::warn!(missing = total - consumed, "not every message was consumed");
    }
    Ok(())
}

fn watch(
    backend: BackendKind,
    timeout: Option<Duration>,
    signals: &[Signal],
    count: usize,
) -> hostsys_rt::Result<()> {
    const STDIN: RawFd = 0;
    watch_fd(backend, STDIN, timeout, signals, count).map(|seen| {
        tracing::info!(events = seen, "watch finished");
    })
}

/// Watch `fd` until it closes, a signal arrives or `count` events were
/// seen. Installed signals are restored however the loop ends.
fn watch_fd(
    backend: BackendKind,
    fd: RawFd,
    timeout: Option<Duration>,
    signals: &[Signal],
    count: usize,
) -> hostsys_rt::Result<usize> {
    let mut queue = EventQueue::with_config(ReactorConfig { backend }, Arc::new(NoHostLock))?;
    let mut installed = Vec::new();
    let mut outcome = Ok(0);
    for &signal in signals {
        match signal_bridge().install(signal) {
            Ok(()) => installed.push(signal),
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }
    if outcome.is_ok() {
        outcome = watch_loop(&mut queue, fd, timeout, count);
    }

    for signal in installed {
        if let Err(err) = signal_bridge().restore(signal) {
            tracing::warn!(%signal, %err, "failed to restore signal disposition");
        }
    }
    outcome
}

fn watch_loop(
    queue: &mut EventQueue,
    fd: RawFd,
    timeout: Option<Duration>,
    count: usize,
) -> hostsys_rt::Result<usize> {
    queue.register(fd, Interest::READABLE, timeout)?;
    tracing::info!(fd, ?timeout, "watching descriptor");

    let mut seen = 0;
    let mut buf = [0u8; 4096];
    loop {
        for event in queue.poll(None)? {
            seen += 1;
            match event {
                ReadyEvent::Ready { fd, .. } => {
                    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                    if n <= 0 {
                        tracing::info!(fd, "input closed");
                        queue.unregister(fd)?;
                        return Ok(seen);
                    }
                    tracing::info!(fd, bytes = n, "readable");
                }
                ReadyEvent::TimedOut { fd } => tracing::info!(fd, "timed out"),
                ReadyEvent::SignalReceived { signal } => {
                    match Signal::from_raw(signal) {
                        Some(sig) => tracing::info!(signal = %sig, "signal received"),
                        None => tracing::info!(signal, "signal received"),
                    }
                    return Ok(seen);
                }
            }
            if count != 0 && seen >= count {
                return Ok(seen);
            }
        }
    }
}
