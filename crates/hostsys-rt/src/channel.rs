//! Bounded multi-producer/multi-consumer message channel.
//!
//! A message is a non-empty group of values delivered as one unit. Storage
//! is a slot arena addressed by `head`/`tail`: each message occupies a
//! header slot holding its item count followed by one slot per value.
//!
//! Producers are held in `put` while more than `high_water_mark` messages
//! are pending; consumers block in `get` while nothing is pending.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, UsageError};
use crate::host_lock::{HostLock, HostYield, NoHostLock};
use crate::sync::{Condvar, Mutex, Timeout, WaitStatus};

const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// `None` means unbounded: `put` never blocks.
    pub high_water_mark: Option<usize>,
    /// Initial slot count. Each message takes one slot more than its values.
    pub initial_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            high_water_mark: None,
            initial_capacity: 32,
        }
    }
}

enum Slot<T> {
    Empty,
    Header(usize),
    Value(T),
}

struct ChannelState<T> {
    slots: Vec<Slot<T>>,
    head: usize,
    tail: usize,
    /// Pending messages, not slots.
    count: usize,
    high_water_mark: Option<usize>,
    /// Producers parked on backpressure.
    blocked_producers: usize,
}

impl<T> ChannelState<T> {
    fn with_capacity(capacity: usize, high_water_mark: Option<usize>) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity, || Slot::Empty);
        ChannelState {
            slots,
            head: 0,
            tail: 0,
            count: 0,
            high_water_mark,
            blocked_producers: 0,
        }
    }

    fn over_mark(&self) -> bool {
        self.high_water_mark.is_some_and(|mark| self.count > mark)
    }

    fn push(&mut self, values: Vec<T>) {
        let n = values.len();
        self.reserve(n + 1);
        self.slots[self.tail] = Slot::Header(n);
        self.tail += 1;
        for value in values {
            self.slots[self.tail] = Slot::Value(value);
            self.tail += 1;
        }
        self.count += 1;
    }

    /// Make room for `needed` slots at `tail`. Live slots are moved to the
    /// front first; capacity doubles only if that is not enough.
    fn reserve(&mut self, needed: usize) {
        if self.tail + needed <= self.slots.len() {
            return;
        }
        if self.head > 0 {
            self.slots[..self.tail].rotate_left(self.head);
            self.tail -= self.head;
            self.head = 0;
            if self.tail + needed <= self.slots.len() {
                return;
            }
        }
        let mut capacity = self.slots.len().max(MIN_CAPACITY);
        while self.tail + needed > capacity {
            capacity *= 2;
        }
        self.slots.resize_with(capacity, || Slot::Empty);
    }

    /// Remove the oldest message. Caller guarantees `count > 0`.
    fn pop(&mut self) -> Vec<T> {
        let n = match mem::replace(&mut self.slots[self.head], Slot::Empty) {
            Slot::Header(n) => n,
            _ => unreachable!("channel head does not point at a message header"),
        };
        let first = self.head + 1;
        let values = self.slots[first..first + n]
            .iter_mut()
            .map(|slot| match mem::replace(slot, Slot::Empty) {
                Slot::Value(value) => value,
                _ => unreachable!("channel message truncated"),
            })
            .collect();
        self.head = first + n;
        self.count -= 1;
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
        values
    }
}

/// A FIFO of value groups shared between threads.
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
    /// "message available"
    put_cond: Condvar,
    /// "slot consumed"
    get_cond: Condvar,
    /// Mirror of `count` for lock-free snapshots.
    pending: AtomicUsize,
    host: Arc<dyn HostLock>,
}

impl<T> Channel<T> {
    pub fn new() -> Result<Self> {
        Self::with_config(ChannelConfig::default(), Arc::new(NoHostLock))
    }

    pub fn with_config(config: ChannelConfig, host: Arc<dyn HostLock>) -> Result<Self> {
        let put_cond = Condvar::new()?;
        let get_cond = Condvar::new()?;
        let state = Mutex::new(ChannelState::with_capacity(
            config.initial_capacity,
            config.high_water_mark,
        ))?;
        Ok(Channel {
            state,
            put_cond,
            get_cond,
            pending: AtomicUsize::new(0),
            host,
        })
    }

    /// Append one message. Blocks while the channel is over its high-water
    /// mark, until consumers bring it back to or under the mark.
    pub fn put(&self, values: Vec<T>) -> Result<()> {
        if values.is_empty() {
            return Err(UsageError::EmptyMessage.into());
        }

        let _yield = HostYield::new(&*self.host);
        let mut state = self.state.lock();
        state.push(values);
        self.pending.store(state.count, Ordering::Release);
        self.put_cond.signal()?;

        if state.over_mark() {
            tracing::trace!(count = state.count, mark = ?state.high_water_mark, "producer held by backpressure");
            state.blocked_producers += 1;
            let waited = self
                .get_cond
                .wait_while(&mut state, Timeout::Infinite, |s| s.over_mark());
            state.blocked_producers -= 1;
            waited?;
            tracing::trace!(count = state.count, "producer released");
        }
        Ok(())
    }

    /// Take the oldest message, waiting up to `timeout` for one to arrive.
    /// Returns `Ok(None)` on timeout; nothing is consumed in that case.
    pub fn get(&self, timeout: Timeout) -> Result<Option<Vec<T>>> {
        let _yield = HostYield::new(&*self.host);
        let mut state = self.state.lock();

        let status = self
            .put_cond
            .wait_while(&mut state, timeout, |s| s.count == 0)?;
        if status == WaitStatus::TimedOut {
            return Ok(None);
        }

        let values = state.pop();
        self.pending.store(state.count, Ordering::Release);
        // Backpressure is a channel-wide predicate: once under the mark,
        // every parked producer may go.
        if state.blocked_producers > 0 && !state.over_mark() {
            self.get_cond.broadcast()?;
        }
        Ok(Some(values))
    }

    /// Non-blocking `get`.
    pub fn try_get(&self) -> Result<Option<Vec<T>>> {
        self.get(Timeout::Millis(0))
    }

    pub fn high_water_mark(&self) -> Option<usize> {
        self.state.lock().high_water_mark
    }

    /// Set or clear (`None`) the high-water mark. Returns the previous one.
    pub fn set_high_water_mark(&self, mark: Option<usize>) -> Result<Option<usize>> {
        let mut state = self.state.lock();
        let previous = mem::replace(&mut state.high_water_mark, mark);
        if state.blocked_producers > 0 && !state.over_mark() {
            self.get_cond.broadcast()?;
        }
        Ok(previous)
    }

    /// Pending messages. A snapshot only; other threads may change it at once.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Display for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[chan: {:p}]", self)
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_lock::tests::CountingHostLock;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::{Duration, Instant};

    fn channel<T>() -> Channel<T> {
        Channel::new().unwrap()
    }

    #[test]
    fn round_trip_keeps_groups() {
        let chan = channel();
        chan.put(vec!["a", "b"]).unwrap();
        assert_eq!(chan.get(Timeout::Infinite).unwrap(), Some(vec!["a", "b"]));

        chan.put(vec!["x"]).unwrap();
        chan.put(vec!["y"]).unwrap();
        assert_eq!(chan.len(), 2);
        assert_eq!(chan.get(Timeout::Infinite).unwrap(), Some(vec!["x"]));
        assert_eq!(chan.get(Timeout::Infinite).unwrap(), Some(vec!["y"]));
        assert!(chan.is_empty());
    }

    #[test]
    fn fifo_across_many_messages_and_growth() {
        let chan = Channel::with_config(
            ChannelConfig {
                initial_capacity: 2,
                ..Default::default()
            },
            Arc::new(NoHostLock),
        )
        .unwrap();
        for i in 0..200usize {
            let group: Vec<usize> = (0..(i % 4) + 1).map(|j| i * 10 + j).collect();
            chan.put(group).unwrap();
            // Interleave some consumption so head moves away from zero.
            if i % 3 == 0 {
                assert!(chan.try_get().unwrap().is_some());
            }
        }
        let mut last = None;
        while let Some(group) = chan.try_get().unwrap() {
            let first = group[0] / 10;
            assert_eq!(group.len(), (first % 4) + 1);
            for (j, v) in group.iter().enumerate() {
                assert_eq!(*v, first * 10 + j);
            }
            if let Some(prev) = last {
                assert!(first > prev, "out of order: {} after {}", first, prev);
            }
            last = Some(first);
        }
    }

    #[test]
    fn indices_reset_when_drained() {
        let chan = channel();
        chan.put(vec![1, 2, 3]).unwrap();
        chan.put(vec![4]).unwrap();
        chan.get(Timeout::Infinite).unwrap();
        {
            let state = chan.state.lock();
            assert_eq!((state.head, state.tail), (4, 6));
        }
        chan.get(Timeout::Infinite).unwrap();
        let state = chan.state.lock();
        assert_eq!((state.head, state.tail), (0, 0));
        assert!(state.slots.iter().all(|s| matches!(s, Slot::Empty)));
    }

    #[test]
    fn empty_put_is_usage_error() {
        let chan: Channel<u8> = channel();
        let err = chan.put(Vec::new()).unwrap_err();
        assert!(err.is_usage());
        assert!(chan.is_empty());
    }

    #[test]
    fn get_times_out_without_consuming() {
        let chan: Channel<u8> = channel();
        let start = Instant::now();
        assert_eq!(chan.get(Timeout::from_millis(50)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(chan.len(), 0);
    }

    #[test]
    fn get_wakes_on_put_from_other_thread() {
        let chan = Arc::new(channel());
        let producer = {
            let chan = chan.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                chan.put(vec![7u32]).unwrap();
            })
        };
        assert_eq!(chan.get(Timeout::from_millis(5000)).unwrap(), Some(vec![7]));
        producer.join().unwrap();
    }

    #[test]
    fn high_water_mark_blocks_producer_until_get() {
        let k = 3;
        let chan = Arc::new(channel());
        assert_eq!(chan.set_high_water_mark(Some(k)).unwrap(), None);
        for i in 0..k {
            chan.put(vec![i]).unwrap();
        }

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let chan = chan.clone();
            let done = done.clone();
            thread::spawn(move || {
                chan.put(vec![k]).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "put past the mark should block");

        assert_eq!(chan.get(Timeout::Infinite).unwrap(), Some(vec![0]));
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(chan.len(), k);
    }

    #[test]
    fn clearing_mark_releases_all_producers() {
        let chan = Arc::new(channel());
        chan.set_high_water_mark(Some(0)).unwrap();
        let producers: Vec<_> = (0..3)
            .map(|i| {
                let chan = chan.clone();
                thread::spawn(move || chan.put(vec![i]).unwrap())
            })
            .collect();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(chan.set_high_water_mark(None).unwrap(), Some(0));
        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(chan.len(), 3);
        assert_eq!(chan.high_water_mark(), None);
    }

    #[test]
    fn blocking_calls_yield_host_lock() {
        let host = Arc::new(CountingHostLock::default());
        let chan: Channel<u8> = Channel::with_config(ChannelConfig::default(), host.clone()).unwrap();
        chan.put(vec![1]).unwrap();
        chan.get(Timeout::Infinite).unwrap();
        // Timed-out get still restores the lock.
        assert_eq!(chan.get(Timeout::from_millis(5)).unwrap(), None);
        assert!(chan.put(Vec::new()).is_err());
        assert_eq!(host.released.load(Ordering::SeqCst), 3);
        assert_eq!(host.acquired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn concurrent_producers_and_consumers_lose_nothing() {
        const PRODUCERS: usize = 8;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 1000;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let chan = Arc::new(Channel::new().unwrap());
        chan.set_high_water_mark(Some(64)).unwrap();
        let received = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let chan = chan.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        chan.put(vec![p * PER_PRODUCER + i]).unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let chan = chan.clone();
                let received = received.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while received.load(Ordering::SeqCst) < TOTAL {
                        if let Some(msg) = chan.get(Timeout::from_millis(20)).unwrap() {
                            assert_eq!(msg.len(), 1);
                            seen.push(msg[0]);
                            received.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    seen
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        let mut all = HashSet::new();
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(all.insert(v), "duplicate message {}", v);
            }
        }
        assert_eq!(all.len(), TOTAL);
        assert!(chan.is_empty());
    }

    #[test]
    fn display_shows_address() {
        let chan: Channel<u8> = channel();
        let shown = chan.to_string();
        assert!(shown.starts_with("[chan: 0x"), "{}", shown);
        assert!(shown.ends_with(']'));
    }
}
