//! Alternate backend over the `polling` crate (epoll, kqueue, event ports).
//!
//! Registrations use level-triggered mode so readiness keeps being
//! reported until the registrant consumes it, matching `select`.

use std::collections::HashMap;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use polling::{Event, Events, PollMode, Poller};

use super::{Backend, Interest, Readiness};
use crate::error::{Error, Result, UsageError};

pub(crate) struct PollingBackend {
    poller: Poller,
    events: Events,
    interests: HashMap<RawFd, Interest>,
}

impl PollingBackend {
    pub(crate) fn new() -> Result<Self> {
        let poller = Poller::new().map_err(|e| Error::init("poller", e))?;
        Ok(PollingBackend {
            poller,
            events: Events::new(),
            interests: HashMap::new(),
        })
    }
}

fn event_for(fd: RawFd, interest: Interest) -> Event {
    Event::new(fd as usize, interest.readable, interest.writable)
}

impl Backend for PollingBackend {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        if fd < 0 {
            return Err(UsageError::InvalidDescriptor.into());
        }
        // add() is unsafe because the fd must be deleted before it is closed;
        // the queue deletes on unregister and on drop.
        unsafe {
            self.poller
                .add_with_mode(fd, event_for(fd, interest), PollMode::Level)
                .map_err(|e| Error::os("poller add", e))?;
        }
        self.interests.insert(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        if !self.interests.contains_key(&fd) {
            return Err(UsageError::NotRegistered.into());
        }
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.poller
            .modify_with_mode(&borrowed, event_for(fd, interest), PollMode::Level)
            .map_err(|e| Error::os("poller modify", e))?;
        self.interests.insert(fd, interest);
        Ok(())
    }

    fn delete(&mut self, fd: RawFd) -> Result<()> {
        if self.interests.remove(&fd).is_none() {
            return Err(UsageError::NotRegistered.into());
        }
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        // The registrant may already have closed the fd, which removes it
        // from the kernel set on its own.
        if let Err(err) = self.poller.delete(&borrowed) {
            tracing::debug!(fd, %err, "poller delete failed");
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.events.clear();
        loop {
            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.poller.wait(&mut self.events, left) {
                // Woken early with nothing ready: an interrupt, not the deadline.
                Ok(_) if self.events.is_empty() && deadline.map_or(true, |d| Instant::now() < d) => {
                    continue
                }
                Ok(_) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::os("poller wait", err)),
            }
        }
        ready.extend(self.events.iter().map(|ev| Readiness {
            fd: ev.key as RawFd,
            readable: ev.readable,
            writable: ev.writable,
        }));
        Ok(())
    }

    fn len(&self) -> usize {
        self.interests.len()
    }
}
