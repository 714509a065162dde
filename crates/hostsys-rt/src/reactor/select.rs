//! `select(2)` backend. Capacity is `FD_SETSIZE`.

use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::time::{Duration, Instant};

use super::{Backend, Interest, Readiness};
use crate::error::{Error, Result, UsageError};

pub(crate) struct SelectBackend {
    interests: BTreeMap<RawFd, Interest>,
    read_set: libc::fd_set,
    write_set: libc::fd_set,
    max_fd: RawFd,
}

impl SelectBackend {
    pub(crate) fn new() -> Self {
        let mut read_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
        }
        SelectBackend {
            interests: BTreeMap::new(),
            read_set,
            write_set,
            max_fd: -1,
        }
    }

    fn check_fd(fd: RawFd) -> Result<()> {
        if fd < 0 {
            return Err(UsageError::InvalidDescriptor.into());
        }
        if fd as usize >= libc::FD_SETSIZE as usize {
            return Err(Error::Capacity {
                fd,
                limit: libc::FD_SETSIZE as usize,
            });
        }
        Ok(())
    }

    fn apply(&mut self, fd: RawFd, interest: Interest) {
        unsafe {
            libc::FD_CLR(fd, &mut self.read_set);
            libc::FD_CLR(fd, &mut self.write_set);
            if interest.readable {
                libc::FD_SET(fd, &mut self.read_set);
            }
            if interest.writable {
                libc::FD_SET(fd, &mut self.write_set);
            }
        }
    }
}

/// `timeout` rounded up to whole microseconds, so a sub-microsecond
/// remainder still blocks instead of polling.
fn timeval_ceil(timeout: Duration) -> libc::timeval {
    let micros = timeout.as_nanos().div_ceil(1000);
    let mut tv: libc::timeval = unsafe { mem::zeroed() };
    tv.tv_sec = (micros / 1_000_000).min(libc::time_t::MAX as u128) as libc::time_t;
    tv.tv_usec = (micros % 1_000_000) as libc::suseconds_t;
    tv
}

impl Backend for SelectBackend {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        Self::check_fd(fd)?;
        self.apply(fd, interest);
        self.interests.insert(fd, interest);
        self.max_fd = self.max_fd.max(fd);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        Self::check_fd(fd)?;
        if !self.interests.contains_key(&fd) {
            return Err(UsageError::NotRegistered.into());
        }
        self.apply(fd, interest);
        self.interests.insert(fd, interest);
        Ok(())
    }

    fn delete(&mut self, fd: RawFd) -> Result<()> {
        if self.interests.remove(&fd).is_none() {
            return Err(UsageError::NotRegistered.into());
        }
        self.apply(fd, Interest::NONE);
        self.max_fd = self.interests.keys().next_back().copied().unwrap_or(-1);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut read_set = self.read_set;
            let mut write_set = self.write_set;
            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let mut tv = timeval_ceil(left.unwrap_or_default());
            let tvp = match left {
                Some(_) => &mut tv as *mut libc::timeval,
                None => ptr::null_mut(),
            };

            let n = unsafe {
                libc::select(
                    self.max_fd + 1,
                    &mut read_set,
                    &mut write_set,
                    ptr::null_mut(),
                    tvp,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    // Retry with whatever time is left.
                    continue;
                }
                return Err(Error::os("select", err));
            }

            if n > 0 {
                for &fd in self.interests.keys() {
                    let readable = unsafe { libc::FD_ISSET(fd, &read_set) };
                    let writable = unsafe { libc::FD_ISSET(fd, &write_set) };
                    if readable || writable {
                        ready.push(Readiness {
                            fd,
                            readable,
                            writable,
                        });
                    }
                }
            }
            return Ok(());
        }
    }

    fn len(&self) -> usize {
        self.interests.len()
    }
}
