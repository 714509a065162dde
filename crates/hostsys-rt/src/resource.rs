//! Handle registry for resources created over the C ABI.
//!
//! Resources form a closed set of variants sharing one lifecycle: created
//! through a factory, operated on through their handle, destroyed through
//! [`Registry::remove`]. Handles are slab keys offset by one so that `0`
//! never names a live resource.
//!
//! Blocking operations clone the resource's `Arc` out of the registry
//! first, so a long `get` or `poll` never holds the registry lock.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use slab::Slab;

use crate::channel::Channel;
use crate::error::{Result, UsageError};
use crate::host_lock::{HostLock, NoHostLock};
use crate::sync::Event;

#[cfg(unix)]
use crate::reactor::EventQueue;

/// Values cross the C ABI as owned byte blobs.
pub type Blob = Box<[u8]>;

pub enum Resource {
    Channel(Arc<Channel<Blob>>),
    Event(Arc<Event>),
    #[cfg(unix)]
    EventQueue(Arc<Mutex<EventQueue>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Channel,
    Event,
    EventQueue,
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Channel(_) => ResourceKind::Channel,
            Resource::Event(_) => ResourceKind::Event,
            #[cfg(unix)]
            Resource::EventQueue(_) => ResourceKind::EventQueue,
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource::{:?}", self.kind())
    }
}

pub struct Registry {
    entries: Mutex<Slab<Resource>>,
    host: Mutex<Arc<dyn HostLock>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        entries: Mutex::new(Slab::new()),
        host: Mutex::new(Arc::new(NoHostLock)),
    })
}

fn key_of(handle: u64) -> Result<usize> {
    match handle {
        0 => Err(UsageError::NotInitialized.into()),
        h => usize::try_from(h - 1).map_err(|_| UsageError::UnknownHandle.into()),
    }
}

impl Registry {
    /// Host lock captured by resources created from now on.
    pub fn host_lock(&self) -> Arc<dyn HostLock> {
        self.host.lock().clone()
    }

    pub fn set_host_lock(&self, host: Arc<dyn HostLock>) {
        *self.host.lock() = host;
    }

    pub fn insert(&self, resource: Resource) -> u64 {
        tracing::trace!(kind = ?resource.kind(), "resource created");
        self.entries.lock().insert(resource) as u64 + 1
    }

    /// Destroy the resource. Threads already blocked on it keep their
    /// reference until they return.
    pub fn remove(&self, handle: u64) -> Result<Resource> {
        let key = key_of(handle)?;
        let mut entries = self.entries.lock();
        if !entries.contains(key) {
            return Err(UsageError::UnknownHandle.into());
        }
        let resource = entries.remove(key);
        tracing::trace!(kind = ?resource.kind(), "resource destroyed");
        Ok(resource)
    }

    pub fn kind(&self, handle: u64) -> Result<ResourceKind> {
        let key = key_of(handle)?;
        self.entries
            .lock()
            .get(key)
            .map(Resource::kind)
            .ok_or_else(|| UsageError::UnknownHandle.into())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with<T>(&self, handle: u64, pick: impl FnOnce(&Resource) -> Option<T>) -> Result<T> {
        let key = key_of(handle)?;
        let entries = self.entries.lock();
        let resource = entries.get(key).ok_or(UsageError::UnknownHandle)?;
        Ok(pick(resource).ok_or(UsageError::WrongResource)?)
    }

    pub fn channel(&self, handle: u64) -> Result<Arc<Channel<Blob>>> {
        self.with(handle, |r| match r {
            Resource::Channel(chan) => Some(chan.clone()),
            _ => None,
        })
    }

    pub fn event(&self, handle: u64) -> Result<Arc<Event>> {
        self.with(handle, |r| match r {
            Resource::Event(ev) => Some(ev.clone()),
            _ => None,
        })
    }

    #[cfg(unix)]
    pub fn event_queue(&self, handle: u64) -> Result<Arc<Mutex<EventQueue>>> {
        self.with(handle, |r| match r {
            Resource::EventQueue(evq) => Some(evq.clone()),
            _ => None,
        })
    }
}
