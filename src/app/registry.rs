//! Event dispatch registry: script event names → handlers.
//!
//! Registration is additive only.  Lookups scan newest-first, so a later
//! `on()` for the same name shadows an earlier one.  [`EventRegistry::dispatch`]
//! never runs the handler inline; it enqueues a [`WorkItem::Dispatch`] that
//! the task context picks up on its next pass.  Code already running in task
//! context resolves the handler with [`EventRegistry::find`] and calls it
//! directly.

use core::fmt;

use log::debug;

use super::events::EventPayload;
use crate::events::{WorkItem, WorkQueue};

/// Event names must be strictly shorter than this many bytes.
pub const MAX_EVENT_NAME_LEN: usize = 20;

pub type EventName = heapless::String<MAX_EVENT_NAME_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    NameTooLong,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTooLong => write!(f, "event type string too long"),
        }
    }
}

impl From<RegistryError> for crate::error::Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NameTooLong => Self::Argument("event type string too long"),
        }
    }
}

struct Registration<V> {
    name: EventName,
    handler: V,
}

pub struct EventRegistry<V> {
    entries: Vec<Registration<V>>,
}

impl<V> EventRegistry<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a handler for `name` (case-sensitive).
    pub fn register(&mut self, name: &str, handler: V) -> Result<(), RegistryError> {
        if name.len() >= MAX_EVENT_NAME_LEN {
            return Err(RegistryError::NameTooLong);
        }
        let mut stored = EventName::new();
        stored
            .push_str(name)
            .map_err(|()| RegistryError::NameTooLong)?;
        self.entries.push(Registration {
            name: stored,
            handler,
        });
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.entries.iter().rposition(|r| r.name.as_str() == name)
    }

    /// The handler that currently answers `name`, if any.
    pub fn find(&self, name: &str) -> Option<&V> {
        self.lookup(name).and_then(|slot| self.handler(slot))
    }

    /// Queue the handler registered for `name`.  Unknown names are a no-op
    /// and return `false`.
    pub fn dispatch(&self, queue: &WorkQueue, name: &str, payload: EventPayload) -> bool {
        let Some(slot) = self.lookup(name) else {
            debug!("EVENT: no handler for '{name}'");
            return false;
        };
        queue.push(WorkItem::Dispatch { slot, payload })
    }

    pub fn handler(&self, slot: usize) -> Option<&V> {
        self.entries.get(slot).map(|r| &r.handler)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for EventRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}
