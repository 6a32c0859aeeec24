//! Task-context work queue.
//!
//! Work is produced by:
//! - the stack callback context (attribute requests, CCC writes, lifecycle)
//! - the event registry (script event dispatch)
//!
//! and consumed by [`Peripheral::service`](crate::app::service::Peripheral::service),
//! which runs each item in the cooperative task context, one at a time,
//! in FIFO order.
//!
//! ```text
//! ┌────────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ Stack callback │────▶│              │     │               │
//! │ (read / write) │     │  Work Queue  │────▶│  Task context │
//! │ Event registry │────▶│  (bounded)   │     │  (service())  │
//! └────────────────┘     └──────────────┘     └───────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::app::events::{EventPayload, StackEvent};
use crate::gatt::bridge::PendingRequest;
use crate::gatt::model::CharacteristicKey;

/// Maximum number of pending work items.
pub const WORK_QUEUE_DEPTH: usize = 16;

/// A unit of work to run in task context.
pub enum WorkItem {
    /// An attribute read/write waiting on a script handler.
    Request(PendingRequest),
    /// A client changed the CCC of a notifying characteristic.
    Subscription { key: CharacteristicKey, enabled: bool },
    /// Connection / advertising lifecycle report from the stack.
    Stack(StackEvent),
    /// Invoke the registered event handler in `slot`.
    Dispatch { slot: usize, payload: EventPayload },
}

impl WorkItem {
    fn label(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Subscription { .. } => "subscription",
            Self::Stack(_) => "stack event",
            Self::Dispatch { .. } => "dispatch",
        }
    }
}

// ── Bounded MPSC queue ────────────────────────────────────────
//
// Producers are the stack's callback context and the task itself; the
// only consumer is the task.  Shared through an `Arc` so independent
// peripherals each get their own queue.

pub struct WorkQueue {
    channel: Channel<CriticalSectionRawMutex, WorkItem, WORK_QUEUE_DEPTH>,
}

impl WorkQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueue an item.  Safe from any context.
    /// Returns `false` if the queue is full (item dropped).
    pub fn push(&self, item: WorkItem) -> bool {
        match self.channel.try_send(item) {
            Ok(()) => true,
            Err(embassy_sync::channel::TrySendError::Full(item)) => {
                warn!("QUEUE: full, dropping {}", item.label());
                false
            }
        }
    }

    /// Pop the next item, `None` if empty.
    pub fn pop(&self) -> Option<WorkItem> {
        self.channel.try_receive().ok()
    }

    /// Run one servicing pass: handle at most the items pending when the
    /// pass starts, so work enqueued by a handler waits for the next pass.
    pub fn drain_pass(&self, mut handler: impl FnMut(WorkItem)) -> usize {
        let pending = self.channel.len();
        let mut handled = 0;
        while handled < pending {
            let Some(item) = self.pop() else { break };
            handler(item);
            handled += 1;
        }
        handled
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
