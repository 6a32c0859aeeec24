//! Cross-context callback bridge.
//!
//! The stack delivers attribute reads and writes from its own callback
//! context and expects an answer before returning.  Script handlers can
//! only run in the cooperative task context.  The bridge ferries each
//! request across and blocks the callback context for a bounded time:
//!
//! ```text
//!  stack context                         task context
//!  ─────────────                         ────────────
//!  read()/write()
//!    │ PendingRequest ──▶ WorkQueue ──▶ serve()
//!    │                                    │ handler(offset, cb) / handler(buf, offset, false, cb)
//!    │                                    │ cb(status, …) ──▶ Responder::complete
//!    ◀──────────── Signal (one-shot) ─────┘
//!    │ or budget expires → UNLIKELY, late completion discarded
//! ```
//!
//! Every crossing owns its own completion slot, so concurrent crossings do
//! not share state.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, warn};

use super::att::{AttError, CCC_NOTIFY};
use super::model::{CharacteristicKey, ServiceTree};
use super::table::{AttributeEntry, AttributeValue};
use crate::app::events::StackEvent;
use crate::app::ports::{ScriptHost, ValueKind};
use crate::error::ScriptError;
use crate::events::{WorkItem, WorkQueue};

// ───────────────────────────────────────────────────────────────
// Request state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Created = 0,
    Queued = 1,
    Running = 2,
    Completed = 3,
    TimedOut = 4,
}

impl RequestState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Completed,
            _ => Self::TimedOut,
        }
    }

    const fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }
}

/// Result a handler reports back: ATT status (0 = success) and bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: u8,
    pub data: Vec<u8>,
}

impl Completion {
    /// The result a request carries until its handler says otherwise.
    pub fn preset() -> Self {
        Self::error(AttError::NOT_SUPPORTED)
    }

    pub fn error(e: AttError) -> Self {
        Self {
            status: e.code(),
            data: Vec::new(),
        }
    }
}

struct ReplySlot {
    state: AtomicU8,
    signal: Signal<CriticalSectionRawMutex, Completion>,
}

impl ReplySlot {
    fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless the request already settled.  Returns the final
    /// state that blocked the transition.
    fn advance(&self, to: RequestState) -> Result<(), RequestState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = RequestState::from_u8(current);
            if state.is_final() {
                return Err(state);
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Pending request
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write(Vec<u8>),
}

/// One attribute request in flight between the two contexts.
pub struct PendingRequest {
    pub key: CharacteristicKey,
    pub offset: u16,
    pub kind: RequestKind,
    reply: Arc<ReplySlot>,
}

impl PendingRequest {
    fn new(key: CharacteristicKey, offset: u16, kind: RequestKind) -> Self {
        Self {
            key,
            offset,
            kind,
            reply: Arc::new(ReplySlot {
                state: AtomicU8::new(RequestState::Created as u8),
                signal: Signal::new(),
            }),
        }
    }

    pub fn state(&self) -> RequestState {
        self.reply.state()
    }

    pub fn responder(&self) -> Responder {
        Responder {
            slot: Arc::clone(&self.reply),
        }
    }
}

/// Completion handle captured by the native callback given to a handler.
/// Completing more than once, or after the waiter gave up, has no effect.
#[derive(Clone)]
pub struct Responder {
    slot: Arc<ReplySlot>,
}

impl Responder {
    /// Deliver `completion` to the waiting stack context.
    /// Returns `false` when the request had already settled.
    pub fn complete(&self, completion: Completion) -> bool {
        match self.slot.advance(RequestState::Completed) {
            Ok(()) => {
                self.slot.signal.signal(completion);
                true
            }
            Err(RequestState::TimedOut) => {
                debug!("BRIDGE: late completion discarded");
                false
            }
            Err(_) => false,
        }
    }

    pub fn state(&self) -> RequestState {
        self.slot.state()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.state().is_final()
    }

    fn begin(&self) -> bool {
        self.slot.advance(RequestState::Running).is_ok()
    }
}

// ───────────────────────────────────────────────────────────────
// Stack-context half
// ───────────────────────────────────────────────────────────────

/// Entry points the stack adapter calls from its callback context.
///
/// Cheap to clone; every clone feeds the same peripheral.
#[derive(Clone)]
pub struct CallbackBridge {
    queue: Arc<WorkQueue>,
    budget: Duration,
}

impl CallbackBridge {
    pub fn new(queue: Arc<WorkQueue>, budget: Duration) -> Self {
        Self { queue, budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Report a lifecycle event.  Never blocks.
    pub fn post(&self, event: StackEvent) -> bool {
        self.queue.push(WorkItem::Stack(event))
    }

    /// Serve a read of `entry` into `dest`; returns the byte count.
    pub fn read(&self, entry: &AttributeEntry, offset: u16, dest: &mut [u8]) -> Result<usize, AttError> {
        let AttributeValue::Value(key) = entry.value else {
            return entry.read_static(offset, dest);
        };
        if offset as usize > dest.len() {
            return Err(AttError::INVALID_OFFSET);
        }
        if !entry.permissions.readable() {
            warn!("BRIDGE: no read handler for {}", entry.uuid);
            return Err(AttError::UNLIKELY);
        }

        let completion = self.cross(PendingRequest::new(key, offset, RequestKind::Read))?;
        if completion.status != 0 {
            return Err(AttError(completion.status));
        }
        if completion.data.is_empty() {
            return Err(AttError::NOT_SUPPORTED);
        }
        let n = completion.data.len().min(dest.len());
        if n < completion.data.len() {
            debug!(
                "BRIDGE: read of {} truncated {} -> {} bytes",
                entry.uuid,
                completion.data.len(),
                n
            );
        }
        dest[..n].copy_from_slice(&completion.data[..n]);
        Ok(n)
    }

    /// Serve a write of `data` to `entry`; returns the byte count accepted.
    pub fn write(&self, entry: &AttributeEntry, offset: u16, data: &[u8]) -> Result<usize, AttError> {
        let key = match entry.value {
            AttributeValue::Value(key) => key,
            AttributeValue::ClientConfig(key) => return self.write_client_config(key, offset, data),
            _ => return Err(AttError::WRITE_NOT_PERMITTED),
        };
        if !entry.permissions.writable() {
            warn!("BRIDGE: no write handler for {}", entry.uuid);
            return Err(AttError::UNLIKELY);
        }

        let request = PendingRequest::new(key, offset, RequestKind::Write(data.to_vec()));
        let completion = self.cross(request)?;
        if completion.status != 0 {
            return Err(AttError(completion.status));
        }
        Ok(data.len())
    }

    fn write_client_config(
        &self,
        key: CharacteristicKey,
        offset: u16,
        data: &[u8],
    ) -> Result<usize, AttError> {
        if offset != 0 {
            return Err(AttError::INVALID_OFFSET);
        }
        let [lo, hi] = data else {
            return Err(AttError::INVALID_ATTRIBUTE_LEN);
        };
        let enabled = u16::from_le_bytes([*lo, *hi]) & CCC_NOTIFY != 0;
        if !self.queue.push(WorkItem::Subscription { key, enabled }) {
            warn!("BRIDGE: subscription change for {key:?} refused, queue full");
            return Err(AttError::UNLIKELY);
        }
        Ok(data.len())
    }

    /// Enqueue `request` and wait for its completion or the budget.
    fn cross(&self, request: PendingRequest) -> Result<Completion, AttError> {
        let reply = Arc::clone(&request.reply);
        let key = request.key;
        reply.state.store(RequestState::Queued as u8, Ordering::Release);

        if !self.queue.push(WorkItem::Request(request)) {
            return Err(AttError::UNLIKELY);
        }

        let budget = self.budget;
        let outcome = future::block_on(future::or(
            async { Some(reply.signal.wait().await) },
            async {
                async_io_mini::Timer::after(budget).await;
                None
            },
        ));

        match outcome {
            Some(completion) => Ok(completion),
            None => match reply.advance(RequestState::TimedOut) {
                Ok(()) => {
                    warn!(
                        "BRIDGE: request for {:?} timed out after {} ms",
                        key,
                        budget.as_millis()
                    );
                    Err(AttError::UNLIKELY)
                }
                // Completed in the same instant the budget ran out.
                Err(_) => reply.signal.try_take().ok_or(AttError::UNLIKELY),
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Task-context half
// ───────────────────────────────────────────────────────────────

/// Run the handler for `request` in task context.
///
/// The handler receives a native completion function.  If it returns
/// without calling it, the request completes with the preset result.
pub fn serve<H: ScriptHost>(host: &mut H, tree: &ServiceTree<H::Value>, request: PendingRequest) {
    let responder = request.responder();
    if !responder.begin() {
        debug!("BRIDGE: serving {:?} after its waiter gave up", request.key);
    }

    let Some(chrc) = tree.get(request.key) else {
        warn!("BRIDGE: characteristic {:?} no longer registered", request.key);
        responder.complete(Completion::error(AttError::UNLIKELY));
        return;
    };

    let offset = host.number(f64::from(request.offset));
    let (handler, args, name) = match &request.kind {
        RequestKind::Read => {
            let Some(handler) = chrc.handlers.read.clone() else {
                responder.complete(Completion::error(AttError::UNLIKELY));
                return;
            };
            let callback = read_completion(host, responder.clone());
            (handler, vec![offset, callback], "onReadRequest")
        }
        RequestKind::Write(data) => {
            let Some(handler) = chrc.handlers.write.clone() else {
                responder.complete(Completion::error(AttError::UNLIKELY));
                return;
            };
            let buffer = if data.is_empty() {
                host.null()
            } else {
                let Some(buffer) = host.create_buffer(data) else {
                    warn!("BRIDGE: could not allocate {} byte write buffer", data.len());
                    responder.complete(Completion::error(AttError::UNLIKELY));
                    return;
                };
                buffer
            };
            let without_response = host.boolean(false);
            let callback = write_completion(host, responder.clone());
            (handler, vec![buffer, offset, without_response, callback], "onWriteRequest")
        }
    };

    if let Err(e) = host.call(&handler, &chrc.object, &args) {
        warn!("BRIDGE: {name} threw: {e}");
    }

    if responder.state() == RequestState::Running {
        warn!("BRIDGE: {name} returned without completing");
        responder.complete(Completion::preset());
    }
}

fn read_completion<H: ScriptHost>(host: &mut H, responder: Responder) -> H::Value {
    host.native_function(Box::new(move |host: &mut H, args: &[H::Value]| {
        let parsed = match args {
            [status, buffer] if host.kind(buffer).is_object() => {
                host.as_number(status).map(|s| (s, buffer))
            }
            _ => None,
        };
        let Some((status, buffer)) = parsed else {
            responder.complete(Completion::preset());
            return Err(ScriptError::new("onReadRequest callback: invalid arguments"));
        };
        let data = if host.kind(buffer) == ValueKind::Buffer {
            host.buffer_bytes(buffer).unwrap_or_default()
        } else {
            Vec::new()
        };
        responder.complete(Completion {
            status: AttError::from_status(status).code(),
            data,
        });
        Ok(host.undefined())
    }))
}

fn write_completion<H: ScriptHost>(host: &mut H, responder: Responder) -> H::Value {
    host.native_function(Box::new(move |host: &mut H, args: &[H::Value]| {
        let status = match args {
            [status] => host.as_number(status),
            _ => None,
        };
        let Some(status) = status else {
            responder.complete(Completion::preset());
            return Err(ScriptError::new("onWriteRequest callback: invalid arguments"));
        };
        responder.complete(Completion {
            status: AttError::from_status(status).code(),
            data: Vec::new(),
        });
        Ok(host.undefined())
    }))
}
