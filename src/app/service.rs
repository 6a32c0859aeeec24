//! Peripheral service, the hexagonal core.
//!
//! [`Peripheral`] owns the service tree, the event registry, the default
//! connection and the work queue shared with the stack context.  It exposes
//! the script API (`on`, `setServices`, `startAdvertising`, …) and one
//! servicing entry point, [`Peripheral::service`], which the task loop calls
//! once per scheduling pass.
//!
//! ```text
//!  ScriptHost ──▶ ┌─────────────────────────────┐ ──▶ PeripheralStack
//!                 │         Peripheral          │
//!   service() ──▶ │ tree · registry · outbox    │ ◀── CallbackBridge
//!                 └─────────────────────────────┘      (stack context)
//! ```
//!
//! The script host is passed into every call rather than owned, so the
//! engine stays in charge of its own lifetime.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::advertising::AdvertisingData;
use crate::config::PeripheralConfig;
use crate::error::{Error, Result, ScriptError};
use crate::events::{WorkItem, WorkQueue};
use crate::gatt::att::SCRIPT_RESULT_CODES;
use crate::gatt::bridge::{self, CallbackBridge};
use crate::gatt::model::{CharacteristicKey, ServiceTree};
use crate::gatt::{parser, table};

use super::events::{ConnectionId, EventPayload, PeerAddress, StackEvent, names};
use super::ports::{PeripheralStack, ScriptHost, ValueKind};
use super::registry::EventRegistry;

// ───────────────────────────────────────────────────────────────
// State
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    /// Waiting for the stack to report ready.
    PoweredOff,
    Idle,
    Advertising,
    Connected,
}

struct Connection {
    id: ConnectionId,
    address: PeerAddress,
}

/// A value queued by a script's `updateValueCallback`.
struct Notification {
    key: CharacteristicKey,
    value: Vec<u8>,
}

type Outbox = Rc<RefCell<VecDeque<Notification>>>;

// ───────────────────────────────────────────────────────────────
// Peripheral
// ───────────────────────────────────────────────────────────────

pub struct Peripheral<H: ScriptHost, S: PeripheralStack> {
    config: PeripheralConfig,
    stack: S,
    queue: Arc<WorkQueue>,
    bridge: CallbackBridge,
    tree: ServiceTree<H::Value>,
    registered: bool,
    registry: EventRegistry<H::Value>,
    connection: Option<Connection>,
    outbox: Outbox,
    state: PeripheralState,
}

impl<H: ScriptHost, S: PeripheralStack> Peripheral<H, S> {
    pub fn new(config: PeripheralConfig, stack: S) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let bridge = CallbackBridge::new(Arc::clone(&queue), config.callback_timeout());
        Self {
            config,
            stack,
            queue,
            bridge,
            tree: ServiceTree::new(0),
            registered: false,
            registry: EventRegistry::new(),
            connection: None,
            outbox: Rc::new(RefCell::new(VecDeque::new())),
            state: PeripheralState::PoweredOff,
        }
    }

    /// Handle for the stack adapter's callback context.
    pub fn bridge(&self) -> CallbackBridge {
        self.bridge.clone()
    }

    pub fn state(&self) -> PeripheralState {
        self.state
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn services(&self) -> &ServiceTree<H::Value> {
        &self.tree
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|c| c.id)
    }

    pub fn pending_work(&self) -> usize {
        self.queue.len()
    }

    // ── Script API ────────────────────────────────────────────

    /// `on(eventName, handler)`
    pub fn on(&mut self, host: &mut H, name: &H::Value, handler: &H::Value) -> Result<()> {
        let Some(name) = host.as_string(name) else {
            return Err(Error::Argument("on: invalid arguments"));
        };
        if !host.kind(handler).is_object() {
            return Err(Error::Argument("on: invalid arguments"));
        }
        self.registry.register(&name, handler.clone())?;
        debug!("EVENT: handler registered for '{name}'");
        Ok(())
    }

    /// `startAdvertising(name, uuids, url?)`
    pub fn start_advertising(
        &mut self,
        host: &mut H,
        name: &H::Value,
        uuids: &H::Value,
        url: Option<&H::Value>,
    ) -> Result<()> {
        let name = host
            .as_string(name)
            .ok_or(Error::Argument("startAdvertising: invalid arguments"))?;
        let url = match url {
            Some(v) => Some(
                host.as_string(v)
                    .ok_or(Error::Argument("startAdvertising: invalid arguments"))?,
            ),
            None => None,
        };
        let count = host
            .array_len(uuids)
            .ok_or(Error::Argument("startAdvertising: expected array"))?;

        let mut list = Vec::with_capacity(count);
        for i in 0..count {
            let item = host.array_get(uuids, i);
            let text = host
                .as_string(&item)
                .ok_or(Error::Argument("startAdvertising: invalid uuid argument type"))?;
            list.push(text);
        }

        let data = AdvertisingData::build(&name, &list, url.as_deref(), self.config.tx_power)?;

        let status = match self.stack.start_advertising(&data) {
            Ok(()) => {
                info!("BLE: advertising as '{name}' ({} records)", data.records.len());
                if self.state != PeripheralState::Connected {
                    self.state = PeripheralState::Advertising;
                }
                0
            }
            Err(e) => {
                warn!("BLE: {e}");
                e.code
            }
        };
        self.registry
            .dispatch(&self.queue, names::ADVERTISING_START, EventPayload::Int(status));
        Ok(())
    }

    /// `stopAdvertising()`
    pub fn stop_advertising(&mut self) -> Result<()> {
        self.stack.stop_advertising()?;
        if self.state == PeripheralState::Advertising {
            self.state = PeripheralState::Idle;
        }
        info!("BLE: advertising stopped");
        Ok(())
    }

    /// `setServices(services, callback?)`
    ///
    /// Argument errors leave the current services untouched.  Otherwise the
    /// current services are released first, then the new set is parsed,
    /// built and registered as one batch.
    pub fn set_services(
        &mut self,
        host: &mut H,
        services: &H::Value,
        callback: Option<&H::Value>,
    ) -> Result<()> {
        let Some(len) = host.array_len(services) else {
            return Err(Error::Argument("setServices: invalid arguments"));
        };
        if callback.is_some_and(|cb| !host.is_callable(cb)) {
            return Err(Error::Argument("setServices: invalid arguments"));
        }
        if len == 0 {
            return Err(Error::Argument("setServices: services array is empty"));
        }

        self.release_services();

        let generation = self.tree.generation().wrapping_add(1);
        self.tree = parser::parse_services(host, services, generation)?;
        info!(
            "GATT: parsed {} service(s), {} characteristic(s)",
            self.tree.services().len(),
            self.tree.characteristic_count()
        );

        if self.config.subscribe_at_parse {
            let keys: Vec<_> = self.tree.keys().collect();
            for key in keys {
                self.invoke_subscribe(host, key);
            }
        }

        let outcome = self.register_services();
        if let Err(e) = &outcome {
            error!("GATT: registration failed: {e}");
        }

        if let Some(cb) = callback {
            let arg = match outcome {
                Ok(()) => host.undefined(),
                Err(_) => host.string("failed to register services"),
            };
            let this = host.undefined();
            if let Err(e) = host.call(cb, &this, &[arg]) {
                warn!("GATT: setServices callback threw: {e}");
            }
        }

        self.flush_notifications(host);
        Ok(())
    }

    /// `disconnect()`. A no-op without a connection.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = &self.connection {
            self.stack.disconnect(conn.id)?;
            info!("BLE: disconnect requested for {}", conn.address);
        }
        Ok(())
    }

    /// `PrimaryService(obj)`: returns `obj`.
    pub fn primary_service(&self, host: &mut H, object: &H::Value) -> Result<H::Value> {
        require_object(host, object, "PrimaryService: invalid arguments")?;
        Ok(object.clone())
    }

    /// `Characteristic(obj)`: stamps the result codes onto `obj`.
    pub fn characteristic(&self, host: &mut H, object: &H::Value) -> Result<H::Value> {
        require_object(host, object, "Characteristic: invalid arguments")?;
        for (name, code) in SCRIPT_RESULT_CODES {
            let value = host.number(f64::from(code));
            host.set(object, name, value);
        }
        Ok(object.clone())
    }

    /// `Descriptor(obj)`: returns `obj`.
    pub fn descriptor(&self, host: &mut H, object: &H::Value) -> Result<H::Value> {
        require_object(host, object, "Descriptor: invalid arguments")?;
        Ok(object.clone())
    }

    // ── Task loop ─────────────────────────────────────────────

    /// Run one servicing pass over the work queue.  Returns the number of
    /// work items handled.
    pub fn service(&mut self, host: &mut H) -> usize {
        self.flush_notifications(host);
        let queue = Arc::clone(&self.queue);
        let handled = queue.drain_pass(|item| self.handle_work(host, item));
        self.flush_notifications(host);
        handled
    }

    fn handle_work(&mut self, host: &mut H, item: WorkItem) {
        match item {
            WorkItem::Request(request) => bridge::serve(host, &self.tree, request),
            WorkItem::Subscription { key, enabled } => self.on_subscription(host, key, enabled),
            WorkItem::Stack(event) => self.on_stack_event(host, event),
            WorkItem::Dispatch { slot, payload } => self.run_event_handler(host, slot, &payload),
        }
        self.flush_notifications(host);
    }

    /// Release everything tied to the current service set.
    pub fn release_services(&mut self) {
        if self.registered {
            self.stack.unregister_all();
            self.registered = false;
            info!("GATT: previous services released");
        }
        self.tree = ServiceTree::new(self.tree.generation());
        self.outbox.borrow_mut().clear();
    }

    fn register_services(&mut self) -> Result<()> {
        let tables = table::build_all(&mut self.tree)?;
        let count = tables.len();
        self.stack.register(tables)?;
        self.registered = true;
        info!("GATT: registered {count} service table(s)");
        Ok(())
    }

    // ── Stack lifecycle ───────────────────────────────────────

    fn on_stack_event(&mut self, host: &mut H, event: StackEvent) {
        match event {
            StackEvent::Ready { status } => {
                if status != 0 {
                    error!("BLE: stack failed to start ({status})");
                    return;
                }
                info!("BLE: stack ready");
                self.state = PeripheralState::Idle;
                if self.registry.is_empty() {
                    info!("EVENT: no event handlers present");
                }
                self.emit(host, names::STATE_CHANGE, &EventPayload::text(names::POWERED_ON));
            }
            StackEvent::Connected { conn, address } => {
                info!("BLE: connected to {address}");
                self.connection = Some(Connection {
                    id: conn,
                    address: address.clone(),
                });
                self.state = PeripheralState::Connected;
                self.emit(host, names::ACCEPT, &EventPayload::Text(address));
            }
            StackEvent::ConnectFailed { status } => {
                warn!("BLE: connection failed ({status})");
            }
            StackEvent::Disconnected { conn, reason } => {
                let address = match self.connection.take() {
                    Some(c) if c.id == conn => c.address,
                    other => {
                        self.connection = other;
                        debug!("BLE: disconnect for unknown connection {conn:?}");
                        return;
                    }
                };
                info!("BLE: disconnected from {address} (reason {reason})");
                self.state = PeripheralState::Idle;
                self.end_subscriptions(host);
                self.emit(host, names::DISCONNECT, &EventPayload::Text(address));
            }
        }
    }

    /// Run the handler for `name` now.  Stack events are already handled
    /// in task context, so they reach the script in the same pass.
    fn emit(&mut self, host: &mut H, name: &str, payload: &EventPayload) {
        let Some(handler) = self.registry.find(name).cloned() else {
            debug!("EVENT: no handler for '{name}'");
            return;
        };
        self.call_event_handler(host, &handler, payload);
    }

    fn run_event_handler(&mut self, host: &mut H, slot: usize, payload: &EventPayload) {
        let Some(handler) = self.registry.handler(slot).cloned() else {
            return;
        };
        self.call_event_handler(host, &handler, payload);
    }

    fn call_event_handler(&self, host: &mut H, handler: &H::Value, payload: &EventPayload) {
        let arg = match payload {
            EventPayload::Int(n) => host.number(f64::from(*n)),
            EventPayload::Text(s) => host.string(s),
        };
        let this = host.undefined();
        if let Err(e) = host.call(handler, &this, &[arg]) {
            warn!("EVENT: handler threw: {e}");
        }
    }

    // ── Notifications ─────────────────────────────────────────

    fn on_subscription(&mut self, host: &mut H, key: CharacteristicKey, enabled: bool) {
        let Some(chrc) = self.tree.get_mut(key) else {
            debug!("GATT: subscription change for stale {key:?}");
            return;
        };
        if chrc.subscribed == enabled {
            return;
        }
        chrc.subscribed = enabled;

        if enabled {
            if !self.config.subscribe_at_parse {
                self.invoke_subscribe(host, key);
            }
        } else {
            self.invoke_unsubscribe(host, key);
        }
    }

    fn end_subscriptions(&mut self, host: &mut H) {
        let keys: Vec<_> = self
            .tree
            .keys()
            .filter(|k| self.tree.get(*k).is_some_and(|c| c.subscribed))
            .collect();
        for key in keys {
            if let Some(chrc) = self.tree.get_mut(key) {
                chrc.subscribed = false;
            }
            self.invoke_unsubscribe(host, key);
        }
    }

    fn invoke_subscribe(&mut self, host: &mut H, key: CharacteristicKey) {
        let Some(chrc) = self.tree.get(key) else { return };
        let Some(handler) = chrc.handlers.subscribe.clone() else {
            return;
        };
        let this = chrc.object.clone();
        let size = host.number(f64::from(self.config.subscribe_max_value_size));
        let update = update_value_callback(host, Rc::clone(&self.outbox), key);
        if let Err(e) = host.call(&handler, &this, &[size, update]) {
            warn!("GATT: onSubscribe threw: {e}");
        }
    }

    fn invoke_unsubscribe(&mut self, host: &mut H, key: CharacteristicKey) {
        let Some(chrc) = self.tree.get(key) else { return };
        let Some(handler) = chrc.handlers.unsubscribe.clone() else {
            return;
        };
        let this = chrc.object.clone();
        if let Err(e) = host.call(&handler, &this, &[]) {
            warn!("GATT: onUnsubscribe threw: {e}");
        }
    }

    fn flush_notifications(&mut self, host: &mut H) {
        loop {
            let next = self.outbox.borrow_mut().pop_front();
            let Some(notification) = next else { break };
            self.send_notification(host, &notification);
        }
    }

    fn send_notification(&mut self, host: &mut H, notification: &Notification) {
        let Some(conn) = self.connection() else {
            debug!("GATT: no connection, notification dropped");
            return;
        };
        let Some(chrc) = self.tree.get(notification.key) else {
            return;
        };
        let Some(attr) = chrc.value_attr else {
            warn!("GATT: {} has no registered value attribute", chrc.uuid);
            return;
        };
        let on_notify = chrc.handlers.notify.clone();
        let this = chrc.object.clone();

        if let Err(e) = self.stack.notify(conn, attr, &notification.value) {
            warn!("GATT: {e}");
            return;
        }
        if let Some(handler) = on_notify {
            if let Err(e) = host.call(&handler, &this, &[]) {
                warn!("GATT: onNotify threw: {e}");
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────

fn require_object<H: ScriptHost>(host: &H, value: &H::Value, msg: &'static str) -> Result<()> {
    if host.kind(value).is_object() {
        Ok(())
    } else {
        Err(Error::Argument(msg))
    }
}

/// The `updateValueCallback(buffer)` handed to `onSubscribe`.
fn update_value_callback<H: ScriptHost>(
    host: &mut H,
    outbox: Outbox,
    key: CharacteristicKey,
) -> H::Value {
    host.native_function(Box::new(move |host: &mut H, args: &[H::Value]| {
        let bytes = match args.first() {
            Some(v) if host.kind(v) == ValueKind::Buffer => host.buffer_bytes(v),
            _ => None,
        };
        let Some(value) = bytes else {
            return Err(ScriptError::new("updateValueCallback: invalid arguments"));
        };
        outbox.borrow_mut().push_back(Notification { key, value });
        Ok(host.undefined())
    }))
}
