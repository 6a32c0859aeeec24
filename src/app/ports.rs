//! Port traits: the hexagonal boundary between the peripheral core and the
//! two things it drives, a scripting engine and a BLE protocol stack.
//!
//! ```text
//!   ScriptHost ◀──┐                       ┌──▶ PeripheralStack
//!                 │   Peripheral (core)   │
//!   scripts ─────▶└───────────────────────┘◀── stack callbacks (bridge)
//! ```
//!
//! Neither trait knows about the other.  The core consumes both via
//! generics, so the whole peripheral is testable with mock adapters.

use crate::advertising::AdvertisingData;
use crate::error::{ScriptError, StackError};
use crate::gatt::table::{AttributeRef, AttributeTable};

use super::events::ConnectionId;

// ───────────────────────────────────────────────────────────────
// Script host port (driven adapter: core ↔ scripting engine)
// ───────────────────────────────────────────────────────────────

/// Coarse classification of a script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Function,
    Buffer,
}

impl ValueKind {
    /// Arrays, functions and buffers are objects too.
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object | Self::Array | Self::Function | Self::Buffer)
    }

    pub const fn is_nullish(self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }
}

/// A native function exposed to scripts.  Receives the host and the call
/// arguments; returning `Err` raises an exception in the calling script.
pub type NativeFn<H> = Box<
    dyn FnMut(&mut H, &[<H as ScriptHost>::Value]) -> Result<<H as ScriptHost>::Value, ScriptError>,
>;

/// The scripting engine as seen by the peripheral.
///
/// `Value` is a reference-counted handle: `Clone` acquires, `Drop`
/// releases.  Getters on absent properties return `undefined`.
pub trait ScriptHost: Sized + 'static {
    type Value: Clone + core::fmt::Debug;

    fn undefined(&mut self) -> Self::Value;
    fn null(&mut self) -> Self::Value;
    fn boolean(&mut self, b: bool) -> Self::Value;
    fn number(&mut self, n: f64) -> Self::Value;
    fn string(&mut self, s: &str) -> Self::Value;

    fn kind(&self, value: &Self::Value) -> ValueKind;

    fn get(&mut self, object: &Self::Value, name: &str) -> Self::Value;
    fn set(&mut self, object: &Self::Value, name: &str, value: Self::Value);

    fn as_number(&self, value: &Self::Value) -> Option<f64>;
    fn as_string(&self, value: &Self::Value) -> Option<String>;

    /// `None` when `value` is not an array.
    fn array_len(&self, value: &Self::Value) -> Option<usize>;
    fn array_get(&mut self, array: &Self::Value, index: usize) -> Self::Value;

    fn call(
        &mut self,
        function: &Self::Value,
        this: &Self::Value,
        args: &[Self::Value],
    ) -> Result<Self::Value, ScriptError>;

    fn native_function(&mut self, f: NativeFn<Self>) -> Self::Value;

    /// Allocate a script buffer holding a copy of `bytes`.
    fn create_buffer(&mut self, bytes: &[u8]) -> Option<Self::Value>;
    /// Copy out the bytes of a script buffer; `None` if not a buffer.
    fn buffer_bytes(&self, value: &Self::Value) -> Option<Vec<u8>>;

    fn is_callable(&self, value: &Self::Value) -> bool {
        self.kind(value) == ValueKind::Function
    }
}

// ───────────────────────────────────────────────────────────────
// Peripheral stack port (driven adapter: core → BLE stack)
// ───────────────────────────────────────────────────────────────

/// The BLE protocol stack, treated as a black box.
///
/// Attribute reads and writes flow the other way: the stack adapter holds a
/// [`CallbackBridge`](crate::gatt::bridge::CallbackBridge) and calls its
/// entry points from the stack's own callback context.
pub trait PeripheralStack {
    /// Register every table of a service set in one step.  On error nothing
    /// from the batch stays registered.
    fn register(&mut self, tables: Vec<AttributeTable>) -> Result<(), StackError>;

    /// Drop every table previously registered.
    fn unregister_all(&mut self);

    fn start_advertising(&mut self, data: &AdvertisingData) -> Result<(), StackError>;

    fn stop_advertising(&mut self) -> Result<(), StackError>;

    /// Send a notification carrying `value` on the attribute at `attr`.
    fn notify(
        &mut self,
        conn: ConnectionId,
        attr: AttributeRef,
        value: &[u8],
    ) -> Result<(), StackError>;

    fn disconnect(&mut self, conn: ConnectionId) -> Result<(), StackError>;
}
