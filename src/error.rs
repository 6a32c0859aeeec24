//! Unified error types for the scriptable peripheral.
//!
//! A single `Error` enum that every subsystem converts into, so the script
//! API surface reports failures uniformly.  Sub-enums stay `Copy`; only the
//! script exception message carries an owned string.

use core::fmt;

use crate::gatt::att::AttError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible script-facing operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Script supplied a value of the wrong kind or shape.
    Argument(&'static str),
    /// A native allocation could not be satisfied.
    Allocation,
    /// An attribute operation failed with an ATT status code.
    Protocol(AttError),
    /// The protocol stack rejected a request.
    Stack(StackError),
    /// Internal bookkeeping disagreed with itself (count/fill mismatch).
    Internal(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(msg) => write!(f, "argument: {msg}"),
            Self::Allocation => write!(f, "out of memory"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Stack(e) => write!(f, "stack: {e}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<AttError> for Error {
    fn from(e: AttError) -> Self {
        Self::Protocol(e)
    }
}

impl From<StackError> for Error {
    fn from(e: StackError) -> Self {
        Self::Stack(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Stack errors
// ---------------------------------------------------------------------------

/// Failure reported by the peripheral protocol stack.
///
/// `code` is the raw stack status so it can be forwarded to scripts
/// (e.g. as the `advertisingStart` payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackError {
    pub op: StackOp,
    pub code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOp {
    Start,
    Register,
    Advertise,
    Notify,
    Disconnect,
}

impl StackError {
    pub const fn new(op: StackOp, code: i32) -> Self {
        Self { op, code }
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            StackOp::Start => "start",
            StackOp::Register => "register",
            StackOp::Advertise => "advertise",
            StackOp::Notify => "notify",
            StackOp::Disconnect => "disconnect",
        };
        write!(f, "{op} failed ({})", self.code)
    }
}

impl std::error::Error for StackError {}

// ---------------------------------------------------------------------------
// Script exceptions
// ---------------------------------------------------------------------------

/// An exception crossing the script boundary in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&Error> for ScriptError {
    fn from(e: &Error) -> Self {
        Self::new(e.to_string())
    }
}
