//! Application core, free of stack I/O.
//!
//! The script API, connection lifecycle and notification flow live in
//! [`service`].  Interaction with the scripting engine and the BLE stack
//! happens through the **port traits** in [`ports`], keeping this layer
//! fully testable with mock adapters.

pub mod events;
pub mod ports;
pub mod registry;
pub mod service;
