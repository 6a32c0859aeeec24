//! Inbound stack events and outbound script event payloads.
//!
//! The stack adapter posts [`StackEvent`]s from its callback context; the
//! [`Peripheral`](super::service::Peripheral) turns them into named script
//! events carrying an [`EventPayload`].

/// Opaque connection reference handed out by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u16);

/// Printable peer address, e.g. `"C0:11:22:33:44:55 (random)"`.
pub type PeerAddress = heapless::String<32>;

/// Events reported by the protocol stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// The stack finished initialising (`status` 0 on success).
    Ready { status: i32 },

    /// A central connected; this becomes the default connection.
    Connected { conn: ConnectionId, address: PeerAddress },

    /// A connection attempt failed before it was established.
    ConnectFailed { status: u8 },

    /// A connection ended.
    Disconnected { conn: ConnectionId, reason: u8 },
}

/// Argument passed to a registered script event handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Int(i32),
    Text(PeerAddress),
}

impl EventPayload {
    /// Build a text payload, truncating at the address capacity.
    pub fn text(s: &str) -> Self {
        let mut out = PeerAddress::new();
        for c in s.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        Self::Text(out)
    }
}

/// Names of the lifecycle events the peripheral emits.
pub mod names {
    pub const STATE_CHANGE: &str = "stateChange";
    pub const ACCEPT: &str = "accept";
    pub const DISCONNECT: &str = "disconnect";
    pub const ADVERTISING_START: &str = "advertisingStart";

    /// Payload of `stateChange` once the stack is up.
    pub const POWERED_ON: &str = "poweredOn";
}
