//! Descriptor model: the native form of a script's service description.
//!
//! ```text
//!  ServiceTree (generation N)
//!   ├─ Service 0 ─┬─ Characteristic 0   key {N, 0, 0}
//!   │             └─ Characteristic 1   key {N, 0, 1}
//!   └─ Service 1 ─── Characteristic 0   key {N, 1, 0}
//! ```
//!
//! The tree is an arena owned by the peripheral and replaced wholesale on
//! every `setServices`.  Attribute table entries refer to characteristics by
//! [`CharacteristicKey`]; a key from an older generation no longer resolves.

use core::fmt;

use super::att::Properties;
use super::table::AttributeRef;

// ── UUIDs ─────────────────────────────────────────────────────

/// Longest UUID text accepted from a script.
pub const MAX_UUID_TEXT_LEN: usize = 35;

/// A 16-bit Bluetooth UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid16(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidError {
    TooLong,
    Malformed,
}

impl fmt::Display for UuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong => write!(f, "UUID string too long"),
            Self::Malformed => write!(f, "UUID is not 16-bit hex"),
        }
    }
}

impl Uuid16 {
    /// Parse a service/characteristic/descriptor UUID: 1–4 hex digits with
    /// an optional `0x` prefix.
    pub fn parse(text: &str) -> Result<Self, UuidError> {
        if text.len() > MAX_UUID_TEXT_LEN {
            return Err(UuidError::TooLong);
        }
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(UuidError::Malformed);
        }
        u16::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| UuidError::Malformed)
    }

    /// Parse an advertised service UUID: exactly four hex characters.
    pub fn parse_exact(text: &str) -> Result<Self, UuidError> {
        if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(UuidError::Malformed);
        }
        u16::from_str_radix(text, 16)
            .map(Self)
            .map_err(|_| UuidError::Malformed)
    }

    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

// ── Characteristics ───────────────────────────────────────────

/// Stable address of a characteristic inside one tree generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicKey {
    pub generation: u32,
    pub service: u16,
    pub index: u16,
}

/// Script handlers attached to a characteristic.  A slot is only filled
/// when the script supplied something callable.
#[derive(Debug, Clone)]
pub struct Handlers<V> {
    pub read: Option<V>,
    pub write: Option<V>,
    pub subscribe: Option<V>,
    pub unsubscribe: Option<V>,
    pub notify: Option<V>,
}

impl<V> Default for Handlers<V> {
    fn default() -> Self {
        Self {
            read: None,
            write: None,
            subscribe: None,
            unsubscribe: None,
            notify: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Characteristic<V> {
    pub uuid: Uuid16,
    pub properties: Properties,
    /// Text of the Characteristic User Description, if the script gave one.
    pub description: Option<String>,
    /// The script object the characteristic was parsed from (`this` for
    /// handler calls).
    pub object: V,
    pub handlers: Handlers<V>,
    /// Location of the value attribute, filled in by the table builder.
    pub value_attr: Option<AttributeRef>,
    /// A client currently has notifications enabled.
    pub subscribed: bool,
}

impl<V> Characteristic<V> {
    pub fn new(uuid: Uuid16, object: V) -> Self {
        Self {
            uuid,
            properties: Properties::empty(),
            description: None,
            object,
            handlers: Handlers::default(),
            value_attr: None,
            subscribed: false,
        }
    }

    pub fn notifies(&self) -> bool {
        self.properties.contains(Properties::NOTIFY)
    }
}

// ── Services ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Service<V> {
    pub uuid: Uuid16,
    pub object: V,
    pub characteristics: Vec<Characteristic<V>>,
}

/// Generation-stamped arena of services.
#[derive(Debug, Clone)]
pub struct ServiceTree<V> {
    generation: u32,
    services: Vec<Service<V>>,
}

impl<V> ServiceTree<V> {
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            services: Vec::new(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn services(&self) -> &[Service<V>] {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut [Service<V>] {
        &mut self.services
    }

    pub fn push(&mut self, service: Service<V>) {
        self.services.push(service);
    }

    pub fn reserve(&mut self, additional: usize) -> Result<(), std::collections::TryReserveError> {
        self.services.try_reserve_exact(additional)
    }

    pub fn key(&self, service: usize, index: usize) -> CharacteristicKey {
        CharacteristicKey {
            generation: self.generation,
            service: service as u16,
            index: index as u16,
        }
    }

    /// Resolve a key; stale generations and out-of-range indices miss.
    pub fn get(&self, key: CharacteristicKey) -> Option<&Characteristic<V>> {
        if key.generation != self.generation {
            return None;
        }
        self.services
            .get(key.service as usize)?
            .characteristics
            .get(key.index as usize)
    }

    pub fn get_mut(&mut self, key: CharacteristicKey) -> Option<&mut Characteristic<V>> {
        if key.generation != self.generation {
            return None;
        }
        self.services
            .get_mut(key.service as usize)?
            .characteristics
            .get_mut(key.index as usize)
    }

    /// Every characteristic key in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = CharacteristicKey> + '_ {
        self.services.iter().enumerate().flat_map(move |(s, svc)| {
            (0..svc.characteristics.len()).map(move |c| self.key(s, c))
        })
    }

    pub fn characteristic_count(&self) -> usize {
        self.services.iter().map(|s| s.characteristics.len()).sum()
    }
}
