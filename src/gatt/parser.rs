//! Object parser: script service descriptions → [`ServiceTree`].
//!
//! Expected shape (all keys case-sensitive):
//!
//! ```text
//! [ { uuid: "180f",
//!     characteristics: [ { uuid: "2a19",
//!                          properties: ["read", "notify"],
//!                          descriptors: [ { uuid: "2901", value: "Level" } ],
//!                          onReadRequest, onWriteRequest,
//!                          onSubscribe, onUnsubscribe, onNotify } ] } ]
//! ```
//!
//! Any missing or malformed mandatory field fails the whole batch; nothing
//! partial is returned.

use core::fmt;

use log::warn;

use super::att::{CHAR_USER_DESCRIPTION_UUID, Properties};
use super::model::{Characteristic, Handlers, Service, ServiceTree, Uuid16, UuidError};
use crate::app::ports::ScriptHost;

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    ServicesNotArray,
    ServiceNotObject,
    CharacteristicsNotArray,
    CharacteristicNotObject,
    PropertiesNotArray,
    PropertyNotString,
    DescriptorsNotArray,
    DescriptorNotObject,
    MissingUuid(Level),
    InvalidUuid(Level, UuidError),
    Allocation,
}

/// Which level of the description a UUID problem was found at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Service,
    Characteristic,
    Descriptor,
}

impl ParseError {
    pub const fn message(self) -> &'static str {
        match self {
            Self::ServicesNotArray => "services is not an array",
            Self::ServiceNotObject => "service is not an object",
            Self::CharacteristicsNotArray => "characteristics is empty or not an array",
            Self::CharacteristicNotObject => "characteristic is not an object",
            Self::PropertiesNotArray => "properties is empty or not an array",
            Self::PropertyNotString => "property is not a string",
            Self::DescriptorsNotArray => "descriptors is not an array",
            Self::DescriptorNotObject => "descriptor is not an object",
            Self::MissingUuid(Level::Service) => "service uuid doesn't exist",
            Self::MissingUuid(Level::Characteristic) => "characteristic uuid doesn't exist",
            Self::MissingUuid(Level::Descriptor) => "descriptor uuid doesn't exist",
            Self::InvalidUuid(Level::Service, _) => "service uuid is invalid",
            Self::InvalidUuid(Level::Characteristic, _) => "characteristic uuid is invalid",
            Self::InvalidUuid(Level::Descriptor, _) => "descriptor uuid is invalid",
            Self::Allocation => "out of memory",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUuid(_, cause) => write!(f, "{} ({cause})", self.message()),
            _ => f.write_str(self.message()),
        }
    }
}

impl From<ParseError> for crate::error::Error {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Allocation => Self::Allocation,
            other => Self::Argument(other.message()),
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────

/// Parse an array of service objects into a fresh tree stamped with
/// `generation`.
pub fn parse_services<H: ScriptHost>(
    host: &mut H,
    services: &H::Value,
    generation: u32,
) -> Result<ServiceTree<H::Value>, ParseError> {
    let len = host.array_len(services).ok_or(ParseError::ServicesNotArray)?;

    let mut tree = ServiceTree::new(generation);
    tree.reserve(len).map_err(|_| ParseError::Allocation)?;

    for i in 0..len {
        let object = host.array_get(services, i);
        let service = parse_service(host, object).inspect_err(|e| {
            warn!("GATT: service {i} rejected: {e}");
        })?;
        tree.push(service);
    }
    Ok(tree)
}

fn parse_service<H: ScriptHost>(
    host: &mut H,
    object: H::Value,
) -> Result<Service<H::Value>, ParseError> {
    if !host.kind(&object).is_object() {
        return Err(ParseError::ServiceNotObject);
    }
    let uuid = uuid_field(host, &object, Level::Service)?;

    let list = host.get(&object, "characteristics");
    let len = host
        .array_len(&list)
        .ok_or(ParseError::CharacteristicsNotArray)?;

    let mut characteristics = Vec::new();
    characteristics
        .try_reserve_exact(len)
        .map_err(|_| ParseError::Allocation)?;
    for i in 0..len {
        let item = host.array_get(&list, i);
        if !host.kind(&item).is_object() {
            return Err(ParseError::CharacteristicNotObject);
        }
        characteristics.push(parse_characteristic(host, item)?);
    }

    Ok(Service {
        uuid,
        object,
        characteristics,
    })
}

/// Parse one characteristic object.  Handler slots are only filled with
/// callable values.
pub fn parse_characteristic<H: ScriptHost>(
    host: &mut H,
    object: H::Value,
) -> Result<Characteristic<H::Value>, ParseError> {
    let uuid = uuid_field(host, &object, Level::Characteristic)?;
    let mut chrc = Characteristic::new(uuid, object.clone());

    let props = host.get(&object, "properties");
    let len = host.array_len(&props).ok_or(ParseError::PropertiesNotArray)?;
    for i in 0..len {
        let item = host.array_get(&props, i);
        let name = host.as_string(&item).ok_or(ParseError::PropertyNotString)?;
        if let Some(bit) = Properties::bit_for_name(&name) {
            chrc.properties.insert(bit);
        }
    }

    let descriptors = host.get(&object, "descriptors");
    if !host.kind(&descriptors).is_nullish() {
        let len = host
            .array_len(&descriptors)
            .ok_or(ParseError::DescriptorsNotArray)?;
        for i in 0..len {
            let desc = host.array_get(&descriptors, i);
            if !host.kind(&desc).is_object() {
                return Err(ParseError::DescriptorNotObject);
            }
            let desc_uuid = uuid_field(host, &desc, Level::Descriptor)?;
            // Only the user description is interpreted; others are ignored.
            if desc_uuid.0 == CHAR_USER_DESCRIPTION_UUID {
                let value = host.get(&desc, "value");
                if let Some(text) = host.as_string(&value) {
                    chrc.description = Some(text);
                }
            }
        }
    }

    chrc.handlers = Handlers {
        read: callable_field(host, &object, "onReadRequest"),
        write: callable_field(host, &object, "onWriteRequest"),
        subscribe: callable_field(host, &object, "onSubscribe"),
        unsubscribe: callable_field(host, &object, "onUnsubscribe"),
        notify: callable_field(host, &object, "onNotify"),
    };

    Ok(chrc)
}

fn uuid_field<H: ScriptHost>(
    host: &mut H,
    object: &H::Value,
    level: Level,
) -> Result<Uuid16, ParseError> {
    let value = host.get(object, "uuid");
    let text = host.as_string(&value).ok_or(ParseError::MissingUuid(level))?;
    Uuid16::parse(&text).map_err(|e| ParseError::InvalidUuid(level, e))
}

fn callable_field<H: ScriptHost>(host: &mut H, object: &H::Value, name: &str) -> Option<H::Value> {
    let value = host.get(object, name);
    host.is_callable(&value).then_some(value)
}
