//! Attribute table builder.
//!
//! Turns one [`Service`] into the flat attribute array a GATT server
//! registers.  Two passes: count first, allocate exactly once (fallibly),
//! then fill.  Layout per service:
//!
//! ```text
//!  [0]  primary service declaration (0x2800)
//!  per characteristic:
//!       characteristic declaration (0x2803)
//!       value                       (characteristic UUID, bridged)
//!       user description (0x2901)   iff the script gave a description
//!       client config    (0x2902)   iff the characteristic notifies
//! ```
//!
//! Everything except the value entry is answered statically; value entries
//! carry the [`CharacteristicKey`] the bridge resolves in task context.

use core::fmt;

use super::att::{
    AttError, CHAR_USER_DESCRIPTION_UUID, CHARACTERISTIC_UUID, CLIENT_CHAR_CONFIG_UUID,
    PRIMARY_SERVICE_UUID, Permissions, Properties,
};
use super::model::{CharacteristicKey, Service, ServiceTree, Uuid16};

// ───────────────────────────────────────────────────────────────
// Entries
// ───────────────────────────────────────────────────────────────

/// Position of an entry within a registered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeRef {
    pub table: u16,
    pub entry: u16,
}

/// What an entry holds, which also selects how it is accessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    ServiceDeclaration(Uuid16),
    CharacteristicDeclaration { uuid: Uuid16, properties: Properties },
    /// Read and written through the callback bridge.
    Value(CharacteristicKey),
    UserDescription(String),
    ClientConfig(CharacteristicKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEntry {
    pub uuid: Uuid16,
    pub permissions: Permissions,
    pub value: AttributeValue,
}

impl AttributeEntry {
    /// The value of a statically answered entry.  `None` for bridged
    /// value entries.
    pub fn static_value(&self) -> Option<Vec<u8>> {
        match &self.value {
            AttributeValue::ServiceDeclaration(uuid) => Some(uuid.to_le_bytes().to_vec()),
            AttributeValue::CharacteristicDeclaration { properties, .. } => {
                Some(vec![properties.bits()])
            }
            AttributeValue::UserDescription(text) => Some(text.as_bytes().to_vec()),
            AttributeValue::ClientConfig(_) => Some(vec![0, 0]),
            AttributeValue::Value(_) => None,
        }
    }

    /// Serve a read of a static entry starting at `offset`.
    pub fn read_static(&self, offset: u16, dest: &mut [u8]) -> Result<usize, AttError> {
        let value = self.static_value().ok_or(AttError::UNLIKELY)?;
        let offset = offset as usize;
        if offset > value.len() {
            return Err(AttError::INVALID_OFFSET);
        }
        let n = (value.len() - offset).min(dest.len());
        dest[..n].copy_from_slice(&value[offset..offset + n]);
        Ok(n)
    }

    pub fn characteristic(&self) -> Option<CharacteristicKey> {
        match self.value {
            AttributeValue::Value(key) | AttributeValue::ClientConfig(key) => Some(key),
            _ => None,
        }
    }
}

/// The attribute array of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTable {
    pub service: Uuid16,
    pub entries: Vec<AttributeEntry>,
}

impl AttributeTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AttributeEntry> {
        self.entries.get(index)
    }
}

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// The entry array could not be allocated.
    Allocation,
    /// Fill produced a different number of entries than count predicted.
    CountMismatch { counted: usize, filled: usize },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation => write!(f, "attribute table allocation failed"),
            Self::CountMismatch { counted, filled } => {
                write!(f, "attribute count mismatch: counted {counted}, filled {filled}")
            }
        }
    }
}

impl From<BuildError> for crate::error::Error {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Allocation => Self::Allocation,
            BuildError::CountMismatch { .. } => Self::Internal("attribute count mismatch"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Builder
// ───────────────────────────────────────────────────────────────

/// Pass one: number of entries the service will occupy.
pub fn count_entries<V>(service: &Service<V>) -> usize {
    1 + service
        .characteristics
        .iter()
        .map(|c| 2 + usize::from(c.description.is_some()) + usize::from(c.notifies()))
        .sum::<usize>()
}

/// Pass two: build the table for service `index` of `tree`.
///
/// Returns the table and the entry index of each characteristic's value
/// attribute, in characteristic order.
pub fn build_table<V>(
    tree: &ServiceTree<V>,
    index: usize,
) -> Result<(AttributeTable, Vec<u16>), BuildError> {
    let service = &tree.services()[index];
    let counted = count_entries(service);

    let mut entries = Vec::new();
    entries
        .try_reserve_exact(counted)
        .map_err(|_| BuildError::Allocation)?;
    let mut value_slots = Vec::new();
    value_slots
        .try_reserve_exact(service.characteristics.len())
        .map_err(|_| BuildError::Allocation)?;

    entries.push(AttributeEntry {
        uuid: Uuid16(PRIMARY_SERVICE_UUID),
        permissions: Permissions::read_only(),
        value: AttributeValue::ServiceDeclaration(service.uuid),
    });

    for (c, chrc) in service.characteristics.iter().enumerate() {
        let key = tree.key(index, c);

        entries.push(AttributeEntry {
            uuid: Uuid16(CHARACTERISTIC_UUID),
            permissions: Permissions::read_only(),
            value: AttributeValue::CharacteristicDeclaration {
                uuid: chrc.uuid,
                properties: chrc.properties,
            },
        });

        // Access follows the handlers, not the advertised properties.
        let mut permissions = Permissions::none();
        if chrc.handlers.read.is_some() {
            permissions.insert(Permissions::READ);
        }
        if chrc.handlers.write.is_some() {
            permissions.insert(Permissions::WRITE);
        }
        value_slots.push(entries.len() as u16);
        entries.push(AttributeEntry {
            uuid: chrc.uuid,
            permissions,
            value: AttributeValue::Value(key),
        });

        if let Some(text) = &chrc.description {
            entries.push(AttributeEntry {
                uuid: Uuid16(CHAR_USER_DESCRIPTION_UUID),
                permissions: Permissions::read_only(),
                value: AttributeValue::UserDescription(text.clone()),
            });
        }

        if chrc.notifies() {
            entries.push(AttributeEntry {
                uuid: Uuid16(CLIENT_CHAR_CONFIG_UUID),
                permissions: Permissions::read_write(),
                value: AttributeValue::ClientConfig(key),
            });
        }
    }

    if entries.len() != counted {
        return Err(BuildError::CountMismatch {
            counted,
            filled: entries.len(),
        });
    }

    Ok((
        AttributeTable {
            service: service.uuid,
            entries,
        },
        value_slots,
    ))
}

/// Build every table of `tree` before anything is handed to the stack,
/// then record each characteristic's value location.
pub fn build_all<V>(tree: &mut ServiceTree<V>) -> Result<Vec<AttributeTable>, BuildError> {
    let mut tables = Vec::new();
    tables
        .try_reserve_exact(tree.services().len())
        .map_err(|_| BuildError::Allocation)?;
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(tree.services().len())
        .map_err(|_| BuildError::Allocation)?;

    for index in 0..tree.services().len() {
        let (table, value_slots) = build_table(tree, index)?;
        tables.push(table);
        slots.push(value_slots);
    }

    for (t, (service, value_slots)) in tree.services_mut().iter_mut().zip(slots).enumerate() {
        for (chrc, entry) in service.characteristics.iter_mut().zip(value_slots) {
            chrc.value_attr = Some(AttributeRef {
                table: t as u16,
                entry,
            });
        }
    }

    Ok(tables)
}
