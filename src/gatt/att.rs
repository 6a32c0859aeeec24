//! ATT protocol constants: status codes, declaration UUIDs, property and
//! permission bits.

use core::fmt;

// ── Attribute type UUIDs (Bluetooth Assigned Numbers) ─────────

pub const PRIMARY_SERVICE_UUID: u16 = 0x2800;
pub const CHARACTERISTIC_UUID: u16 = 0x2803;
pub const CHAR_USER_DESCRIPTION_UUID: u16 = 0x2901;
pub const CLIENT_CHAR_CONFIG_UUID: u16 = 0x2902;

/// CCC value bit that enables notifications.
pub const CCC_NOTIFY: u16 = 0x0001;

// ── Status codes ──────────────────────────────────────────────

/// An ATT error code as carried in an ATT_ERROR_RSP.
///
/// Script handlers report arbitrary numeric statuses, so this is an open
/// newtype rather than a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttError(pub u8);

impl AttError {
    pub const INVALID_HANDLE: Self = Self(0x01);
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    pub const NOT_SUPPORTED: Self = Self(0x06);
    pub const INVALID_OFFSET: Self = Self(0x07);
    pub const ATTRIBUTE_NOT_LONG: Self = Self(0x0b);
    pub const INVALID_ATTRIBUTE_LEN: Self = Self(0x0d);
    pub const UNLIKELY: Self = Self(0x0e);

    /// Map a script-supplied status number onto a code.
    ///
    /// Anything that does not fit an ATT code collapses to `UNLIKELY`.
    pub fn from_status(status: f64) -> Self {
        if status.is_finite() && (0.0..=255.0).contains(&status) && status.fract() == 0.0 {
            Self(status as u8)
        } else {
            Self::UNLIKELY
        }
    }

    pub const fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::INVALID_HANDLE => "invalid handle",
            Self::READ_NOT_PERMITTED => "read not permitted",
            Self::WRITE_NOT_PERMITTED => "write not permitted",
            Self::NOT_SUPPORTED => "request not supported",
            Self::INVALID_OFFSET => "invalid offset",
            Self::ATTRIBUTE_NOT_LONG => "attribute not long",
            Self::INVALID_ATTRIBUTE_LEN => "invalid attribute length",
            Self::UNLIKELY => "unlikely error",
            _ => "application error",
        };
        write!(f, "{name} (0x{:02x})", self.0)
    }
}

/// Result codes exposed to scripts on every characteristic object.
pub const SCRIPT_RESULT_CODES: [(&str, u8); 5] = [
    ("RESULT_SUCCESS", 0x00),
    ("RESULT_INVALID_OFFSET", AttError::INVALID_OFFSET.0),
    ("RESULT_ATTR_NOT_LONG", AttError::ATTRIBUTE_NOT_LONG.0),
    ("RESULT_INVALID_ATTRIBUTE_LENGTH", AttError::INVALID_ATTRIBUTE_LEN.0),
    ("RESULT_UNLIKELY_ERROR", AttError::UNLIKELY.0),
];

// ── Characteristic properties ─────────────────────────────────

/// Characteristic property bits as they appear in the declaration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Properties(u8);

impl Properties {
    pub const READ: u8 = 0x02;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn insert(&mut self, bit: u8) {
        self.0 |= bit;
    }

    /// Map a script property name onto its bit.  Unknown names are ignored.
    pub fn bit_for_name(name: &str) -> Option<u8> {
        match name {
            "read" => Some(Self::READ),
            "write" => Some(Self::WRITE),
            "notify" => Some(Self::NOTIFY),
            _ => None,
        }
    }
}

// ── Attribute permissions ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(u8);

impl Permissions {
    pub const READ: u8 = 0x01;
    pub const WRITE: u8 = 0x02;

    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn read_only() -> Self {
        Self(Self::READ)
    }

    pub const fn read_write() -> Self {
        Self(Self::READ | Self::WRITE)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn readable(self) -> bool {
        self.0 & Self::READ != 0
    }

    pub const fn writable(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    pub fn insert(&mut self, bit: u8) {
        self.0 |= bit;
    }
}
