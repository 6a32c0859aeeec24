//! Advertising payloads and the Eddystone-URL frame encoder.
//!
//! ## URL frame layout
//!
//! | Byte | Field                         |
//! |------|-------------------------------|
//! | 0–1  | Eddystone service `0xFEAA` LE |
//! | 2    | frame type `0x10` (URL)       |
//! | 3    | TX power at 0 m               |
//! | 4    | scheme code                   |
//! | 5..  | path, at most 17 bytes        |
//!
//! Scheme codes: `0` http://www.  `1` https://www.  `2` http://  `3` https://

use core::fmt;

use log::warn;

use crate::gatt::model::{Uuid16, UuidError};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const EDDYSTONE_UUID: Uuid16 = Uuid16(0xfeaa);
const FRAME_TYPE_URL: u8 = 0x10;

/// Longest path (after scheme stripping) a URL frame can carry.
pub const MAX_URL_PATH_LEN: usize = 17;

// AD structure types (Core Specification Supplement, Part A).
pub const AD_FLAGS: u8 = 0x01;
pub const AD_UUID16_ALL: u8 = 0x03;
pub const AD_NAME_SHORT: u8 = 0x08;
pub const AD_NAME_COMPLETE: u8 = 0x09;
pub const AD_SVC_DATA16: u8 = 0x16;

/// LE General Discoverable, BR/EDR not supported.
const FLAGS_GENERAL_NO_BREDR: u8 = 0x06;

/// Legacy advertising PDU payload ceiling.
pub const MAX_LEGACY_PAYLOAD: usize = 31;

/// Longest name that fits the scan response next to its length and type.
pub const MAX_AD_NAME_LEN: usize = MAX_LEGACY_PAYLOAD - 2;

// ───────────────────────────────────────────────────────────────
// URL frame encoder
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlFrameError {
    /// The URL does not start with `http://` or `https://`.
    Scheme,
    /// The remaining path exceeds [`MAX_URL_PATH_LEN`].
    TooLong,
    AllocFailed,
}

impl fmt::Display for UrlFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheme => write!(f, "URL scheme must be http:// or https://"),
            Self::TooLong => write!(f, "URL path longer than {MAX_URL_PATH_LEN} bytes"),
            Self::AllocFailed => write!(f, "URL frame allocation failed"),
        }
    }
}

/// Encode `url` as an Eddystone-URL service data frame.
pub fn encode_url_frame(url: &str, tx_power: u8) -> Result<Vec<u8>, UrlFrameError> {
    let mut rest = url.as_bytes().strip_prefix(b"http").ok_or(UrlFrameError::Scheme)?;

    let mut scheme = 0u8;
    if let Some(tail) = rest.strip_prefix(b"s") {
        scheme += 1;
        rest = tail;
    }
    rest = rest.strip_prefix(b"://").ok_or(UrlFrameError::Scheme)?;
    match rest.strip_prefix(b"www.") {
        Some(tail) => rest = tail,
        None => scheme += 2,
    }

    if rest.len() > MAX_URL_PATH_LEN {
        return Err(UrlFrameError::TooLong);
    }

    let mut frame = Vec::new();
    frame
        .try_reserve_exact(5 + rest.len())
        .map_err(|_| UrlFrameError::AllocFailed)?;
    frame.extend_from_slice(&EDDYSTONE_UUID.to_le_bytes());
    frame.push(FRAME_TYPE_URL);
    frame.push(tx_power);
    frame.push(scheme);
    frame.extend_from_slice(rest);
    Ok(frame)
}

// ───────────────────────────────────────────────────────────────
// Advertising payload
// ───────────────────────────────────────────────────────────────

/// One AD structure: `[len][type][data…]` on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdRecord {
    pub ad_type: u8,
    pub data: Vec<u8>,
}

impl AdRecord {
    pub fn new(ad_type: u8, data: &[u8]) -> Self {
        Self {
            ad_type,
            data: data.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingError {
    InvalidUuid(UuidError),
    NothingToAdvertise,
}

impl fmt::Display for AdvertisingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUuid(e) => write!(f, "advertised uuid: {e}"),
            Self::NothingToAdvertise => write!(f, "nothing to advertise"),
        }
    }
}

impl From<AdvertisingError> for crate::error::Error {
    fn from(e: AdvertisingError) -> Self {
        match e {
            AdvertisingError::InvalidUuid(_) => Self::Argument("uuid must be 4 hex characters"),
            AdvertisingError::NothingToAdvertise => Self::Argument("nothing to advertise"),
        }
    }
}

/// Advertising data plus scan response for one `startAdvertising` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingData {
    pub records: Vec<AdRecord>,
    pub scan_response: Vec<AdRecord>,
}

impl AdvertisingData {
    /// Assemble the payload: URL records first (if `url` encodes), then one
    /// UUID record per entry of `uuids`.  The name goes into the scan
    /// response, shortened to [`MAX_AD_NAME_LEN`] bytes if needed.  A URL
    /// that fails to encode is logged and left out.
    pub fn build(
        name: &str,
        uuids: &[String],
        url: Option<&str>,
        tx_power: u8,
    ) -> Result<Self, AdvertisingError> {
        let mut records = Vec::with_capacity(uuids.len() + 2);

        if let Some(url) = url {
            match encode_url_frame(url, tx_power) {
                Ok(frame) => {
                    records.push(AdRecord::new(AD_UUID16_ALL, &EDDYSTONE_UUID.to_le_bytes()));
                    records.push(AdRecord::new(AD_SVC_DATA16, &frame));
                }
                Err(e) => warn!("ADV: URL '{url}' not advertised: {e}"),
            }
        }

        for text in uuids {
            let uuid = Uuid16::parse_exact(text).map_err(AdvertisingError::InvalidUuid)?;
            records.push(AdRecord::new(AD_UUID16_ALL, &uuid.to_le_bytes()));
        }

        if records.is_empty() {
            return Err(AdvertisingError::NothingToAdvertise);
        }

        Ok(Self {
            records,
            scan_response: vec![name_record(name)],
        })
    }

    /// Raw advertising PDU payload, led by the discoverability flags.
    pub fn advertising_payload(&self) -> Vec<u8> {
        let flags = AdRecord::new(AD_FLAGS, &[FLAGS_GENERAL_NO_BREDR]);
        encode_records(core::iter::once(&flags).chain(&self.records))
    }

    pub fn scan_response_payload(&self) -> Vec<u8> {
        encode_records(&self.scan_response)
    }
}

/// Complete name if it fits, otherwise a shortened name cut on a
/// character boundary.
fn name_record(name: &str) -> AdRecord {
    if name.len() <= MAX_AD_NAME_LEN {
        return AdRecord::new(AD_NAME_COMPLETE, name.as_bytes());
    }
    let mut end = MAX_AD_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    warn!("ADV: name shortened to {end} of {} bytes", name.len());
    AdRecord::new(AD_NAME_SHORT, &name.as_bytes()[..end])
}

fn encode_records<'a>(records: impl IntoIterator<Item = &'a AdRecord>) -> Vec<u8> {
    let mut out = Vec::new();
    for r in records {
        let Ok(len) = u8::try_from(r.data.len() + 1) else {
            warn!("ADV: record 0x{:02x} too long ({} bytes), skipped", r.ad_type, r.data.len());
            continue;
        };
        out.push(len);
        out.push(r.ad_type);
        out.extend_from_slice(&r.data);
    }
    out
}
