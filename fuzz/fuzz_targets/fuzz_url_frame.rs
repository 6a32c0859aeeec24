//! Fuzz target: `encode_url_frame` and advertising payload assembly
//!
//! Feeds arbitrary strings as the beacon URL and asserts that:
//! - the encoder never panics
//! - accepted frames are bounded by the 17-byte path ceiling
//! - a payload built around any URL still starts with the flags record
//!
//! cargo fuzz run fuzz_url_frame

#![no_main]

use blescript::advertising::{AD_FLAGS, AdvertisingData, MAX_URL_PATH_LEN, encode_url_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&tx, rest)) = data.split_first() else {
        return;
    };
    let Ok(url) = core::str::from_utf8(rest) else {
        return;
    };

    if let Ok(frame) = encode_url_frame(url, tx) {
        assert!(frame.len() <= 5 + MAX_URL_PATH_LEN, "frame exceeds path ceiling");
        assert_eq!(frame[3], tx);
    }

    // A bad URL is skipped, so the UUID keeps the payload non-empty.
    let data = AdvertisingData::build("fuzz", &["180f".to_owned()], Some(url), tx)
        .expect("uuid alone is advertisable");
    let payload = data.advertising_payload();
    assert_eq!(&payload[..3], &[2, AD_FLAGS, 0x06]);
});
