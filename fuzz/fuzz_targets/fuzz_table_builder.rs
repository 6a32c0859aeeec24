//! Fuzz target: attribute table builder
//!
//! Decodes arbitrary bytes into a service tree shape and asserts that:
//! - the count pass always matches the fill pass
//! - every characteristic's value attribute points at its own value entry
//! - static reads at arbitrary offsets never panic
//!
//! cargo fuzz run fuzz_table_builder

#![no_main]

use blescript::gatt::att::Properties;
use blescript::gatt::model::{Characteristic, Service, ServiceTree, Uuid16};
use blescript::gatt::table::{AttributeValue, build_all, count_entries};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut tree = ServiceTree::new(1);
    // [svc_lo svc_hi n] then n × [uuid_lo uuid_hi props desc_len desc…]
    let mut bytes = data.iter().copied();
    while let (Some(lo), Some(hi), Some(n)) = (bytes.next(), bytes.next(), bytes.next()) {
        let mut characteristics = Vec::new();
        for _ in 0..(n % 8) {
            let (Some(lo), Some(hi), Some(props), Some(desc_len)) =
                (bytes.next(), bytes.next(), bytes.next(), bytes.next())
            else {
                break;
            };
            let mut chrc = Characteristic::new(Uuid16(u16::from_le_bytes([lo, hi])), ());
            chrc.properties = Properties::from_bits(props);
            if desc_len & 0x80 != 0 {
                let text: String = bytes
                    .by_ref()
                    .take(usize::from(desc_len & 0x1f))
                    .map(char::from)
                    .collect();
                chrc.description = Some(text);
            }
            characteristics.push(chrc);
        }
        tree.push(Service {
            uuid: Uuid16(u16::from_le_bytes([lo, hi])),
            object: (),
            characteristics,
        });
    }
    if tree.is_empty() {
        return;
    }

    let counts: Vec<usize> = tree.services().iter().map(count_entries).collect();
    let tables = build_all(&mut tree).expect("small trees always build");

    let mut dest = [0u8; 16];
    for (t, (table, counted)) in tables.iter().zip(counts).enumerate() {
        assert_eq!(table.len(), counted, "count/fill mismatch");
        for (c, chrc) in tree.services()[t].characteristics.iter().enumerate() {
            let attr = chrc.value_attr.expect("value attribute recorded");
            let entry = &table.entries[attr.entry as usize];
            assert_eq!(entry.value, AttributeValue::Value(tree.key(t, c)));
        }
        for (i, entry) in table.entries.iter().enumerate() {
            let _ = entry.read_static(i as u16, &mut dest);
        }
    }
});
