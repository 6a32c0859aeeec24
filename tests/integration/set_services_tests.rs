//! Integration tests for `setServices`: parsing, table layout,
//! registration, replacement and the completion callback.

use blescript::config::PeripheralConfig;
use blescript::error::Error;
use blescript::gatt::att::{AttError, Properties};
use blescript::gatt::table::AttributeValue;

use crate::mock_script::{MockHost, Val};
use crate::{one_service, ready_peripheral};

fn battery(host: &mut MockHost) -> Val {
    let read = host.recorder("onReadRequest");
    let notify = host.recorder("onNotify");
    let desc = host.obj(vec![
        ("uuid", host.str("2901")),
        ("value", host.str("Battery Level")),
    ]);
    let descriptors = host.arr(vec![desc]);
    one_service(
        host,
        "180f",
        "2a19",
        &["read", "notify"],
        vec![
            ("descriptors", descriptors),
            ("onReadRequest", read),
            ("onNotify", notify),
        ],
    )
}

// ── Layout ────────────────────────────────────────────────────

#[test]
fn registers_declarations_description_and_ccc() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let services = battery(&mut host);

    p.set_services(&mut host, &services, None).unwrap();

    assert!(p.is_registered());
    let stack = p.stack();
    assert_eq!(stack.register_calls, 1);
    assert_eq!(stack.tables.len(), 1);

    let uuids: Vec<u16> = stack.tables[0].entries.iter().map(|e| e.uuid.0).collect();
    assert_eq!(uuids, vec![0x2800, 0x2803, 0x2a19, 0x2901, 0x2902]);

    match &stack.tables[0].entries[1].value {
        AttributeValue::CharacteristicDeclaration { uuid, properties } => {
            assert_eq!(uuid.0, 0x2a19);
            assert!(properties.contains(Properties::READ | Properties::NOTIFY));
            assert!(!properties.contains(Properties::WRITE));
        }
        other => panic!("expected characteristic declaration, got {other:?}"),
    }

    let value = &stack.tables[0].entries[2];
    assert!(value.permissions.readable());
    assert!(!value.permissions.writable());

    let mut buf = [0u8; 32];
    let n = stack.tables[0].entries[3].read_static(0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Battery Level");
}

#[test]
fn several_services_register_as_one_batch() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let a = one_service(&mut host, "180f", "2a19", &["read"], vec![]);
    let b = one_service(&mut host, "0x180a", "2a29", &["read"], vec![]);
    let Val::Arr(a) = a else { unreachable!() };
    let Val::Arr(b) = b else { unreachable!() };
    let both = host.arr(vec![a.borrow()[0].clone(), b.borrow()[0].clone()]);

    p.set_services(&mut host, &both, None).unwrap();

    assert_eq!(p.stack().register_calls, 1);
    assert_eq!(p.stack().tables.len(), 2);
    assert_eq!(p.stack().tables[1].service.0, 0x180a);
    assert_eq!(p.services().characteristic_count(), 2);
}

#[test]
fn unknown_properties_are_ignored() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let services = one_service(&mut host, "1234", "5678", &["read", "broadcast"], vec![]);

    p.set_services(&mut host, &services, None).unwrap();

    let chrc = &p.services().services()[0].characteristics[0];
    assert_eq!(chrc.properties.bits(), Properties::READ);
    // No notify property, so no CCC entry.
    assert_eq!(p.stack().tables[0].len(), 3);
}

// ── Argument validation ───────────────────────────────────────

#[test]
fn empty_array_is_rejected_and_previous_services_kept() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let services = battery(&mut host);
    p.set_services(&mut host, &services, None).unwrap();

    let empty = host.arr(vec![]);
    let err = p.set_services(&mut host, &empty, None).unwrap_err();

    assert!(matches!(err, Error::Argument(_)));
    assert_eq!(p.stack().unregister_calls, 0);
    assert_eq!(p.stack().tables.len(), 1);
    assert!(p.is_registered());
    assert_eq!(p.services().characteristic_count(), 1);
}

#[test]
fn non_array_and_bad_callback_are_rejected() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let not_array = host.obj(vec![]);
    assert!(p.set_services(&mut host, &not_array, None).is_err());

    let services = battery(&mut host);
    let not_callable = host.str("done");
    assert!(p.set_services(&mut host, &services, Some(&not_callable)).is_err());
    assert_eq!(p.stack().register_calls, 0);
}

#[test]
fn missing_characteristic_uuid_fails_whole_batch() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let chrc = host.obj(vec![("properties", host.arr(vec![]))]);
    let service = host.obj(vec![
        ("uuid", host.str("180f")),
        ("characteristics", host.arr(vec![chrc])),
    ]);
    let services = host.arr(vec![service]);

    let err = p.set_services(&mut host, &services, None).unwrap_err();

    assert_eq!(err, Error::Argument("characteristic uuid doesn't exist"));
    assert_eq!(p.stack().register_calls, 0);
    assert!(!p.is_registered());
    assert!(p.services().is_empty());
}

#[test]
fn malformed_uuids_are_rejected() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let services = one_service(&mut host, "xyz1", "2a19", &["read"], vec![]);
    assert_eq!(
        p.set_services(&mut host, &services, None),
        Err(Error::Argument("service uuid is invalid"))
    );

    let long = "0".repeat(36);
    let services = one_service(&mut host, "180f", &long, &["read"], vec![]);
    assert_eq!(
        p.set_services(&mut host, &services, None),
        Err(Error::Argument("characteristic uuid is invalid"))
    );
}

#[test]
fn services_must_be_objects() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let services = host.arr(vec![Val::Num(3.0)]);
    assert_eq!(
        p.set_services(&mut host, &services, None),
        Err(Error::Argument("service is not an object"))
    );

    // Any object kind passes the shape check, like characteristics do.
    let services = host.arr(vec![host.arr(vec![])]);
    assert_eq!(
        p.set_services(&mut host, &services, None),
        Err(Error::Argument("service uuid doesn't exist"))
    );
    assert_eq!(p.stack().register_calls, 0);
}

#[test]
fn properties_must_be_strings() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let chrc = host.obj(vec![
        ("uuid", host.str("2a19")),
        ("properties", host.arr(vec![Val::Num(2.0)])),
    ]);
    let service = host.obj(vec![
        ("uuid", host.str("180f")),
        ("characteristics", host.arr(vec![chrc])),
    ]);
    let services = host.arr(vec![service]);

    assert_eq!(
        p.set_services(&mut host, &services, None),
        Err(Error::Argument("property is not a string"))
    );
}

// ── Replacement and callback ──────────────────────────────────

#[test]
fn replacing_services_releases_previous_set() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let first = battery(&mut host);
    p.set_services(&mut host, &first, None).unwrap();
    let old_generation = p.services().generation();

    let second = one_service(&mut host, "180a", "2a29", &["read"], vec![]);
    p.set_services(&mut host, &second, None).unwrap();

    assert_eq!(p.stack().unregister_calls, 1);
    assert_eq!(p.stack().register_calls, 2);
    assert_eq!(p.stack().tables[0].service.0, 0x180a);
    assert_ne!(p.services().generation(), old_generation);
}

#[test]
fn callback_gets_undefined_on_success() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let services = battery(&mut host);
    let done = host.recorder("done");

    p.set_services(&mut host, &services, Some(&done)).unwrap();

    let calls = host.calls_to("done");
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0].args[0], Val::Undefined));
}

#[test]
fn callback_gets_message_when_registration_fails() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    p.stack_mut().fail_register = true;
    let services = battery(&mut host);
    let done = host.recorder("done");

    // The call itself succeeds; the failure is reported to the callback.
    p.set_services(&mut host, &services, Some(&done)).unwrap();

    assert!(!p.is_registered());
    let calls = host.calls_to("done");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0].str(), Some("failed to register services"));
}

// ── Constructors ──────────────────────────────────────────────

#[test]
fn characteristic_constructor_stamps_result_codes() {
    let (p, mut host) = ready_peripheral(PeripheralConfig::default());
    let object = host.obj(vec![("uuid", host.str("2a19"))]);

    let out = p.characteristic(&mut host, &object).unwrap();

    assert_eq!(out.field("RESULT_SUCCESS").num(), Some(0.0));
    assert_eq!(
        out.field("RESULT_INVALID_OFFSET").num(),
        Some(f64::from(AttError::INVALID_OFFSET.code()))
    );
    assert_eq!(
        out.field("RESULT_UNLIKELY_ERROR").num(),
        Some(f64::from(AttError::UNLIKELY.code()))
    );
    assert_eq!(out.field("uuid").str(), Some("2a19"));
}

#[test]
fn constructors_require_objects() {
    let (p, mut host) = ready_peripheral(PeripheralConfig::default());
    let text = host.str("180f");
    assert!(p.primary_service(&mut host, &text).is_err());
    assert!(p.characteristic(&mut host, &text).is_err());
    assert!(p.descriptor(&mut host, &Val::Null).is_err());

    let object = host.obj(vec![]);
    assert!(p.primary_service(&mut host, &object).is_ok());
    assert!(p.descriptor(&mut host, &object).is_ok());
}
