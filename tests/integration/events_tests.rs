//! Integration tests for event dispatch, advertising, the connection
//! lifecycle and the subscribe / notify flow.

use std::cell::RefCell;
use std::rc::Rc;

use blescript::PeripheralState;
use blescript::advertising::{
    AD_NAME_SHORT, AD_SVC_DATA16, AD_UUID16_ALL, MAX_AD_NAME_LEN, MAX_LEGACY_PAYLOAD,
};
use blescript::app::events::{ConnectionId, EventPayload, StackEvent};
use blescript::app::ports::ScriptHost;
use blescript::app::service::Peripheral;
use blescript::config::PeripheralConfig;
use blescript::error::Error;
use blescript::gatt::table::AttributeRef;

use crate::mock_script::{MockHost, Val};
use crate::mock_stack::MockStack;
use crate::{TestPeripheral, one_service, ready_peripheral};

fn connect(p: &mut TestPeripheral, host: &mut MockHost, conn: u16, address: &str) {
    let EventPayload::Text(address) = EventPayload::text(address) else {
        unreachable!()
    };
    p.bridge().post(StackEvent::Connected {
        conn: ConnectionId(conn),
        address,
    });
    p.service(host);
}

fn disconnect(p: &mut TestPeripheral, host: &mut MockHost, conn: u16) {
    p.bridge().post(StackEvent::Disconnected {
        conn: ConnectionId(conn),
        reason: 0x13,
    });
    p.service(host);
}

fn uuid_list(host: &MockHost, uuids: &[&str]) -> Val {
    host.arr(uuids.iter().map(|u| host.str(u)).collect())
}

// ── Registration and dispatch ─────────────────────────────────

#[test]
fn state_change_reports_powered_on() {
    let mut host = MockHost::new();
    let mut p = Peripheral::new(PeripheralConfig::default(), MockStack::new());
    let handler = host.recorder("stateChange");
    let name = host.str("stateChange");
    p.on(&mut host, &name, &handler).unwrap();
    assert_eq!(p.state(), PeripheralState::PoweredOff);

    p.bridge().post(StackEvent::Ready { status: 0 });
    p.service(&mut host);

    assert_eq!(p.state(), PeripheralState::Idle);
    let calls = host.calls_to("stateChange");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0].str(), Some("poweredOn"));
}

#[test]
fn failed_stack_start_stays_powered_off() {
    let mut host = MockHost::new();
    let mut p = Peripheral::new(PeripheralConfig::default(), MockStack::new());
    let handler = host.recorder("stateChange");
    let name = host.str("stateChange");
    p.on(&mut host, &name, &handler).unwrap();

    p.bridge().post(StackEvent::Ready { status: 3 });
    p.service(&mut host);

    assert_eq!(p.state(), PeripheralState::PoweredOff);
    assert_eq!(host.call_count("stateChange"), 0);
}

#[test]
fn on_validates_arguments() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let handler = host.recorder("h");

    let long = host.str("an-event-name-way-too-long");
    assert_eq!(
        p.on(&mut host, &long, &handler),
        Err(Error::Argument("event type string too long"))
    );
    assert!(p.on(&mut host, &Val::Num(1.0), &handler).is_err());
    let name = host.str("accept");
    assert!(p.on(&mut host, &name, &Val::Num(1.0)).is_err());
}

#[test]
fn latest_handler_for_a_name_wins() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let first = host.recorder("first");
    let second = host.recorder("second");
    let name = host.str("accept");
    p.on(&mut host, &name, &first).unwrap();
    p.on(&mut host, &name, &second).unwrap();

    connect(&mut p, &mut host, 1, "AA:BB:CC:DD:EE:FF");

    assert_eq!(host.call_count("first"), 0);
    assert_eq!(host.call_count("second"), 1);
}

#[test]
fn lifecycle_handlers_run_in_the_pass_that_sees_the_event() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let handler = host.recorder("accept");
    let name = host.str("accept");
    p.on(&mut host, &name, &handler).unwrap();

    let EventPayload::Text(address) = EventPayload::text("AA:BB:CC:DD:EE:FF") else {
        unreachable!()
    };
    p.bridge().post(StackEvent::Connected {
        conn: ConnectionId(2),
        address,
    });
    assert_eq!(p.service(&mut host), 1);

    assert_eq!(host.call_count("accept"), 1);
    assert_eq!(p.pending_work(), 0);
}

#[test]
fn events_without_handlers_are_ignored() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    connect(&mut p, &mut host, 4, "AA:BB:CC:DD:EE:FF");
    assert_eq!(p.connection(), Some(ConnectionId(4)));
    assert!(host.calls.is_empty());
    assert_eq!(p.pending_work(), 0);
}

// ── Advertising ───────────────────────────────────────────────

#[test]
fn advertising_start_is_dispatched_once_with_status() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let handler = host.recorder("advertisingStart");
    let event = host.str("advertisingStart");
    p.on(&mut host, &event, &handler).unwrap();

    let name = host.str("blescript");
    let uuids = uuid_list(&host, &["180f"]);
    p.start_advertising(&mut host, &name, &uuids, None).unwrap();
    p.service(&mut host);
    p.service(&mut host);

    let calls = host.calls_to("advertisingStart");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0].num(), Some(0.0));
    assert_eq!(p.state(), PeripheralState::Advertising);

    let data = p.stack().advertising.as_ref().unwrap();
    assert_eq!(data.records.len(), 1);
    assert_eq!(data.records[0].data, vec![0x0f, 0x18]);
    assert_eq!(data.scan_response[0].data, b"blescript".to_vec());
}

#[test]
fn stack_failure_is_reported_through_the_event() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    p.stack_mut().fail_advertise = Some(-3);
    let handler = host.recorder("advertisingStart");
    let event = host.str("advertisingStart");
    p.on(&mut host, &event, &handler).unwrap();

    let name = host.str("dev");
    let uuids = uuid_list(&host, &["180f"]);
    p.start_advertising(&mut host, &name, &uuids, None).unwrap();
    p.service(&mut host);

    assert_eq!(host.calls_to("advertisingStart")[0].args[0].num(), Some(-3.0));
    assert_eq!(p.state(), PeripheralState::Idle);
}

#[test]
fn url_records_lead_the_payload() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig {
        tx_power: 0xeb,
        ..PeripheralConfig::default()
    });
    let name = host.str("dev");
    let uuids = uuid_list(&host, &["180f"]);
    let url = host.str("https://goo.gl/abc");
    p.start_advertising(&mut host, &name, &uuids, Some(&url)).unwrap();

    let data = p.stack().advertising.as_ref().unwrap();
    let types: Vec<u8> = data.records.iter().map(|r| r.ad_type).collect();
    assert_eq!(types, vec![AD_UUID16_ALL, AD_SVC_DATA16, AD_UUID16_ALL]);
    assert_eq!(&data.records[1].data[..5], &[0xaa, 0xfe, 0x10, 0xeb, 0x03]);
}

#[test]
fn long_device_name_is_shortened_not_fatal() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let handler = host.recorder("advertisingStart");
    let event = host.str("advertisingStart");
    p.on(&mut host, &event, &handler).unwrap();

    let name = host.str(&"n".repeat(255));
    let uuids = uuid_list(&host, &["180f"]);
    p.start_advertising(&mut host, &name, &uuids, None).unwrap();
    p.service(&mut host);

    assert_eq!(host.calls_to("advertisingStart")[0].args[0].num(), Some(0.0));
    let data = p.stack().advertising.as_ref().unwrap();
    assert_eq!(data.scan_response[0].ad_type, AD_NAME_SHORT);
    assert_eq!(data.scan_response[0].data.len(), MAX_AD_NAME_LEN);
    assert_eq!(data.scan_response_payload().len(), MAX_LEGACY_PAYLOAD);
}

#[test]
fn bad_advertising_arguments_are_rejected() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let handler = host.recorder("advertisingStart");
    let event = host.str("advertisingStart");
    p.on(&mut host, &event, &handler).unwrap();
    let name = host.str("dev");

    let short = uuid_list(&host, &["18f"]);
    assert!(p.start_advertising(&mut host, &name, &short, None).is_err());

    let not_array = host.str("180f");
    assert!(p.start_advertising(&mut host, &name, &not_array, None).is_err());

    let mixed = host.arr(vec![host.str("180f"), Val::Num(1.0)]);
    assert!(p.start_advertising(&mut host, &name, &mixed, None).is_err());

    p.service(&mut host);
    assert_eq!(host.call_count("advertisingStart"), 0);
    assert!(p.stack().advertising.is_none());
}

#[test]
fn stop_advertising_reaches_the_stack() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let name = host.str("dev");
    let uuids = uuid_list(&host, &["180f"]);
    p.start_advertising(&mut host, &name, &uuids, None).unwrap();

    p.stop_advertising().unwrap();

    assert_eq!(p.stack().advertise_stops, 1);
    assert_eq!(p.state(), PeripheralState::Idle);
}

// ── Connection lifecycle ──────────────────────────────────────

#[test]
fn accept_and_disconnect_carry_the_peer_address() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    for event in ["accept", "disconnect"] {
        let handler = host.recorder(event);
        let name = host.str(event);
        p.on(&mut host, &name, &handler).unwrap();
    }

    connect(&mut p, &mut host, 7, "C0:11:22:33:44:55");
    assert_eq!(p.state(), PeripheralState::Connected);
    assert_eq!(
        host.calls_to("accept")[0].args[0].str(),
        Some("C0:11:22:33:44:55")
    );

    disconnect(&mut p, &mut host, 7);
    assert_eq!(p.state(), PeripheralState::Idle);
    assert_eq!(p.connection(), None);
    assert_eq!(
        host.calls_to("disconnect")[0].args[0].str(),
        Some("C0:11:22:33:44:55")
    );
}

#[test]
fn disconnect_for_another_connection_is_ignored() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    connect(&mut p, &mut host, 1, "AA:BB:CC:DD:EE:FF");
    disconnect(&mut p, &mut host, 2);
    assert_eq!(p.connection(), Some(ConnectionId(1)));
}

#[test]
fn disconnect_call_targets_the_default_connection() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    p.disconnect().unwrap();
    assert!(p.stack().disconnects.is_empty());

    connect(&mut p, &mut host, 9, "AA:BB:CC:DD:EE:FF");
    p.disconnect().unwrap();
    assert_eq!(p.stack().disconnects, vec![ConnectionId(9)]);
}

// ── Subscriptions and notifications ───────────────────────────

/// A notifying characteristic whose `onSubscribe` stashes the update
/// callback in the returned cell.
fn notifying(host: &mut MockHost) -> (Val, Rc<RefCell<Option<Val>>>) {
    let stash = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&stash);
    let subscribe = host.func("onSubscribe", move |_, _, args| {
        *slot.borrow_mut() = args.get(1).cloned();
        Ok(Val::Undefined)
    });
    let unsubscribe = host.recorder("onUnsubscribe");
    let notify = host.recorder("onNotify");
    let services = one_service(
        host,
        "180d",
        "2a37",
        &["notify"],
        vec![
            ("onSubscribe", subscribe),
            ("onUnsubscribe", unsubscribe),
            ("onNotify", notify),
        ],
    );
    (services, stash)
}

fn write_ccc(p: &mut TestPeripheral, host: &mut MockHost, value: [u8; 2]) {
    let ccc = p.stack().find(0x2902).unwrap();
    p.bridge().write(&ccc, 0, &value).unwrap();
    p.service(host);
}

#[test]
fn ccc_write_subscribes_and_updates_notify() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let (services, stash) = notifying(&mut host);
    p.set_services(&mut host, &services, None).unwrap();
    assert_eq!(host.call_count("onSubscribe"), 0);

    connect(&mut p, &mut host, 3, "AA:BB:CC:DD:EE:FF");
    write_ccc(&mut p, &mut host, [0x01, 0x00]);

    let calls = host.calls_to("onSubscribe");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0].num(), Some(20.0));

    let update = stash.borrow().clone().unwrap();
    let value = host.buf(&[0x06, 0x48]);
    host.call(&update, &Val::Undefined, &[value]).unwrap();
    p.service(&mut host);

    assert_eq!(
        p.stack().notifications,
        vec![(
            ConnectionId(3),
            AttributeRef { table: 0, entry: 2 },
            vec![0x06, 0x48]
        )]
    );
    assert_eq!(host.call_count("onNotify"), 1);

    write_ccc(&mut p, &mut host, [0x00, 0x00]);
    assert_eq!(host.call_count("onUnsubscribe"), 1);
}

#[test]
fn repeated_enable_does_not_resubscribe() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let (services, _stash) = notifying(&mut host);
    p.set_services(&mut host, &services, None).unwrap();

    write_ccc(&mut p, &mut host, [0x01, 0x00]);
    write_ccc(&mut p, &mut host, [0x01, 0x00]);

    assert_eq!(host.call_count("onSubscribe"), 1);
}

#[test]
fn disconnect_ends_subscriptions() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let (services, _stash) = notifying(&mut host);
    p.set_services(&mut host, &services, None).unwrap();
    connect(&mut p, &mut host, 3, "AA:BB:CC:DD:EE:FF");
    write_ccc(&mut p, &mut host, [0x01, 0x00]);

    disconnect(&mut p, &mut host, 3);

    assert_eq!(host.call_count("onUnsubscribe"), 1);
    assert!(!p.services().services()[0].characteristics[0].subscribed);
}

#[test]
fn notification_without_connection_is_dropped() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let (services, stash) = notifying(&mut host);
    p.set_services(&mut host, &services, None).unwrap();
    write_ccc(&mut p, &mut host, [0x01, 0x00]);

    let update = stash.borrow().clone().unwrap();
    let value = host.buf(&[1]);
    host.call(&update, &Val::Undefined, &[value]).unwrap();
    p.service(&mut host);

    assert!(p.stack().notifications.is_empty());
    assert_eq!(host.call_count("onNotify"), 0);
}

#[test]
fn update_callback_requires_a_buffer() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig::default());
    let (services, stash) = notifying(&mut host);
    p.set_services(&mut host, &services, None).unwrap();
    write_ccc(&mut p, &mut host, [0x01, 0x00]);

    let update = stash.borrow().clone().unwrap();
    assert!(host.call(&update, &Val::Undefined, &[Val::Num(1.0)]).is_err());
}

#[test]
fn subscribe_at_parse_calls_on_subscribe_immediately() {
    let (mut p, mut host) = ready_peripheral(PeripheralConfig {
        subscribe_at_parse: true,
        subscribe_max_value_size: 64,
        ..PeripheralConfig::default()
    });
    let (services, _stash) = notifying(&mut host);
    p.set_services(&mut host, &services, None).unwrap();

    let calls = host.calls_to("onSubscribe");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0].num(), Some(64.0));

    // The CCC write only flips the flag.
    write_ccc(&mut p, &mut host, [0x01, 0x00]);
    assert_eq!(host.call_count("onSubscribe"), 1);
}
