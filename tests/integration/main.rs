//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host (x86_64) with no
//! BLE controller required.

mod events_tests;
mod set_services_tests;

use blescript::app::service::Peripheral;
use blescript::config::PeripheralConfig;

use mock_script::{MockHost, Val};
use mock_stack::MockStack;

pub type TestPeripheral = Peripheral<MockHost, MockStack>;

/// A peripheral over fresh mocks, with the stack already reported ready.
pub fn ready_peripheral(config: PeripheralConfig) -> (TestPeripheral, MockHost) {
    let mut host = MockHost::new();
    let mut p = Peripheral::new(config, MockStack::new());
    p.bridge()
        .post(blescript::app::events::StackEvent::Ready { status: 0 });
    p.service(&mut host);
    (p, host)
}

/// `{ uuid, characteristics: [ { uuid, properties, ...extra } ] }` wrapped
/// in a one-element services array.
pub fn one_service(
    host: &mut MockHost,
    service_uuid: &str,
    chrc_uuid: &str,
    properties: &[&str],
    extra: Vec<(&str, Val)>,
) -> Val {
    let props = properties.iter().map(|p| host.str(p)).collect();
    let mut fields = vec![
        ("uuid", host.str(chrc_uuid)),
        ("properties", host.arr(props)),
    ];
    fields.extend(extra);
    let chrc = host.obj(fields);
    let service = host.obj(vec![
        ("uuid", host.str(service_uuid)),
        ("characteristics", host.arr(vec![chrc])),
    ]);
    host.arr(vec![service])
}
